//! # `PhConvNorm` Module
//!
//! A [`PhConvNorm2d`] module is a [`PhConv2d`] layer followed by a [`BatchNorm`] layer.

use crate::layers::phconv::{PhConv2d, PhConv2dConfig, PhConv2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`PhConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct PhConvNorm2dConfig {
    /// The [`PhConv2d`] config.
    pub conv: PhConv2dConfig,
}

impl From<PhConv2dConfig> for PhConvNorm2dConfig {
    fn from(conv: PhConv2dConfig) -> Self {
        Self { conv }
    }
}

impl PhConv2dMeta for PhConvNorm2dConfig {
    fn algebra_dim(&self) -> usize {
        self.conv.algebra_dim()
    }

    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn kernel_size(&self) -> usize {
        self.conv.kernel_size()
    }

    fn stride(&self) -> usize {
        self.conv.stride()
    }

    fn padding(&self) -> usize {
        self.conv.padding()
    }
}

impl PhConvNorm2dConfig {
    /// Initialize a [`PhConvNorm2d`], or report a configuration error.
    ///
    /// The norm layer is sized to the conv output channels.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<PhConvNorm2d<B>> {
        Ok(PhConvNorm2d {
            conv: self.conv.try_init(device)?,
            norm: BatchNormConfig::new(self.out_channels()).init(device),
        })
    }

    /// Initialize a [`PhConvNorm2d`].
    ///
    /// # Panics
    ///
    /// If the conv config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PhConvNorm2d<B> {
        self.try_init(device).unwrap_or_else(|err| panic!("{err}"))
    }
}

/// [`PhConv2d`] and [`BatchNorm`] layer.
#[derive(Module, Debug)]
pub struct PhConvNorm2d<B: Backend> {
    /// Internal hypercomplex conv layer.
    pub conv: PhConv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> PhConv2dMeta for PhConvNorm2d<B> {
    fn algebra_dim(&self) -> usize {
        self.conv.algebra_dim()
    }

    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn kernel_size(&self) -> usize {
        self.conv.kernel_size()
    }

    fn stride(&self) -> usize {
        self.conv.stride()
    }

    fn padding(&self) -> usize {
        self.conv.padding()
    }
}

impl<B: Backend> PhConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
