//! # Basic Block for `PhcResNet`
//!
//! [`PhcBasicBlock`] is the core `PhcResNet` residual unit: two 3x3 hypercomplex
//! conv/norm layers, a [`Shortcut`], and an optional `ReZero` gate.
//!
//! Without the gate:
//! ```text
//! out = relu(shortcut(x) + norm(conv(relu(norm(conv(x))))))
//! ```
//!
//! With the gate, a learned scalar initialized to `0`:
//! ```text
//! out = shortcut(x) + gate * relu(norm(conv(relu(norm(conv(x))))))
//! ```
//!
//! [`PhcBasicBlockMeta`] defines a common meta API for [`PhcBasicBlock`]
//! and [`PhcBasicBlockConfig`].

use crate::layers::conv_norm::{PhConvNorm2d, PhConvNorm2dConfig};
use crate::layers::phconv::{PhConv2dConfig, PhConv2dMeta};
use crate::models::phc_resnet::shortcut::{Shortcut, ShortcutConfig, ShortcutMode};
use crate::models::phc_resnet::util::{check_stride, stride_output_resolution};
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Param;
use burn::nn::{Initializer, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::ElementConversion;

/// [`PhcBasicBlock`] Meta trait.
pub trait PhcBasicBlockMeta {
    /// The hypercomplex algebra dimension, ``n``.
    fn algebra_dim(&self) -> usize;

    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// First conv/norm layer output channels.
    fn planes(&self) -> usize;

    /// Control factor for `out_planes()`.
    fn expansion_factor(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// The stride of the first conv, and of the shortcut.
    fn stride(&self) -> usize;

    /// Is the `ReZero` gate enabled?
    fn rezero(&self) -> bool;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride), ceil(in_width / stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_output_resolution(input_resolution, self.stride())
    }
}

/// [`PhcBasicBlock`] Config.
///
/// Implements [`PhcBasicBlockMeta`].
#[derive(Config, Debug)]
pub struct PhcBasicBlockConfig {
    /// The hypercomplex algebra dimension, ``n``.
    pub n: usize,

    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Configures the `out_planes` as a function of `expansion_factor`.
    pub planes: usize,

    /// Control factor for `out_planes()`.
    #[config(default = 1)]
    pub expansion_factor: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Shortcut policy when the block changes shape.
    #[config(default = "ShortcutMode::Projection")]
    pub shortcut: ShortcutMode,

    /// Enable the zero-initialized residual gate.
    #[config(default = false)]
    pub rezero: bool,
}

impl PhcBasicBlockMeta for PhcBasicBlockConfig {
    fn algebra_dim(&self) -> usize {
        self.n
    }

    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn rezero(&self) -> bool {
        self.rezero
    }
}

impl PhcBasicBlockConfig {
    fn conv1_config(&self) -> PhConvNorm2dConfig {
        PhConv2dConfig::new(self.n, [self.in_planes(), self.planes()], 3)
            .with_stride(self.stride())
            .with_padding(1)
            .into()
    }

    fn conv2_config(&self) -> PhConvNorm2dConfig {
        PhConv2dConfig::new(self.n, [self.planes(), self.out_planes()], 3)
            .with_padding(1)
            .into()
    }

    fn shortcut_config(&self) -> ShortcutConfig {
        ShortcutConfig::new(self.n, self.in_planes(), self.out_planes())
            .with_stride(self.stride())
            .with_mode(self.shortcut)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.expansion_factor == 0 {
            bail!("expansion_factor must be >= 1");
        }
        check_stride(self.stride)?;
        self.conv1_config().conv.try_validate()?;
        self.conv2_config().conv.try_validate()?;
        self.shortcut_config().try_validate()
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`PhcBasicBlock`], or report a configuration error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<PhcBasicBlock<B>> {
        self.try_validate()?;

        let shortcut = self.shortcut_config();
        tracing::trace!(
            in_planes = self.in_planes(),
            out_planes = self.out_planes(),
            stride = self.stride(),
            shortcut = ?shortcut.effective_mode(),
            rezero = self.rezero,
            "init PhcBasicBlock"
        );

        Ok(PhcBasicBlock {
            expansion_factor: self.expansion_factor,
            shortcut: shortcut.try_init(device)?,
            conv1: self.conv1_config().try_init(device)?,
            conv2: self.conv2_config().try_init(device)?,
            act: Relu,
            gate: self.rezero.then(|| Initializer::Zeros.init([1], device)),
        })
    }

    /// Initialize a [`PhcBasicBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PhcBasicBlock<B> {
        self.try_init(device).unwrap_or_else(|err| panic!("{err}"))
    }
}

/// Basic Block for `PhcResNet`.
///
/// Implements [`PhcBasicBlockMeta`].
#[derive(Module, Debug)]
pub struct PhcBasicBlock<B: Backend> {
    /// Expansion factor.
    pub expansion_factor: usize,

    /// Residual path.
    pub shortcut: Shortcut<B>,

    /// First conv/norm; carries the stride.
    pub conv1: PhConvNorm2d<B>,

    /// Second conv/norm.
    pub conv2: PhConvNorm2d<B>,

    /// Activation.
    pub act: Relu,

    /// Optional `ReZero` gate, ``[1]``.
    pub gate: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> PhcBasicBlockMeta for PhcBasicBlock<B> {
    fn algebra_dim(&self) -> usize {
        self.conv1.algebra_dim()
    }

    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv1.out_channels()
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn out_planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()
    }

    fn rezero(&self) -> bool {
        self.gate.is_some()
    }
}

impl<B: Backend> PhcBasicBlock<B> {
    /// The current `ReZero` gate value, if enabled.
    pub fn gate_value(&self) -> Option<f64> {
        self.gate
            .as_ref()
            .map(|gate| gate.val().into_scalar().elem::<f64>())
    }

    /// The shortcut policy in effect; `None` for identity.
    pub fn shortcut_mode(&self) -> Option<ShortcutMode> {
        self.shortcut.mode()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height/stride), ceil(in_width/stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let identity = self.shortcut.forward(input.clone());

        let x = self.conv1.forward(input);
        let x = self.act.forward(x);
        let x = self.conv2.forward(x);

        let x = match &self.gate {
            Some(gate) => identity + self.act.forward(x) * gate.val().unsqueeze::<4>(),
            None => self.act.forward(identity + x),
        };

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
