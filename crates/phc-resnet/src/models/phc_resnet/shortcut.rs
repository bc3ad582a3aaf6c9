//! # Residual Shortcut Policy
//!
//! [`ShortcutConfig`] resolves, at construction time, how the residual path of a
//! block is formed:
//!
//! * [`Shortcut::Identity`] when stride is 1 and the channel count is unchanged;
//! * otherwise, as selected by [`ShortcutMode`]:
//!   * [`Shortcut::Pad`] - strided subsampling followed by symmetric zero channel padding,
//!     parameter free;
//!   * [`Shortcut::Projection`] - a 1x1 [`PhConvNorm2d`] with the block's stride.

use crate::layers::conv_norm::{PhConvNorm2d, PhConvNorm2dConfig};
use crate::layers::phconv::{PhConv2dConfig, PhConv2dMeta};
use crate::models::phc_resnet::util::{check_stride, stride_output_resolution};
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Int;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How a shortcut is formed when a block changes shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortcutMode {
    /// Subsample by the stride and zero-pad channels; "option A".
    IdentityPad,

    /// 1x1 hypercomplex conv + norm; "option B".
    #[default]
    Projection,
}

impl Display for ShortcutMode {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ShortcutMode::IdentityPad => write!(f, "identity_pad"),
            ShortcutMode::Projection => write!(f, "projection"),
        }
    }
}

impl FromStr for ShortcutMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "identity_pad" => Ok(ShortcutMode::IdentityPad),
            "b" | "projection" => Ok(ShortcutMode::Projection),
            _ => bail!("unsupported shortcut mode: {s:?}"),
        }
    }
}

/// [`Shortcut`] Meta API.
pub trait ShortcutMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The spatial subsampling factor.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_output_resolution(input_resolution, self.stride())
    }
}

/// [`Shortcut`] Config.
#[derive(Config, Debug)]
pub struct ShortcutConfig {
    /// The hypercomplex algebra dimension of a projection.
    pub n: usize,

    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The spatial subsampling factor.
    #[config(default = 1)]
    pub stride: usize,

    /// Policy used when the shape changes.
    #[config(default = "ShortcutMode::Projection")]
    pub mode: ShortcutMode,
}

impl ShortcutMeta for ShortcutConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ShortcutConfig {
    /// Is this shortcut a bare passthrough?
    pub fn is_identity(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }

    /// The policy that will actually be applied; `None` for identity.
    pub fn effective_mode(&self) -> Option<ShortcutMode> {
        if self.is_identity() {
            None
        } else {
            Some(self.mode)
        }
    }

    fn projection_config(&self) -> PhConvNorm2dConfig {
        PhConv2dConfig::new(self.n, [self.in_channels, self.out_channels], 1)
            .with_stride(self.stride)
            .into()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        check_stride(self.stride)?;
        match self.effective_mode() {
            None => Ok(()),
            Some(ShortcutMode::IdentityPad) => {
                if self.out_channels < self.in_channels {
                    bail!(
                        "identity_pad shortcut cannot shrink channels: in_channels({}) > out_channels({})",
                        self.in_channels,
                        self.out_channels
                    );
                }
                Ok(())
            }
            Some(ShortcutMode::Projection) => self.projection_config().conv.try_validate(),
        }
    }

    /// Initialize a [`Shortcut`], or report a configuration error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<Shortcut<B>> {
        self.try_validate()?;

        Ok(match self.effective_mode() {
            None => IdentityShortcut {
                channels: self.in_channels,
            }
            .into(),
            Some(ShortcutMode::IdentityPad) => {
                let pad = self.out_channels - self.in_channels;
                PadShortcut {
                    in_channels: self.in_channels,
                    stride: self.stride,
                    pad_front: pad / 2,
                    pad_back: pad - pad / 2,
                }
                .into()
            }
            Some(ShortcutMode::Projection) => ProjectionShortcut {
                conv_norm: self.projection_config().try_init(device)?,
            }
            .into(),
        })
    }

    /// Initialize a [`Shortcut`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Shortcut<B> {
        self.try_init(device).unwrap_or_else(|err| panic!("{err}"))
    }
}

/// Passthrough shortcut.
#[derive(Module, Clone, Debug)]
pub struct IdentityShortcut {
    /// Channels in and out.
    pub channels: usize,
}

/// Parameter-free shortcut: strided subsampling, then symmetric zero channel padding.
#[derive(Module, Clone, Debug)]
pub struct PadShortcut {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// Keep every `stride`-th row and column.
    pub stride: usize,

    /// Zero channels prepended.
    pub pad_front: usize,

    /// Zero channels appended.
    pub pad_back: usize,
}

impl PadShortcut {
    /// Forward pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, _, height, width] = input.dims();
        let device = input.device();

        let x = if self.stride == 1 {
            input
        } else {
            let rows = Tensor::<B, 1, Int>::arange_step(0..height as i64, self.stride, &device);
            let cols = Tensor::<B, 1, Int>::arange_step(0..width as i64, self.stride, &device);
            input.select(2, rows).select(3, cols)
        };

        if self.pad_front == 0 && self.pad_back == 0 {
            return x;
        }

        let [_, _, out_height, out_width] = x.dims();
        let zeros =
            |channels: usize| Tensor::<B, 4>::zeros([batch, channels, out_height, out_width], &device);

        let mut parts = Vec::with_capacity(3);
        if self.pad_front > 0 {
            parts.push(zeros(self.pad_front));
        }
        parts.push(x);
        if self.pad_back > 0 {
            parts.push(zeros(self.pad_back));
        }
        Tensor::cat(parts, 1)
    }
}

/// Learned 1x1 projection shortcut.
#[derive(Module, Debug)]
pub struct ProjectionShortcut<B: Backend> {
    /// Embedded 1x1 conv/norm.
    pub conv_norm: PhConvNorm2d<B>,
}

/// A resolved residual shortcut.
#[derive(Module, Debug)]
pub enum Shortcut<B: Backend> {
    /// Passthrough.
    Identity(IdentityShortcut),

    /// Subsample and zero-pad.
    Pad(PadShortcut),

    /// 1x1 conv + norm.
    Projection(ProjectionShortcut<B>),
}

impl<B: Backend> From<IdentityShortcut> for Shortcut<B> {
    fn from(shortcut: IdentityShortcut) -> Self {
        Self::Identity(shortcut)
    }
}

impl<B: Backend> From<PadShortcut> for Shortcut<B> {
    fn from(shortcut: PadShortcut) -> Self {
        Self::Pad(shortcut)
    }
}

impl<B: Backend> From<ProjectionShortcut<B>> for Shortcut<B> {
    fn from(shortcut: ProjectionShortcut<B>) -> Self {
        Self::Projection(shortcut)
    }
}

impl<B: Backend> ShortcutMeta for Shortcut<B> {
    fn in_channels(&self) -> usize {
        match self {
            Self::Identity(shortcut) => shortcut.channels,
            Self::Pad(shortcut) => shortcut.in_channels,
            Self::Projection(shortcut) => shortcut.conv_norm.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Identity(shortcut) => shortcut.channels,
            Self::Pad(shortcut) => shortcut.in_channels + shortcut.pad_front + shortcut.pad_back,
            Self::Projection(shortcut) => shortcut.conv_norm.out_channels(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Identity(_) => 1,
            Self::Pad(shortcut) => shortcut.stride,
            Self::Projection(shortcut) => shortcut.conv_norm.stride(),
        }
    }
}

impl<B: Backend> Shortcut<B> {
    /// The applied policy; `None` for identity.
    pub fn mode(&self) -> Option<ShortcutMode> {
        match self {
            Self::Identity(_) => None,
            Self::Pad(_) => Some(ShortcutMode::IdentityPad),
            Self::Projection(_) => Some(ShortcutMode::Projection),
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, ceil(in_height/stride), ceil(in_width/stride)]``
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

        let x = match self {
            Self::Identity(_) => input,
            Self::Pad(shortcut) => shortcut.forward(input),
            Self::Projection(shortcut) => shortcut.conv_norm.forward(input),
        };

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
