//! # `PhcResNet` Stage
//!
//! A [`Stage`] is a sequence of [`PhcBasicBlock`]s sharing one output width.
//! Only the first block may change the channel count or apply a stride.
//!
//! [`StageMeta`] defines a common meta API for [`Stage`] and [`StageConfig`].

use crate::models::phc_resnet::basic_block::{
    PhcBasicBlock, PhcBasicBlockConfig, PhcBasicBlockMeta,
};
use crate::models::phc_resnet::shortcut::ShortcutMode;
use crate::models::phc_resnet::util::stride_output_resolution;
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// Block settings shared by every block of a network.
#[derive(Config, Debug)]
pub struct BlockOptions {
    /// The hypercomplex algebra dimension, ``n``.
    pub n: usize,

    /// Block expansion factor.
    #[config(default = 1)]
    pub expansion_factor: usize,

    /// Shortcut policy when a block changes shape.
    #[config(default = "ShortcutMode::Projection")]
    pub shortcut: ShortcutMode,

    /// Enable the zero-initialized residual gate.
    #[config(default = false)]
    pub rezero: bool,
}

impl BlockOptions {
    /// Build a block config with these options.
    pub fn block(
        &self,
        in_planes: usize,
        planes: usize,
        stride: usize,
    ) -> PhcBasicBlockConfig {
        PhcBasicBlockConfig::new(self.n, in_planes, planes)
            .with_expansion_factor(self.expansion_factor)
            .with_stride(stride)
            .with_shortcut(self.shortcut)
            .with_rezero(self.rezero)
    }
}

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the stage.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_output_resolution(input_resolution, self.stride())
    }
}

/// [`Stage`] Configuration.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// The component blocks.
    pub blocks: Vec<PhcBasicBlockConfig>,
}

impl From<Vec<PhcBasicBlockConfig>> for StageConfig {
    fn from(blocks: Vec<PhcBasicBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl StageMeta for StageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl StageConfig {
    /// Build a stage config.
    ///
    /// The first block maps `in_planes` to `planes * expansion_factor` with `stride`;
    /// the rest keep that width with stride 1. The next stage should start from
    /// `out_planes()`.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        options: &BlockOptions,
    ) -> Self {
        let out_planes = planes * options.expansion_factor;
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    options.block(in_planes, planes, stride)
                } else {
                    options.block(out_planes, planes, 1)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.is_empty() {
            bail!("stage has no blocks");
        }

        for (idx, block) in self.blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| err.context(format!("stage block[{idx}]")))?;

            if idx == 0 {
                continue;
            }
            if block.stride() != 1 || block.in_planes() != block.out_planes() {
                bail!(
                    "only the first block of a stage may change shape: block[{}] maps {} -> {} planes with stride {}",
                    idx,
                    block.in_planes(),
                    block.out_planes(),
                    block.stride(),
                );
            }
            let prev = &self.blocks[idx - 1];
            if prev.out_planes() != block.in_planes() {
                bail!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    block.in_planes(),
                );
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err:#}");
        }
    }

    /// Initialize a new [`Stage`], or report a configuration error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<Stage<B>> {
        self.try_validate()?;

        tracing::debug!(
            blocks = self.len(),
            in_planes = self.in_planes(),
            out_planes = self.out_planes(),
            stride = self.stride(),
            "init Stage"
        );

        Ok(Stage {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.try_init(device))
                .collect::<anyhow::Result<_>>()?,
        })
    }

    /// Initialize a new [`Stage`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stage<B> {
        self.try_init(device)
            .unwrap_or_else(|err| panic!("{err:#}"))
    }
}

/// A sequence of residual blocks.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<PhcBasicBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, ceil(in_height/stride), ceil(in_width/stride)]``
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}
