//! # `PhcResNet` Core Model
//!
//! A CIFAR-style `ResNet` built from hypercomplex convolutions:
//!
//! ```text
//! stem:   relu(norm(phconv3x3(x)))         -> [B, w0, H, W]
//! layer1: Stage(w0, stride 1)               -> [B, w0, H, W]
//! layer2: Stage(w1, stride 2)               -> [B, w1, H/2, W/2]
//! layer3: Stage(w2, stride 2)               -> [B, w2, H/4, W/4]
//! head:   linear(flatten(global_avg_pool))  -> [B, num_classes]
//! ```
//!
//! The widths ``[w0, w1, w2]`` come from a [`ChannelSchedule`].

use crate::layers::conv_norm::{PhConvNorm2d, PhConvNorm2dConfig};
use crate::layers::init::LayerRole;
use crate::layers::phconv::{PhConv2dConfig, PhConv2dMeta};
use crate::models::phc_resnet::shortcut::ShortcutMode;
use crate::models::phc_resnet::stage::{BlockOptions, Stage, StageConfig, StageMeta};
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Per-stage strides.
pub const STAGE_STRIDES: [usize; 3] = [1, 2, 2];

/// Channel width schedule of the three stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSchedule {
    /// ``16 -> 32 -> 64``.
    #[default]
    Standard,

    /// ``24 -> 72 -> 216``.
    Large,
}

impl ChannelSchedule {
    /// Stage widths; the stem emits the first.
    pub fn widths(&self) -> [usize; 3] {
        match self {
            ChannelSchedule::Standard => [16, 32, 64],
            ChannelSchedule::Large => [24, 72, 216],
        }
    }

    /// Stem output width.
    pub fn stem_width(&self) -> usize {
        self.widths()[0]
    }
}

/// [`PhcResNet`] configuration.
#[derive(Config, Debug)]
pub struct PhcResNetConfig {
    /// Number of blocks in each stage.
    pub blocks: [usize; 3],

    /// Input image channels.
    #[config(default = 4)]
    pub in_channels: usize,

    /// The hypercomplex algebra dimension, ``n``.
    #[config(default = 4)]
    pub n: usize,

    /// Number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,

    /// Enable the zero-initialized residual gate in every block.
    #[config(default = false)]
    pub rezero: bool,

    /// Stage width schedule.
    #[config(default = "ChannelSchedule::Standard")]
    pub schedule: ChannelSchedule,

    /// Shortcut policy for blocks that change shape.
    #[config(default = "ShortcutMode::Projection")]
    pub shortcut: ShortcutMode,
}

impl PhcResNetConfig {
    /// Conventional depth label: ``2 + 2 * total_blocks``.
    pub fn depth(&self) -> usize {
        2 + 2 * self.blocks.iter().sum::<usize>()
    }

    /// Block settings shared by all stages.
    pub fn block_options(&self) -> BlockOptions {
        BlockOptions::new(self.n)
            .with_shortcut(self.shortcut)
            .with_rezero(self.rezero)
    }

    /// The stem conv/norm config.
    pub fn stem_config(&self) -> PhConvNorm2dConfig {
        PhConv2dConfig::new(self.n, [self.in_channels, self.schedule.stem_width()], 3)
            .with_padding(1)
            .into()
    }

    /// The three stage configs.
    ///
    /// The running input width starts at the stem width and is threaded
    /// from each stage's `out_planes()` into the next.
    pub fn stage_configs(&self) -> [StageConfig; 3] {
        let options = self.block_options();
        let widths = self.schedule.widths();

        let mut in_planes = self.schedule.stem_width();
        [0, 1, 2].map(|idx| {
            let stage = StageConfig::build(
                self.blocks[idx],
                in_planes,
                widths[idx],
                STAGE_STRIDES[idx],
                &options,
            );
            in_planes = widths[idx] * options.expansion_factor;
            stage
        })
    }

    /// Width of the classifier head input.
    pub fn head_width(&self) -> usize {
        self.schedule.widths()[2] * self.block_options().expansion_factor
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.in_channels == 0 {
            bail!("in_channels must be >= 1");
        }
        if self.num_classes == 0 {
            bail!("num_classes must be >= 1");
        }
        self.stem_config()
            .conv
            .try_validate()
            .map_err(|err| err.context("stem"))?;
        for (idx, stage) in self.stage_configs().iter().enumerate() {
            stage
                .try_validate()
                .map_err(|err| err.context(format!("layer{}", idx + 1)))?;
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err:#}");
        }
    }

    fn init_head<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Linear<B> {
        let width = self.head_width();
        let mut fc = LinearConfig::new(width, self.num_classes)
            .with_initializer(LayerRole::ClassifierHead.initializer())
            .init(device);

        // The role initializer covers the weight only.
        let bound = 1.0 / (width as f64).sqrt();
        fc.bias = fc.bias.map(|_| {
            Initializer::Uniform {
                min: -bound,
                max: bound,
            }
            .init([self.num_classes], device)
        });
        fc
    }

    /// Initialize a [`PhcResNet`], or report a configuration error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<PhcResNet<B>> {
        self.try_validate()?;

        tracing::debug!(
            depth = self.depth(),
            blocks = ?self.blocks,
            in_channels = self.in_channels,
            n = self.n,
            num_classes = self.num_classes,
            schedule = ?self.schedule,
            shortcut = %self.shortcut,
            rezero = self.rezero,
            "init PhcResNet"
        );

        let [layer1, layer2, layer3] = self.stage_configs();

        Ok(PhcResNet {
            stem: self.stem_config().try_init(device)?,
            act: Relu,
            layer1: layer1.try_init(device)?,
            layer2: layer2.try_init(device)?,
            layer3: layer3.try_init(device)?,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: self.init_head(device),
        })
    }

    /// Initialize a [`PhcResNet`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PhcResNet<B> {
        self.try_init(device)
            .unwrap_or_else(|err| panic!("{err:#}"))
    }
}

/// `PhcResNet` model.
#[derive(Module, Debug)]
pub struct PhcResNet<B: Backend> {
    /// Stem conv/norm.
    pub stem: PhConvNorm2d<B>,

    /// Activation.
    pub act: Relu,

    /// Stage 1, stride 1.
    pub layer1: Stage<B>,

    /// Stage 2, stride 2.
    pub layer2: Stage<B>,

    /// Stage 3, stride 2.
    pub layer3: Stage<B>,

    /// Global average pool.
    pub avgpool: AdaptiveAvgPool2d,

    /// Classifier head.
    pub fc: Linear<B>,
}

impl<B: Backend> PhcResNet<B> {
    /// Input image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// The hypercomplex algebra dimension, ``n``.
    pub fn algebra_dim(&self) -> usize {
        self.stem.algebra_dim()
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// The three stages, in order.
    pub fn stages(&self) -> [&Stage<B>; 3] {
        [&self.layer1, &self.layer2, &self.layer3]
    }

    /// Output width of each stage.
    pub fn stage_widths(&self) -> [usize; 3] {
        self.stages().map(|stage| stage.out_planes())
    }

    /// Number of blocks in each stage.
    pub fn blocks(&self) -> [usize; 3] {
        self.stages().map(|stage| stage.len())
    }

    /// `PhcResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        // Stem
        let x = self.stem.forward(input);
        let x = self.act.forward(x);

        // Residual stages
        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);

        // Head
        let x = self.avgpool.forward(x);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x = x.flatten(1, 3);
        let x = self.fc.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes"],
            &x,
            &[("batch", batch), ("num_classes", self.num_classes())]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::phc_resnet::basic_block::PhcBasicBlockMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, ElementConversion};
    use hamcrest::prelude::*;

    #[test]
    fn test_channel_schedule() {
        assert_eq!(ChannelSchedule::default(), ChannelSchedule::Standard);
        assert_eq!(ChannelSchedule::Standard.widths(), [16, 32, 64]);
        assert_eq!(ChannelSchedule::Large.widths(), [24, 72, 216]);
        assert_eq!(ChannelSchedule::Large.stem_width(), 24);
    }

    #[test]
    fn test_config_defaults() {
        let config = PhcResNetConfig::new([3, 3, 3]);
        assert_eq!(config.in_channels, 4);
        assert_eq!(config.n, 4);
        assert_eq!(config.num_classes, 10);
        assert!(!config.rezero);
        assert_eq!(config.schedule, ChannelSchedule::Standard);
        assert_eq!(config.shortcut, ShortcutMode::Projection);
        assert_eq!(config.depth(), 20);
        assert_eq!(config.head_width(), 64);
        config.expect_valid();
    }

    #[test]
    fn test_stage_configs_thread_widths() {
        let config = PhcResNetConfig::new([2, 3, 4]).with_schedule(ChannelSchedule::Large);
        let stages = config.stage_configs();

        assert_eq!(stages.each_ref().map(|s| s.len()), [2, 3, 4]);
        assert_eq!(stages.each_ref().map(|s| s.in_planes()), [24, 24, 72]);
        assert_eq!(stages.each_ref().map(|s| s.out_planes()), [24, 72, 216]);
        assert_eq!(stages.each_ref().map(|s| s.stride()), [1, 2, 2]);
        assert_eq!(config.head_width(), 216);
    }

    #[test]
    fn test_config_errors() {
        let err = PhcResNetConfig::new([3, 3, 3])
            .with_n(3)
            .try_validate()
            .unwrap_err();
        assert_that!(
            format!("{err:#}"),
            equal_to("stem: in_channels(4) is not divisible by algebra dimension n(3)".to_string())
        );

        let err = PhcResNetConfig::new([3, 3, 3])
            .with_in_channels(3)
            .with_n(3)
            .try_validate()
            .unwrap_err();
        assert_that!(
            format!("{err:#}"),
            equal_to("stem: out_channels(16) is not divisible by algebra dimension n(3)".to_string())
        );

        let err = PhcResNetConfig::new([3, 0, 3])
            .try_validate()
            .unwrap_err();
        assert_that!(format!("{err:#}"), equal_to("layer2: stage has no blocks".to_string()));

        assert!(
            PhcResNetConfig::new([3, 3, 3])
                .with_num_classes(0)
                .try_validate()
                .is_err()
        );

        // the large schedule admits n = 3.
        assert!(
            PhcResNetConfig::new([3, 3, 3])
                .with_in_channels(3)
                .with_n(3)
                .with_schedule(ChannelSchedule::Large)
                .try_validate()
                .is_ok()
        );
    }

    #[test]
    fn test_config_save_load() {
        let config = PhcResNetConfig::new([5, 5, 5])
            .with_rezero(true)
            .with_schedule(ChannelSchedule::Large)
            .with_shortcut(ShortcutMode::IdentityPad);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phcresnet32.json");
        config.save(&path).unwrap();

        let loaded = PhcResNetConfig::load(&path).unwrap();
        assert_eq!(loaded.blocks, [5, 5, 5]);
        assert!(loaded.rezero);
        assert_eq!(loaded.schedule, ChannelSchedule::Large);
        assert_eq!(loaded.shortcut, ShortcutMode::IdentityPad);
        assert_eq!(
            serde_json::to_value(&loaded).unwrap(),
            serde_json::to_value(&config).unwrap()
        );
    }

    #[test]
    fn test_phcresnet_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: PhcResNet<B> = PhcResNetConfig::new([1, 1, 1]).init(&device);
        assert_eq!(model.in_channels(), 4);
        assert_eq!(model.algebra_dim(), 4);
        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.blocks(), [1, 1, 1]);
        assert_eq!(model.stage_widths(), [16, 32, 64]);

        let input = Tensor::random([2, 4, 16, 16], Distribution::Default, &device);
        let output = model.forward(input);
        assert_shape_contract!(
            ["batch", "num_classes"],
            &output,
            &[("batch", 2), ("num_classes", 10)]
        );
    }

    #[test]
    fn test_phcresnet_large_rezero_odd_resolution() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: PhcResNet<B> = PhcResNetConfig::new([1, 2, 1])
            .with_schedule(ChannelSchedule::Large)
            .with_shortcut(ShortcutMode::IdentityPad)
            .with_rezero(true)
            .with_num_classes(7)
            .init(&device);
        assert_eq!(model.stage_widths(), [24, 72, 216]);
        for stage in model.stages() {
            for block in &stage.blocks {
                assert!(block.rezero());
                assert_eq!(block.gate_value(), Some(0.0));
            }
        }

        let input = Tensor::random([3, 4, 15, 13], Distribution::Default, &device);
        let output = model.forward(input);
        assert_shape_contract!(
            ["batch", "num_classes"],
            &output,
            &[("batch", 3), ("num_classes", 7)]
        );

        let grads = output.sum().backward();
        assert!(model.fc.weight.grad(&grads).is_some());
        assert!(model.stem.conv.algebra.grad(&grads).is_some());
    }

    #[test]
    fn test_head_initialization() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = PhcResNetConfig::new([1, 1, 1]).with_num_classes(2000);
        let model: PhcResNet<B> = config.init(&device);

        // kaiming normal, fan_in = 64: std = sqrt(2 / 64).
        let expected_std = (2.0f64 / 64.0).sqrt();
        let std = model
            .fc
            .weight
            .val()
            .powf_scalar(2.0)
            .mean()
            .sqrt()
            .into_scalar()
            .elem::<f64>();
        assert!((std - expected_std).abs() < 0.1 * expected_std);

        // bias keeps a small uniform init.
        let bias = model.fc.bias.as_ref().unwrap().val();
        let max = bias.abs().max().into_scalar().elem::<f64>();
        assert!(max <= 1.0 / 8.0);
    }

    #[test]
    fn test_hypercomplex_reduces_parameters() {
        type B = NdArray<f32>;
        let device = Default::default();

        let dense: PhcResNet<B> = PhcResNetConfig::new([3, 3, 3]).with_n(1).init(&device);
        let quaternion: PhcResNet<B> = PhcResNetConfig::new([3, 3, 3]).with_n(4).init(&device);

        assert!(quaternion.num_params() * 3 < dense.num_params());
    }
}
