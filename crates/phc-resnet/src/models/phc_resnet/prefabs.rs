//! # `PhcResNet` Pre-Fabs
//!
//! Well-known depths of the CIFAR `ResNet` family, ``depth = 6k + 2``,
//! with ``k`` blocks in each of the three stages:
//!
//! | depth | k   |
//! |-------|-----|
//! | 20    | 3   |
//! | 32    | 5   |
//! | 44    | 7   |
//! | 56    | 9   |
//! | 110   | 18  |
//! | 1202  | 200 |
//!
//! Each depth is available with the [`ChannelSchedule::Standard`] and the
//! [`ChannelSchedule::Large`] width schedule.

use crate::models::phc_resnet::model::{ChannelSchedule, PhcResNet, PhcResNetConfig};
use anyhow::{Context, bail};
use burn::config::Config;
use burn::prelude::Backend;

/// Pass-through construction arguments shared by every pre-fab.
#[derive(Config, Debug)]
pub struct PhcResNetArgs {
    /// Input image channels.
    #[config(default = 4)]
    pub channels: usize,

    /// The hypercomplex algebra dimension, ``n``.
    #[config(default = 4)]
    pub n: usize,

    /// Number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,

    /// Enable the zero-initialized residual gate.
    #[config(default = false)]
    pub rezero: bool,
}

impl PhcResNetArgs {
    /// Combine with a block schedule and a width schedule.
    pub fn to_config(
        &self,
        blocks: [usize; 3],
        schedule: ChannelSchedule,
    ) -> PhcResNetConfig {
        PhcResNetConfig::new(blocks)
            .with_in_channels(self.channels)
            .with_n(self.n)
            .with_num_classes(self.num_classes)
            .with_rezero(self.rezero)
            .with_schedule(schedule)
    }
}

/// A named, statically known `PhcResNet` structure.
#[derive(Debug)]
pub struct StaticPhcResNetPreFab {
    /// Name of the pre-fab.
    pub name: &'static str,

    /// Description of the pre-fab.
    pub description: &'static str,

    /// Blocks per stage.
    pub blocks: [usize; 3],

    /// Stage width schedule.
    pub schedule: ChannelSchedule,
}

impl StaticPhcResNetPreFab {
    /// Conventional depth label.
    pub fn depth(&self) -> usize {
        2 + 2 * self.blocks.iter().sum::<usize>()
    }

    /// Build a [`PhcResNetConfig`] for this structure.
    pub fn to_config(
        &self,
        args: &PhcResNetArgs,
    ) -> PhcResNetConfig {
        args.to_config(self.blocks, self.schedule)
    }

    /// Initialize a [`PhcResNet`] for this structure.
    pub fn try_init<B: Backend>(
        &self,
        args: &PhcResNetArgs,
        device: &B::Device,
    ) -> anyhow::Result<PhcResNet<B>> {
        self.to_config(args)
            .try_init(device)
            .with_context(|| self.name)
    }
}

/// `PhcResNet20`.
pub static PHCRESNET20: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet20",
    description: "PhcResNet-20, 16/32/64 widths",
    blocks: [3, 3, 3],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet20`, large widths.
pub static PHCRESNET20_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet20large",
    description: "PhcResNet-20, 24/72/216 widths",
    blocks: [3, 3, 3],
    schedule: ChannelSchedule::Large,
};

/// `PhcResNet32`.
pub static PHCRESNET32: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet32",
    description: "PhcResNet-32, 16/32/64 widths",
    blocks: [5, 5, 5],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet32`, large widths.
pub static PHCRESNET32_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet32large",
    description: "PhcResNet-32, 24/72/216 widths",
    blocks: [5, 5, 5],
    schedule: ChannelSchedule::Large,
};

/// `PhcResNet44`.
pub static PHCRESNET44: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet44",
    description: "PhcResNet-44, 16/32/64 widths",
    blocks: [7, 7, 7],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet44`, large widths.
pub static PHCRESNET44_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet44large",
    description: "PhcResNet-44, 24/72/216 widths",
    blocks: [7, 7, 7],
    schedule: ChannelSchedule::Large,
};

/// `PhcResNet56`.
pub static PHCRESNET56: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet56",
    description: "PhcResNet-56, 16/32/64 widths",
    blocks: [9, 9, 9],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet56`, large widths.
pub static PHCRESNET56_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet56large",
    description: "PhcResNet-56, 24/72/216 widths",
    blocks: [9, 9, 9],
    schedule: ChannelSchedule::Large,
};

/// `PhcResNet110`.
pub static PHCRESNET110: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet110",
    description: "PhcResNet-110, 16/32/64 widths",
    blocks: [18, 18, 18],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet110`, large widths.
pub static PHCRESNET110_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet110large",
    description: "PhcResNet-110, 24/72/216 widths",
    blocks: [18, 18, 18],
    schedule: ChannelSchedule::Large,
};

/// `PhcResNet1202`.
pub static PHCRESNET1202: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet1202",
    description: "PhcResNet-1202, 16/32/64 widths",
    blocks: [200, 200, 200],
    schedule: ChannelSchedule::Standard,
};

/// `PhcResNet1202`, large widths.
pub static PHCRESNET1202_LARGE: StaticPhcResNetPreFab = StaticPhcResNetPreFab {
    name: "phcresnet1202large",
    description: "PhcResNet-1202, 24/72/216 widths",
    blocks: [200, 200, 200],
    schedule: ChannelSchedule::Large,
};

/// All known pre-fabs.
pub static PHC_RESNET_PREFABS: &[&StaticPhcResNetPreFab] = &[
    &PHCRESNET20,
    &PHCRESNET20_LARGE,
    &PHCRESNET32,
    &PHCRESNET32_LARGE,
    &PHCRESNET44,
    &PHCRESNET44_LARGE,
    &PHCRESNET56,
    &PHCRESNET56_LARGE,
    &PHCRESNET110,
    &PHCRESNET110_LARGE,
    &PHCRESNET1202,
    &PHCRESNET1202_LARGE,
];

/// Look up a pre-fab by name.
pub fn prefab(name: &str) -> Option<&'static StaticPhcResNetPreFab> {
    PHC_RESNET_PREFABS
        .iter()
        .copied()
        .find(|prefab| prefab.name == name)
}

/// Solve ``depth = 6k + 2`` for the per-stage block schedule ``[k, k, k]``.
pub fn blocks_for_depth(depth: usize) -> anyhow::Result<[usize; 3]> {
    if depth < 8 || (depth - 2) % 6 != 0 {
        bail!("depth {depth} is not of the form 6k + 2 with k >= 1");
    }
    let k = (depth - 2) / 6;
    Ok([k, k, k])
}

/// Build a [`PhcResNetConfig`] for any ``6k + 2`` depth.
pub fn config_for_depth(
    depth: usize,
    schedule: ChannelSchedule,
    args: &PhcResNetArgs,
) -> anyhow::Result<PhcResNetConfig> {
    Ok(args.to_config(blocks_for_depth(depth)?, schedule))
}

/// `PhcResNet20`, ``[3, 3, 3]`` blocks.
pub fn phcresnet20<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET20.try_init(args, device)
}

/// `PhcResNet20`, ``[3, 3, 3]`` blocks, large widths.
pub fn phcresnet20large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET20_LARGE.try_init(args, device)
}

/// `PhcResNet32`, ``[5, 5, 5]`` blocks.
pub fn phcresnet32<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET32.try_init(args, device)
}

/// `PhcResNet32`, ``[5, 5, 5]`` blocks, large widths.
pub fn phcresnet32large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET32_LARGE.try_init(args, device)
}

/// `PhcResNet44`, ``[7, 7, 7]`` blocks.
pub fn phcresnet44<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET44.try_init(args, device)
}

/// `PhcResNet44`, ``[7, 7, 7]`` blocks, large widths.
pub fn phcresnet44large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET44_LARGE.try_init(args, device)
}

/// `PhcResNet56`, ``[9, 9, 9]`` blocks.
pub fn phcresnet56<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET56.try_init(args, device)
}

/// `PhcResNet56`, ``[9, 9, 9]`` blocks, large widths.
pub fn phcresnet56large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET56_LARGE.try_init(args, device)
}

/// `PhcResNet110`, ``[18, 18, 18]`` blocks.
pub fn phcresnet110<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET110.try_init(args, device)
}

/// `PhcResNet110`, ``[18, 18, 18]`` blocks, large widths.
pub fn phcresnet110large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET110_LARGE.try_init(args, device)
}

/// `PhcResNet1202`, ``[200, 200, 200]`` blocks.
pub fn phcresnet1202<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET1202.try_init(args, device)
}

/// `PhcResNet1202`, ``[200, 200, 200]`` blocks, large widths.
pub fn phcresnet1202large<B: Backend>(
    args: &PhcResNetArgs,
    device: &B::Device,
) -> anyhow::Result<PhcResNet<B>> {
    PHCRESNET1202_LARGE.try_init(args, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::phc_resnet::shortcut::ShortcutMode;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor};
    use std::collections::HashSet;

    #[test]
    fn test_prefab_depths() {
        let expected = [
            (20, 3),
            (32, 5),
            (44, 7),
            (56, 9),
            (110, 18),
            (1202, 200),
        ];
        assert_eq!(PHC_RESNET_PREFABS.len(), 2 * expected.len());

        for (depth, k) in expected {
            for suffix in ["", "large"] {
                let name = format!("phcresnet{depth}{suffix}");
                let prefab = prefab(&name).unwrap();
                assert_eq!(prefab.blocks, [k, k, k]);
                assert_eq!(prefab.depth(), depth);
                assert_eq!(6 * k + 2, depth);
            }
        }

        assert_eq!(6 * PHCRESNET110.blocks[0] + 2, 110);
        assert_eq!(6 * PHCRESNET1202.blocks[0] + 2, 1202);

        let names: HashSet<_> = PHC_RESNET_PREFABS.iter().map(|p| p.name).collect();
        assert_eq!(names.len(), PHC_RESNET_PREFABS.len());
        assert!(prefab("resnet18").is_none());
    }

    #[test]
    fn test_prefab_schedules() {
        for prefab in PHC_RESNET_PREFABS {
            let expected = if prefab.name.ends_with("large") {
                ChannelSchedule::Large
            } else {
                ChannelSchedule::Standard
            };
            assert_eq!(prefab.schedule, expected);
        }
    }

    #[test]
    fn test_prefab_to_config() {
        let args = PhcResNetArgs::new()
            .with_channels(8)
            .with_n(2)
            .with_num_classes(100)
            .with_rezero(true);
        let config = PHCRESNET56_LARGE.to_config(&args);

        assert_eq!(config.blocks, [9, 9, 9]);
        assert_eq!(config.in_channels, 8);
        assert_eq!(config.n, 2);
        assert_eq!(config.num_classes, 100);
        assert!(config.rezero);
        assert_eq!(config.schedule, ChannelSchedule::Large);
        assert_eq!(config.shortcut, ShortcutMode::Projection);
        assert_eq!(config.depth(), 56);
        config.expect_valid();

        // the deepest variant is structurally valid without being built.
        PHCRESNET1202.to_config(&PhcResNetArgs::new()).expect_valid();
    }

    #[test]
    fn test_blocks_for_depth() {
        assert_eq!(blocks_for_depth(20).unwrap(), [3, 3, 3]);
        assert_eq!(blocks_for_depth(110).unwrap(), [18, 18, 18]);
        assert_eq!(blocks_for_depth(1202).unwrap(), [200, 200, 200]);
        assert_eq!(blocks_for_depth(8).unwrap(), [1, 1, 1]);

        assert!(blocks_for_depth(2).is_err());
        assert!(blocks_for_depth(21).is_err());
        assert_eq!(
            blocks_for_depth(51).unwrap_err().to_string(),
            "depth 51 is not of the form 6k + 2 with k >= 1"
        );

        let config =
            config_for_depth(38, ChannelSchedule::Large, &PhcResNetArgs::new()).unwrap();
        assert_eq!(config.blocks, [6, 6, 6]);
        assert_eq!(config.schedule, ChannelSchedule::Large);
    }

    #[test]
    fn test_phcresnet20_end_to_end() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: PhcResNet<B> = phcresnet20(&PhcResNetArgs::new(), &device).unwrap();
        assert_eq!(model.blocks(), [3, 3, 3]);
        assert_eq!(model.stage_widths(), [16, 32, 64]);

        let input = Tensor::random([2, 4, 32, 32], Distribution::Default, &device);
        let output = model.forward(input);
        assert_shape_contract!(
            ["batch", "num_classes"],
            &output,
            &[("batch", 2), ("num_classes", 10)]
        );
    }

    #[test]
    fn test_phcresnet20large_end_to_end() {
        type B = NdArray<f32>;
        let device = Default::default();

        let args = PhcResNetArgs::new().with_channels(3).with_n(3).with_rezero(true);
        let model: PhcResNet<B> = phcresnet20large(&args, &device).unwrap();
        assert_eq!(model.stage_widths(), [24, 72, 216]);
        assert_eq!(model.algebra_dim(), 3);

        let input = Tensor::random([1, 3, 16, 16], Distribution::Default, &device);
        let output = model.forward(input);
        assert_shape_contract!(
            ["batch", "num_classes"],
            &output,
            &[("batch", 1), ("num_classes", 10)]
        );
    }

    #[test]
    fn test_phcresnet_factory_error() {
        type B = NdArray<f32>;
        let device = Default::default();

        // 16 is not divisible by 3.
        let args = PhcResNetArgs::new().with_channels(3).with_n(3);
        let err = phcresnet32::<B>(&args, &device).unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "phcresnet32: stem: out_channels(16) is not divisible by algebra dimension n(3)"
        );
    }
}
