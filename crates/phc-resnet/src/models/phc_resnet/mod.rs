//! # `PhcResNet`
//!
//! CIFAR-style residual networks built from parameterized hypercomplex
//! convolutions ([`crate::layers::phconv::PhConv2d`]).
//!
//! * [`shortcut`] - residual shortcut policies.
//! * [`basic_block`] - the residual unit, with an optional `ReZero` gate.
//! * [`stage`] - sequences of blocks.
//! * [`model`] - the full network.
//! * [`prefabs`] - named depth constructors.

pub mod basic_block;
pub mod model;
pub mod prefabs;
pub mod shortcut;
pub mod stage;
pub mod util;

pub use model::{ChannelSchedule, PhcResNet, PhcResNetConfig};
pub use prefabs::*;
pub use shortcut::ShortcutMode;
