#![warn(missing_docs)]
//!# phc-resnet - Parameterized Hypercomplex ResNets for Burn
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable hypercomplex layers.
//!   * [`layers::phconv`] - ``PHConv2d``, Kronecker-factored convolution.
//!   * [`layers::conv_norm`] - ``PHConv2d + BatchNorm2d`` block.
//!   * [`layers::init`] - role-based parameter initialization.
//! * [`models`] - complete model families.
//!   * [`models::phc_resnet`] - `PhcResNet`, with named depth pre-fabs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use phc_resnet::models::phc_resnet::{PhcResNetArgs, phcresnet20};
//!
//! type B = NdArray<f32>;
//! let device = Default::default();
//!
//! let model = phcresnet20::<B>(&PhcResNetArgs::new(), &device).unwrap();
//! let logits = model.forward(Tensor::zeros([2, 4, 32, 32], &device));
//! assert_eq!(logits.dims(), [2, 10]);
//! ```

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod layers;
pub mod models;
