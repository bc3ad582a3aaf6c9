//! # Layer Roles
//!
//! Parameter initialization is chosen by the role a layer plays in a network,
//! not by the concrete type of the layer.

use burn::nn::Initializer;
use serde::{Deserialize, Serialize};

/// Gain used by ``kaiming_normal`` for layers feeding a ReLU.
pub const RELU_GAIN: f64 = std::f64::consts::SQRT_2;

/// The structural role of a parameterized layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerRole {
    /// A hypercomplex convolution; stem, residual branch, or projection shortcut.
    Convolutional,

    /// The final linear projection onto class logits.
    ClassifierHead,
}

impl LayerRole {
    /// The weight [`Initializer`] for layers in this role.
    pub fn initializer(&self) -> Initializer {
        match self {
            LayerRole::Convolutional => Initializer::XavierUniform { gain: 1.0 },
            LayerRole::ClassifierHead => Initializer::KaimingNormal {
                gain: RELU_GAIN,
                fan_out_only: false,
            },
        }
    }
}
