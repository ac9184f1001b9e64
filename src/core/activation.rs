#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::prng::Prng;

/// Per-node nonlinearity. Hidden nodes carry one each; input and output nodes
/// keep the default and never apply it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Activation {
    #[default]
    LeakyRelu,
    Relu,
    Sigmoid,
    Tanh,
    Swish,
    Elu,
}

/// Negative-side slope of the leaky rectifier.
pub const LEAKY_SLOPE: f32 = 0.01;
/// Scale of the exponential-linear branch.
pub const ELU_ALPHA: f32 = 0.1;

impl Activation {
    pub const ALL: [Activation; 6] = [
        Activation::LeakyRelu,
        Activation::Relu,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Swish,
        Activation::Elu,
    ];

    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Swish => x * sigmoid(x),
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    ELU_ALPHA * (x.exp() - 1.0)
                }
            }
        }
    }

    /// Gate used by the trainer for every variant: 1 for positive pre-activation.
    #[inline]
    pub fn gate(pre_activation: f32) -> f32 {
        if pre_activation > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    /// Pick a variant different from `self`.
    pub fn mutate(self, rng: &mut Prng) -> Activation {
        let others: Vec<Activation> = Self::ALL.into_iter().filter(|a| *a != self).collect();
        rng.choose(&others).copied().unwrap_or(self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::LeakyRelu => "leaky_relu",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Swish => "swish",
            Activation::Elu => "elu",
        }
    }

    /// Stable one-byte tag used by the binary image.
    pub(crate) fn tag(self) -> u8 {
        match self {
            Activation::LeakyRelu => 0,
            Activation::Relu => 1,
            Activation::Sigmoid => 2,
            Activation::Tanh => 3,
            Activation::Swish => 4,
            Activation::Elu => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Activation> {
        Self::ALL.into_iter().find(|a| a.tag() == tag)
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
