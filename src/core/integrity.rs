#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::network::Network;
use crate::topology::{random_weight, NEUTRAL_CONFIDENCE};

/// Weights beyond this magnitude are pulled back to [`WEIGHT_RESET`].
pub const WEIGHT_LIMIT: f32 = 10.0;
pub const WEIGHT_RESET: f32 = 5.0;
/// Biases beyond this magnitude are pulled back to [`BIAS_RESET`].
pub const BIAS_LIMIT: f32 = 5.0;
pub const BIAS_RESET: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Repair {
    NodeValue { layer: usize, node: usize },
    NodeConfidence { layer: usize, node: usize },
    Weight { layer: usize, from: usize, to: usize },
    WeightClamped { layer: usize, from: usize, to: usize, was: f32 },
    ConnectionConfidence { layer: usize, from: usize, to: usize },
    Bias { layer: usize, node: usize },
    BiasClamped { layer: usize, node: usize, was: f32 },
}

/// Result of one integrity scan. Empty means no issues.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntegrityReport {
    pub repairs: Vec<Repair>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.repairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty()
    }
}

impl Network {
    /// Replace non-finite state with safe defaults and clamp runaway
    /// magnitudes. Never fails; every repair is logged and reported.
    pub fn verify_integrity(&mut self) -> IntegrityReport {
        self.ensure_shapes();
        let mut repairs = Vec::new();

        for (l, layer) in self.layers.iter_mut().enumerate() {
            for n in 0..layer.len() {
                if !layer.values[n].is_finite() || !layer.pre_activation[n].is_finite() {
                    layer.values[n] = 0.0;
                    layer.pre_activation[n] = 0.0;
                    layer.active[n] = false;
                    repairs.push(Repair::NodeValue { layer: l, node: n });
                }
                if !layer.confidence[n].is_finite() {
                    layer.confidence[n] = NEUTRAL_CONFIDENCE;
                    repairs.push(Repair::NodeConfidence { layer: l, node: n });
                }
            }
        }

        for (l, conn) in self.connections.iter_mut().enumerate() {
            for (i, row) in conn.weights.iter_mut().enumerate() {
                for (j, w) in row.iter_mut().enumerate() {
                    if !w.is_finite() {
                        *w = random_weight(&mut self.rng);
                        conn.confidence[i][j] = NEUTRAL_CONFIDENCE;
                        repairs.push(Repair::Weight { layer: l, from: i, to: j });
                    } else if w.abs() > WEIGHT_LIMIT {
                        repairs.push(Repair::WeightClamped {
                            layer: l,
                            from: i,
                            to: j,
                            was: *w,
                        });
                        *w = WEIGHT_RESET.copysign(*w);
                    }
                }
            }

            for (i, row) in conn.confidence.iter_mut().enumerate() {
                for (j, c) in row.iter_mut().enumerate() {
                    if !c.is_finite() {
                        *c = NEUTRAL_CONFIDENCE;
                        repairs.push(Repair::ConnectionConfidence { layer: l, from: i, to: j });
                    }
                }
            }

            for (j, b) in conn.biases.iter_mut().enumerate() {
                if !b.is_finite() {
                    *b = 0.0;
                    let node = self.layers.get_mut(l + 1).and_then(|d| d.confidence.get_mut(j));
                    if let Some(c) = node {
                        *c = NEUTRAL_CONFIDENCE;
                    }
                    repairs.push(Repair::Bias { layer: l, node: j });
                } else if b.abs() > BIAS_LIMIT {
                    repairs.push(Repair::BiasClamped {
                        layer: l,
                        node: j,
                        was: *b,
                    });
                    *b = BIAS_RESET.copysign(*b);
                }
            }
        }

        for repair in &repairs {
            warn!(?repair, "integrity repair");
        }
        self.stats.integrity_repairs += repairs.len() as u64;
        IntegrityReport { repairs }
    }
}
