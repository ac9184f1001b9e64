//! Stage layout, per-transition routing, and shape-validated connection storage.
//!
//! The diamond is fixed: `input → 8 → 16 → 16×4 → 16 → 8 → output`. The general
//! stage builder exists so the contraction fan-in can be exercised on longer
//! chains; the network itself is always built from [`Topology::diamond`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::prng::Prng;

pub const EXPANSION_SIZES: [usize; 2] = [8, 16];
pub const CENTRAL_SIZES: [usize; 4] = [16, 16, 16, 16];
pub const CONTRACTION_SIZES: [usize; 2] = [16, 8];

pub const NEUTRAL_CONFIDENCE: f32 = 0.5;
const WEIGHT_INIT: f32 = 1.0;
const BIAS_INIT: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
    Input,
    Expansion,
    Central,
    Contraction,
    Output,
}

/// How a source layer feeds its destination.
///
/// Chosen once per transition when the topology is built; forward and backward
/// passes branch on this instead of re-deriving layer positions every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Route {
    /// Index-aligned single weight across a stage boundary.
    Bridge,
    /// Sign-dependent Y-fork: `2i` or `2i+1`.
    Expand,
    /// Every source to every destination. With `split`, only index-aligned
    /// pairs carry full weight and the rest carry half.
    Mesh { split: bool },
    /// Pairwise fan-in to `i/2` averaged over the colliding sources, or the
    /// split full mesh when `split` is set.
    Contract { split: bool },
}

/// Factor applied to secondary (non index-aligned) pairs of a split mesh.
pub const SECONDARY_FACTOR: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    stages: Vec<Stage>,
    sizes: Vec<usize>,
}

impl Topology {
    /// The fixed diamond. Only the outer widths are caller-controlled.
    pub fn diamond(input_size: usize, output_size: usize) -> Self {
        Self::from_stages(
            input_size,
            &EXPANSION_SIZES,
            &CENTRAL_SIZES,
            &CONTRACTION_SIZES,
            output_size,
        )
    }

    pub fn from_stages(
        input_size: usize,
        expansion: &[usize],
        central: &[usize],
        contraction: &[usize],
        output_size: usize,
    ) -> Self {
        let mut stages = vec![Stage::Input];
        let mut sizes = vec![input_size.max(1)];
        for (stage, group) in [
            (Stage::Expansion, expansion),
            (Stage::Central, central),
            (Stage::Contraction, contraction),
        ] {
            for &n in group {
                stages.push(stage);
                sizes.push(n.max(1));
            }
        }
        stages.push(Stage::Output);
        sizes.push(output_size.max(1));
        Self { stages, sizes }
    }

    pub fn layer_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn size(&self, layer: usize) -> usize {
        self.sizes[layer]
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn stage(&self, layer: usize) -> Stage {
        self.stages[layer]
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn input_size(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_size(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn total_nodes(&self) -> usize {
        self.sizes.iter().sum()
    }

    fn first_of(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|s| *s == stage)
    }

    fn last_of(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().rposition(|s| *s == stage)
    }

    /// Routing rule for the transition `dst - 1 → dst`.
    pub fn route(&self, dst: usize) -> Route {
        let output = self.layer_count() - 1;
        let is_bridge = dst == output
            || Some(dst) == self.first_of(Stage::Central)
            || Some(dst) == self.first_of(Stage::Contraction);
        if is_bridge {
            return Route::Bridge;
        }
        match self.stages[dst] {
            Stage::Expansion => Route::Expand,
            Stage::Central => Route::Mesh {
                split: Some(dst) == self.last_of(Stage::Central),
            },
            Stage::Contraction => Route::Contract {
                split: Some(dst) == self.last_of(Stage::Contraction),
            },
            Stage::Input | Stage::Output => Route::Bridge,
        }
    }

    /// Allocate every connection with random weights and neutral confidence,
    /// then run the shape validation pass over the result.
    pub fn build_connections(&self, rng: &mut Prng) -> (Vec<Connection>, Vec<ShapeRepair>) {
        let mut connections: Vec<Connection> = (1..self.layer_count())
            .map(|dst| Connection::random(self.size(dst - 1), self.size(dst), self.route(dst), rng))
            .collect();
        let repairs = self.validate(&mut connections, rng);
        (connections, repairs)
    }

    /// Check every matrix against the adjacent layer sizes and reallocate
    /// whatever does not fit. Returns one entry per repair.
    pub fn validate(&self, connections: &mut Vec<Connection>, rng: &mut Prng) -> Vec<ShapeRepair> {
        let mut repairs = Vec::new();
        let expected = self.layer_count() - 1;

        if connections.len() > expected {
            for layer in expected..connections.len() {
                repairs.push(ShapeRepair::ExtraConnection { layer });
            }
            connections.truncate(expected);
        }
        while connections.len() < expected {
            let layer = connections.len();
            repairs.push(ShapeRepair::MissingConnection { layer });
            connections.push(Connection::random(
                self.size(layer),
                self.size(layer + 1),
                self.route(layer + 1),
                rng,
            ));
        }

        for (layer, conn) in connections.iter_mut().enumerate() {
            let rows = self.size(layer);
            let cols = self.size(layer + 1);

            let route = self.route(layer + 1);
            if conn.route != route {
                repairs.push(ShapeRepair::Route { layer });
                conn.route = route;
            }

            if conn.weights.len() != rows {
                repairs.push(ShapeRepair::WeightRows {
                    layer,
                    expected: rows,
                    found: conn.weights.len(),
                });
                conn.weights = random_matrix(rows, cols, rng);
            }
            for (row, w) in conn.weights.iter_mut().enumerate() {
                if w.len() != cols {
                    repairs.push(ShapeRepair::WeightColumns {
                        layer,
                        row,
                        expected: cols,
                        found: w.len(),
                    });
                    *w = (0..cols)
                        .map(|_| rng.gen_range_f32(-WEIGHT_INIT, WEIGHT_INIT))
                        .collect();
                }
            }

            if conn.biases.len() != cols {
                repairs.push(ShapeRepair::BiasLength {
                    layer,
                    expected: cols,
                    found: conn.biases.len(),
                });
                conn.biases = random_biases(cols, rng);
            }

            let confidence_fits =
                conn.confidence.len() == rows && conn.confidence.iter().all(|r| r.len() == cols);
            if !confidence_fits {
                repairs.push(ShapeRepair::ConfidenceShape { layer });
                conn.confidence = vec![vec![NEUTRAL_CONFIDENCE; cols]; rows];
            }
        }

        for repair in &repairs {
            warn!(?repair, "connection shape repaired");
        }
        repairs
    }
}

/// One adjacent-layer connection block.
#[derive(Debug, Clone)]
pub struct Connection {
    pub route: Route,
    /// `[source][destination]`
    pub weights: Vec<Vec<f32>>,
    pub biases: Vec<f32>,
    /// Same shape as `weights`.
    pub confidence: Vec<Vec<f32>>,
}

impl Connection {
    pub fn random(rows: usize, cols: usize, route: Route, rng: &mut Prng) -> Self {
        Self {
            route,
            weights: random_matrix(rows, cols, rng),
            biases: random_biases(cols, rng),
            confidence: vec![vec![NEUTRAL_CONFIDENCE; cols]; rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.weights.len()
    }

    pub fn cols(&self) -> usize {
        self.biases.len()
    }

    pub fn nonzero_weights(&self) -> usize {
        self.weights
            .iter()
            .flat_map(|r| r.iter())
            .filter(|w| **w != 0.0)
            .count()
    }

    /// A full-mesh block whose destination is a central layer.
    pub fn is_central_mesh(&self) -> bool {
        matches!(self.route, Route::Mesh { .. })
    }
}

pub(crate) fn random_weight(rng: &mut Prng) -> f32 {
    rng.gen_range_f32(-WEIGHT_INIT, WEIGHT_INIT)
}

fn random_matrix(rows: usize, cols: usize, rng: &mut Prng) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|_| (0..cols).map(|_| random_weight(rng)).collect())
        .collect()
}

fn random_biases(cols: usize, rng: &mut Prng) -> Vec<f32> {
    (0..cols)
        .map(|_| rng.gen_range_f32(-BIAS_INIT, BIAS_INIT))
        .collect()
}

/// A recoverable shape discrepancy found and fixed by [`Topology::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeRepair {
    MissingConnection {
        layer: usize,
    },
    ExtraConnection {
        layer: usize,
    },
    Route {
        layer: usize,
    },
    WeightRows {
        layer: usize,
        expected: usize,
        found: usize,
    },
    WeightColumns {
        layer: usize,
        row: usize,
        expected: usize,
        found: usize,
    },
    BiasLength {
        layer: usize,
        expected: usize,
        found: usize,
    },
    ConfidenceShape {
        layer: usize,
    },
}
