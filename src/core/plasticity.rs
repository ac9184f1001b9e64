#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::Network;

/// Above this density the manager prunes.
pub const PRUNE_ABOVE: f32 = 0.30;
/// Below this density the manager grows.
pub const GROW_BELOW: f32 = 0.20;

/// Connections at or above this confidence are never pruned.
pub const PRUNE_CONFIDENCE_CEILING: f32 = 0.85;
const SIGNIFICANT_WEIGHT: f32 = 0.1;
const PRUNED_CONFIDENCE: f32 = 0.1;

const PREFER_PROBABILITY: f32 = 0.75;
const BOOST_FACTOR: f32 = 1.5;
const BOOST_CONFIDENCE_STEP: f32 = 0.1;
const BOOST_CONFIDENCE_CAP: f32 = 0.9;
const GROWN_WEIGHT_MIN: f32 = 0.4;
const GROWN_WEIGHT_MAX: f32 = 1.2;
const GROWN_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum StructuralChange {
    /// Density inside the band.
    Stable,
    /// Outside the band, but nothing qualified.
    NoCandidate,
    Pruned {
        layer: usize,
        from: usize,
        to: usize,
        confidence: f32,
    },
    Boosted {
        layer: usize,
        from: usize,
        to: usize,
        weight: f32,
    },
    Grown {
        layer: usize,
        from: usize,
        to: usize,
        weight: f32,
    },
}

impl StructuralChange {
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            StructuralChange::Pruned { .. }
                | StructuralChange::Boosted { .. }
                | StructuralChange::Grown { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlasticityOutcome {
    pub density: f32,
    pub change: StructuralChange,
}

impl Network {
    /// Indices of the full-mesh connection blocks feeding central layers.
    pub fn mesh_layers(&self) -> Vec<usize> {
        self.connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_central_mesh())
            .map(|(l, _)| l)
            .collect()
    }

    /// Prune or grow one central connection depending on activation density.
    pub fn adapt_structure(&mut self) -> PlasticityOutcome {
        self.ensure_shapes();
        let density = self.density();
        let change = if density > PRUNE_ABOVE {
            self.prune_one()
        } else if density < GROW_BELOW {
            self.grow_one()
        } else {
            StructuralChange::Stable
        };

        if change.is_change() {
            // Recorded paths no longer match the weights.
            self.paths.clear();
            debug!(density, ?change, "structure adapted");
        }
        PlasticityOutcome { density, change }
    }

    fn prune_one(&mut self) -> StructuralChange {
        let meshes = self.mesh_layers();
        if meshes.is_empty() {
            return StructuralChange::NoCandidate;
        }
        let start = self.rng.gen_index(meshes.len());
        for k in 0..meshes.len() {
            let layer = meshes[(start + k) % meshes.len()];
            if let Some((from, to, confidence)) = self.least_confident_path(layer) {
                let conn = &mut self.connections[layer];
                conn.weights[from][to] = 0.0;
                conn.confidence[from][to] = PRUNED_CONFIDENCE;
                self.stats.pruned += 1;
                return StructuralChange::Pruned {
                    layer,
                    from,
                    to,
                    confidence,
                };
            }
        }
        StructuralChange::NoCandidate
    }

    /// Lowest-confidence fired connection of `layer` still worth pruning.
    fn least_confident_path(&self, layer: usize) -> Option<(usize, usize, f32)> {
        let conn = &self.connections[layer];
        self.paths
            .iter()
            .filter(|p| p.layer == layer)
            .map(|p| (p.from, p.to, conn.confidence[p.from][p.to]))
            .filter(|(from, to, c)| {
                *c < PRUNE_CONFIDENCE_CEILING && conn.weights[*from][*to].abs() > SIGNIFICANT_WEIGHT
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
    }

    fn grow_one(&mut self) -> StructuralChange {
        let meshes = self.mesh_layers();
        let Some(&layer) = self.rng.choose(&meshes) else {
            return StructuralChange::NoCandidate;
        };

        let active_sources: Vec<usize> = active_indices(&self.layers[layer].active, true);
        let inactive_targets: Vec<usize> = active_indices(&self.layers[layer + 1].active, false);
        let rows = self.connections[layer].rows();
        let cols = self.connections[layer].cols();
        if rows == 0 || cols == 0 {
            return StructuralChange::NoCandidate;
        }

        let from = self.pick_preferred(&active_sources, rows);
        let to = self.pick_preferred(&inactive_targets, cols);

        let conn = &mut self.connections[layer];
        let w = conn.weights[from][to];
        if w.abs() > SIGNIFICANT_WEIGHT {
            let boosted = w * BOOST_FACTOR;
            conn.weights[from][to] = boosted;
            let c = &mut conn.confidence[from][to];
            *c = (*c + BOOST_CONFIDENCE_STEP).min(BOOST_CONFIDENCE_CAP);
            self.stats.boosted += 1;
            StructuralChange::Boosted {
                layer,
                from,
                to,
                weight: boosted,
            }
        } else {
            let magnitude = self.rng.gen_range_f32(GROWN_WEIGHT_MIN, GROWN_WEIGHT_MAX);
            let weight = magnitude * self.rng.gen_sign();
            let conn = &mut self.connections[layer];
            conn.weights[from][to] = weight;
            conn.confidence[from][to] = GROWN_CONFIDENCE;
            self.stats.grown += 1;
            StructuralChange::Grown {
                layer,
                from,
                to,
                weight,
            }
        }
    }

    /// Usually one of `preferred`; otherwise any index below `len`.
    fn pick_preferred(&mut self, preferred: &[usize], len: usize) -> usize {
        if !preferred.is_empty() && self.rng.gen_bool(PREFER_PROBABILITY) {
            preferred[self.rng.gen_index(preferred.len())]
        } else {
            self.rng.gen_index(len)
        }
    }
}

fn active_indices(flags: &[bool], want: bool) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter(|(_, a)| **a == want)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::seeded;

    fn mesh_nonzero(net: &Network) -> usize {
        net.mesh_layers()
            .into_iter()
            .map(|l| net.connections()[l].nonzero_weights())
            .sum()
    }

    fn mesh_magnitude(net: &Network) -> f32 {
        net.mesh_layers()
            .into_iter()
            .flat_map(|l| net.connections()[l].weights.concat())
            .map(f32::abs)
            .sum()
    }

    #[test]
    fn mesh_layers_are_the_central_full_meshes() {
        let net = seeded(51);
        assert_eq!(net.mesh_layers(), vec![3, 4, 5]);
    }

    #[test]
    fn dense_activity_prunes_one_connection_per_pass() {
        let mut net = seeded(52);
        // Pin a block of connections above the ceiling.
        for row in &mut net.connections_mut()[4].confidence {
            row.fill(0.9);
        }
        let protected = net.connections()[4].weights.clone();

        let mut pruned = 0;
        for _ in 0..30 {
            net.forward([1.0, 1.0, 1.0, 1.0]);
            if net.density() <= PRUNE_ABOVE {
                break;
            }
            let before = mesh_nonzero(&net);
            let outcome = net.adapt_structure();
            match outcome.change {
                StructuralChange::Pruned { layer, from, to, confidence } => {
                    assert!(confidence < PRUNE_CONFIDENCE_CEILING);
                    assert_ne!(layer, 4);
                    assert_eq!(net.connections()[layer].weights[from][to], 0.0);
                    assert_eq!(net.connections()[layer].confidence[from][to], 0.1);
                    assert_eq!(mesh_nonzero(&net), before - 1);
                    assert!(net.paths().is_empty());
                    pruned += 1;
                }
                other => assert_eq!(other, StructuralChange::NoCandidate),
            }
        }
        assert!(pruned > 0);
        assert_eq!(net.stats().pruned, pruned);
        assert_eq!(net.connections()[4].weights, protected);
    }

    #[test]
    fn sparse_activity_grows_or_boosts() {
        let mut net = seeded(53);
        net.reset_episode();
        assert_eq!(net.density(), 0.0);
        let mut last = mesh_magnitude(&net);
        for _ in 0..20 {
            let outcome = net.adapt_structure();
            assert!(matches!(
                outcome.change,
                StructuralChange::Grown { .. } | StructuralChange::Boosted { .. }
            ));
            let now = mesh_magnitude(&net);
            assert!(now > last);
            last = now;
        }
        let s = net.stats();
        assert_eq!(s.grown + s.boosted, 20);
    }

    #[test]
    fn grown_connections_have_substantial_weight() {
        let mut net = seeded(54);
        for l in net.mesh_layers() {
            for row in &mut net.connections_mut()[l].weights {
                row.fill(0.0);
            }
        }
        net.reset_episode();
        match net.adapt_structure().change {
            StructuralChange::Grown { layer, from, to, weight } => {
                assert!((0.4..1.2).contains(&weight.abs()));
                assert_eq!(net.connections()[layer].confidence[from][to], 0.7);
            }
            other => panic!("expected growth, got {other:?}"),
        }
    }

    #[test]
    fn band_leaves_structure_alone() {
        let mut net = seeded(55);
        net.forward([1.0, 1.0, 1.0, 1.0]);
        // Force density into the band by clearing most flags.
        let total = net.topology().total_nodes();
        let keep = total / 4;
        let mut kept = 0;
        for layer in &mut net.layers {
            for a in &mut layer.active {
                if *a && kept < keep {
                    kept += 1;
                } else {
                    *a = false;
                }
            }
        }
        let d = net.density();
        assert!((GROW_BELOW..=PRUNE_ABOVE).contains(&d), "density {d}");
        let before = net.connections()[3].weights.clone();
        assert_eq!(net.adapt_structure().change, StructuralChange::Stable);
        assert_eq!(net.connections()[3].weights, before);
    }
}
