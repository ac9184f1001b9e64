#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activation::Activation;
use crate::error::LoadError;
use crate::network::{LearningParams, Network, NetworkConfig, Stats};
use crate::prng::Prng;
use crate::topology::Topology;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild an equivalent network on a fresh diamond.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkSnapshot {
    pub version: u32,
    pub input_size: usize,
    pub output_size: usize,
    /// `[connection][source][destination]`
    pub weights: Vec<Vec<Vec<f32>>>,
    pub biases: Vec<Vec<f32>>,
    pub connection_confidence: Vec<Vec<Vec<f32>>>,
    /// `[layer][node]`
    pub node_confidence: Vec<Vec<f32>>,
    /// `[layer][node]`; empty means all default.
    #[cfg_attr(feature = "serde", serde(default))]
    pub activations: Vec<Vec<Activation>>,
    pub params: LearningParams,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stats: Stats,
    #[cfg_attr(feature = "serde", serde(default))]
    pub ticks: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rng_state: Option<u64>,
}

impl Network {
    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            version: SNAPSHOT_VERSION,
            input_size: self.input_size(),
            output_size: self.output_size(),
            weights: self.connections.iter().map(|c| c.weights.clone()).collect(),
            biases: self.connections.iter().map(|c| c.biases.clone()).collect(),
            connection_confidence: self.connections.iter().map(|c| c.confidence.clone()).collect(),
            node_confidence: self.layers.iter().map(|l| l.confidence.clone()).collect(),
            activations: self.layers.iter().map(|l| l.activations.clone()).collect(),
            params: self.params,
            stats: self.stats.clone(),
            ticks: self.ticks,
            rng_state: Some(self.rng.state()),
        }
    }

    /// Assign a snapshot onto a freshly built diamond of the same shape.
    ///
    /// Every matrix is checked against the topology; any mismatch is a
    /// [`LoadError::Shape`] and no network is produced.
    pub fn from_snapshot(snap: NetworkSnapshot) -> Result<Network, LoadError> {
        if snap.version != SNAPSHOT_VERSION {
            return Err(LoadError::UnsupportedVersion(snap.version));
        }
        let cfg = NetworkConfig {
            input_size: snap.input_size,
            output_size: snap.output_size,
            seed: None,
            params: snap.params,
        };
        cfg.validate().map_err(|e| LoadError::Shape(e.to_string()))?;

        let topology = Topology::diamond(snap.input_size, snap.output_size);
        check_shapes(&topology, &snap)?;

        let mut net = Network::with_topology(topology, snap.params, Prng::from_clock());

        for (((conn, w), b), c) in net
            .connections
            .iter_mut()
            .zip(snap.weights)
            .zip(snap.biases)
            .zip(snap.connection_confidence)
        {
            conn.weights = w;
            conn.biases = b;
            conn.confidence = c;
        }
        for (layer, c) in net.layers.iter_mut().zip(snap.node_confidence) {
            layer.confidence = c;
        }
        for (layer, a) in net.layers.iter_mut().zip(snap.activations) {
            layer.activations = a;
        }
        net.stats = snap.stats;
        net.ticks = snap.ticks;
        if let Some(state) = snap.rng_state {
            net.rng = Prng::from_state(state);
        }
        net.recount_activations();

        let report = net.verify_integrity();
        info!(
            input = net.input_size(),
            output = net.output_size(),
            iterations = net.stats.training_iterations,
            repairs = report.len(),
            "network restored"
        );
        Ok(net)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Network, LoadError> {
        let snap: NetworkSnapshot = serde_json::from_str(json)?;
        Network::from_snapshot(snap)
    }
}

fn check_shapes(topology: &Topology, snap: &NetworkSnapshot) -> Result<(), LoadError> {
    let layers = topology.layer_count();
    let shape_err = |what: &str,
                     at: usize,
                     expected: usize,
                     found: usize|
     -> Result<(), LoadError> {
        Err(LoadError::Shape(format!(
            "{what} {at}: expected {expected}, found {found}"
        )))
    };

    for (what, len) in [
        ("weight blocks", snap.weights.len()),
        ("bias vectors", snap.biases.len()),
        ("confidence blocks", snap.connection_confidence.len()),
    ] {
        if len != layers - 1 {
            return shape_err(what, 0, layers - 1, len);
        }
    }
    if snap.node_confidence.len() != layers {
        return shape_err("node confidence layers", 0, layers, snap.node_confidence.len());
    }
    if !snap.activations.is_empty() && snap.activations.len() != layers {
        return shape_err("activation layers", 0, layers, snap.activations.len());
    }

    for l in 0..layers - 1 {
        let rows = topology.size(l);
        let cols = topology.size(l + 1);
        for (what, matrix) in [
            ("weight block", &snap.weights[l]),
            ("confidence block", &snap.connection_confidence[l]),
        ] {
            if matrix.len() != rows {
                return shape_err(what, l, rows, matrix.len());
            }
            if let Some(bad) = matrix.iter().find(|r| r.len() != cols) {
                return shape_err(what, l, cols, bad.len());
            }
        }
        if snap.biases[l].len() != cols {
            return shape_err("bias vector", l, cols, snap.biases[l].len());
        }
    }

    for l in 0..layers {
        let size = topology.size(l);
        if snap.node_confidence[l].len() != size {
            return shape_err("node confidence layer", l, size, snap.node_confidence[l].len());
        }
        if let Some(a) = snap.activations.get(l) {
            if a.len() != size {
                return shape_err("activation layer", l, size, a.len());
            }
        }
    }
    Ok(())
}
