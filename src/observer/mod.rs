use crate::activation::Activation;
use crate::network::{LearningParams, Network, Path, Stats};
use crate::topology::Stage;

/// A read-only snapshot of what the network did on its last tick.
///
/// Design intent:
/// - Observers cannot mutate or steer the network.
/// - Snapshotting is *on-demand* and can allocate; the tick loop stays unchanged.
/// - Paths are only meaningful until the next forward pass or structural change.
#[derive(Debug, Clone)]
pub struct NetworkView {
    pub ticks: u64,
    pub density: f32,
    pub layers: Vec<LayerView>,
    pub paths: Vec<Path>,
    pub stats: Stats,
    pub params: LearningParams,
}

#[derive(Debug, Clone)]
pub struct LayerView {
    pub stage: Stage,
    pub values: Vec<f32>,
    pub active: Vec<bool>,
    pub confidence: Vec<f32>,
    pub activations: Vec<Activation>,
}

impl LayerView {
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }
}

impl NetworkView {
    /// Paths leaving layer `layer`.
    pub fn paths_from(&self, layer: usize) -> impl Iterator<Item = &Path> {
        self.paths.iter().filter(move |p| p.layer == layer)
    }

    /// Compact one-line activity summary, e.g. `4/4 4/8 2/16 ...`.
    pub fn activity_line(&self) -> String {
        self.layers
            .iter()
            .map(|l| format!("{}/{}", l.active_count(), l.values.len()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct NetworkAdapter<'a> {
    network: &'a Network,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(network: &'a Network) -> Self {
        Self { network }
    }

    pub fn snapshot(&self) -> NetworkView {
        let net = self.network;
        NetworkView {
            ticks: net.ticks(),
            density: net.density(),
            layers: net
                .layers()
                .iter()
                .map(|l| LayerView {
                    stage: l.stage,
                    values: l.values.clone(),
                    active: l.active.clone(),
                    confidence: l.confidence.clone(),
                    activations: l.activations.clone(),
                })
                .collect(),
            paths: net.paths().to_vec(),
            stats: net.stats().clone(),
            params: *net.params(),
        }
    }
}
