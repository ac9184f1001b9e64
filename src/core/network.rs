use hashbrown::HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activation::Activation;
use crate::integrity::IntegrityReport;
use crate::plasticity::PlasticityOutcome;
use crate::prng::Prng;
use crate::reward::MovementTracker;
use crate::topology::{
    Connection, Route, ShapeRepair, Stage, Topology, NEUTRAL_CONFIDENCE, SECONDARY_FACTOR,
};

/// Value forced onto node 0 of a hidden layer that ended a pass fully silent.
pub const FLOOR_ACTIVATION: f32 = 0.1;

/// Tunables read by the trainer and plasticity manager on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LearningParams {
    pub base_learning_rate: f32,
    pub confidence_modifier: f32,
    pub mutation_threshold: f32,
    pub mutation_rate: f32,
    pub reward_scaling: f32,
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            base_learning_rate: 0.05,
            confidence_modifier: 3.0,
            mutation_threshold: 0.15,
            mutation_rate: 0.25,
            reward_scaling: 2.0,
        }
    }
}

impl LearningParams {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.base_learning_rate.is_finite()
            || self.base_learning_rate <= 0.0
            || self.base_learning_rate > 1.0
        {
            return Err("base_learning_rate must be in (0, 1]");
        }
        if !self.confidence_modifier.is_finite() || self.confidence_modifier < 0.0 {
            return Err("confidence_modifier must be finite and >= 0");
        }
        if !(0.0..=1.0).contains(&self.mutation_threshold) {
            return Err("mutation_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err("mutation_rate must be in [0, 1]");
        }
        if !self.reward_scaling.is_finite() || self.reward_scaling < 0.0 {
            return Err("reward_scaling must be finite and >= 0");
        }
        Ok(())
    }
}

/// Partial update of [`LearningParams`]; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LearningParamsUpdate {
    pub base_learning_rate: Option<f32>,
    pub confidence_modifier: Option<f32>,
    pub mutation_threshold: Option<f32>,
    pub mutation_rate: Option<f32>,
    pub reward_scaling: Option<f32>,
}

impl LearningParamsUpdate {
    pub fn apply(&self, params: &mut LearningParams) {
        if let Some(v) = self.base_learning_rate {
            params.base_learning_rate = v;
        }
        if let Some(v) = self.confidence_modifier {
            params.confidence_modifier = v;
        }
        if let Some(v) = self.mutation_threshold {
            params.mutation_threshold = v;
        }
        if let Some(v) = self.mutation_rate {
            params.mutation_rate = v;
        }
        if let Some(v) = self.reward_scaling {
            params.reward_scaling = v;
        }
    }
}

/// Accumulating training counters.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Stats {
    pub training_iterations: u64,
    /// Mean absolute output error of the most recent update.
    pub last_error: f32,
    pub cumulative_reward: f64,
    pub reward_count: u64,
    pub paths_deleted: u64,
    pub node_mutations: u64,
    pub weight_mutations: u64,
    pub pruned: u64,
    pub grown: u64,
    pub boosted: u64,
    pub integrity_repairs: u64,
    /// Hidden nodes per nonlinearity. Derived from the layers, rebuilt on load.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub activation_counts: HashMap<Activation, usize>,
}

impl Stats {
    pub fn mean_reward(&self) -> f64 {
        if self.reward_count == 0 {
            0.0
        } else {
            self.cumulative_reward / self.reward_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    pub input_size: usize,
    pub output_size: usize,
    /// If set, makes initialization and mutation reproducible.
    pub seed: Option<u64>,
    pub params: LearningParams,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 4,
            output_size: 4,
            seed: None,
            params: LearningParams::default(),
        }
    }
}

impl NetworkConfig {
    pub const MAX_IO: usize = 64;

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_params(mut self, params: LearningParams) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.input_size == 0 || self.input_size > Self::MAX_IO {
            return Err("input_size must be in [1, 64]");
        }
        if self.output_size == 0 || self.output_size > Self::MAX_IO {
            return Err("output_size must be in [1, 64]");
        }
        self.params.validate()
    }
}

/// Caller-supplied state for one forward pass.
///
/// Anything that is not a vector of the expected width is normalized to a
/// zero vector, optionally seeded from recognizable fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Vector(Vec<f32>),
    Scalar(f32),
    Point { x: f32, y: f32 },
    Missing,
}

impl From<Vec<f32>> for Input {
    fn from(v: Vec<f32>) -> Self {
        Input::Vector(v)
    }
}

impl From<&[f32]> for Input {
    fn from(v: &[f32]) -> Self {
        Input::Vector(v.to_vec())
    }
}

impl From<&Vec<f32>> for Input {
    fn from(v: &Vec<f32>) -> Self {
        Input::Vector(v.clone())
    }
}

impl<const N: usize> From<[f32; N]> for Input {
    fn from(v: [f32; N]) -> Self {
        Input::Vector(v.to_vec())
    }
}

impl<const N: usize> From<&[f32; N]> for Input {
    fn from(v: &[f32; N]) -> Self {
        Input::Vector(v.to_vec())
    }
}

impl From<f32> for Input {
    fn from(v: f32) -> Self {
        Input::Scalar(v)
    }
}

impl From<&serde_json::Value> for Input {
    fn from(v: &serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Array(items) => Input::Vector(
                items
                    .iter()
                    .map(|x| x.as_f64().map(|f| f as f32).unwrap_or(f32::NAN))
                    .collect(),
            ),
            Value::Number(n) => n.as_f64().map_or(Input::Missing, |f| Input::Scalar(f as f32)),
            Value::Object(map) => {
                let field = |k: &str| map.get(k).and_then(Value::as_f64).map(|f| f as f32);
                match (field("x"), field("y")) {
                    (Some(x), Some(y)) => Input::Point { x, y },
                    (Some(x), None) => Input::Scalar(x),
                    (None, Some(y)) => Input::Point { x: 0.0, y },
                    (None, None) => Input::Missing,
                }
            }
            _ => Input::Missing,
        }
    }
}

impl Input {
    /// Resolve to exactly `width` finite values.
    pub fn normalize(self, width: usize) -> Vec<f32> {
        let finite = |x: f32| if x.is_finite() { x } else { 0.0 };
        let mut out = vec![0.0; width];
        match self {
            Input::Vector(v) if v.len() == width => {
                for (o, x) in out.iter_mut().zip(v) {
                    *o = finite(x);
                }
            }
            Input::Vector(v) => {
                warn!(expected = width, found = v.len(), "input width mismatch; using zeros");
            }
            Input::Scalar(s) => {
                warn!(value = s, "scalar input; seeding element 0");
                out[0] = finite(s);
            }
            Input::Point { x, y } => {
                warn!(x, y, "point input; seeding elements 0 and 2");
                out[0] = finite(x);
                if width > 2 {
                    out[2] = finite(y);
                }
            }
            Input::Missing => {
                warn!("missing input; using zeros");
            }
        }
        out
    }
}

/// One layer's node state.
#[derive(Debug, Clone)]
pub struct Layer {
    pub stage: Stage,
    pub values: Vec<f32>,
    /// Pre-activation sums of the last pass; gates hidden deltas.
    pub pre_activation: Vec<f32>,
    pub active: Vec<bool>,
    pub activations: Vec<Activation>,
    pub confidence: Vec<f32>,
}

impl Layer {
    fn new(stage: Stage, size: usize) -> Self {
        Self {
            stage,
            values: vec![0.0; size],
            pre_activation: vec![0.0; size],
            active: vec![false; size],
            activations: vec![Activation::default(); size],
            confidence: vec![NEUTRAL_CONFIDENCE; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_hidden(&self) -> bool {
        !matches!(self.stage, Stage::Input | Stage::Output)
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    fn clear(&mut self) {
        self.values.fill(0.0);
        self.pre_activation.fill(0.0);
        self.active.fill(false);
    }
}

/// A connection that carried signal in the most recent forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Path {
    /// Source layer index; also the connection index.
    pub layer: usize,
    pub from: usize,
    pub to: usize,
    /// `|source value| × factor`
    pub magnitude: f32,
    pub sign: f32,
    /// Stage of the destination layer.
    pub stage: Stage,
    pub primary: bool,
    /// Routing factor applied to the contribution (1, 0.5 or 1/n).
    pub factor: f32,
}

/// What the caller feeds back after a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainSignal {
    Reward(f32),
    Target(Vec<f32>),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub output: Vec<f32>,
    /// Mean absolute error of the training update, when one ran.
    pub error: Option<f32>,
    pub plasticity: PlasticityOutcome,
    pub integrity: IntegrityReport,
}

/// The diamond network: layers, connections, per-tick paths and counters.
#[derive(Debug, Clone)]
pub struct Network {
    pub(crate) topology: Topology,
    pub(crate) layers: Vec<Layer>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) paths: Vec<Path>,
    pub(crate) params: LearningParams,
    pub(crate) stats: Stats,
    pub(crate) rng: Prng,
    pub(crate) tracker: MovementTracker,
    pub(crate) ticks: u64,
    pub(crate) build_repairs: Vec<ShapeRepair>,
    /// Set when connections were handed out for writing.
    pub(crate) shapes_dirty: bool,
}

impl Network {
    /// Build a network. An invalid config is logged and used as given; see
    /// [`Network::try_new`] for the checked variant.
    pub fn new(cfg: NetworkConfig) -> Self {
        if let Err(reason) = cfg.validate() {
            warn!(reason, ?cfg, "building network from an invalid config");
        }
        Self::build(cfg)
    }

    /// Build a network, rejecting configs that fail [`NetworkConfig::validate`].
    pub fn try_new(cfg: NetworkConfig) -> Result<Self, &'static str> {
        cfg.validate()?;
        Ok(Self::build(cfg))
    }

    fn build(cfg: NetworkConfig) -> Self {
        let topology = Topology::diamond(cfg.input_size, cfg.output_size);
        let rng = match cfg.seed {
            Some(seed) => Prng::new(seed),
            None => Prng::from_clock(),
        };
        Self::with_topology(topology, cfg.params, rng)
    }

    pub(crate) fn with_topology(topology: Topology, params: LearningParams, mut rng: Prng) -> Self {
        let layers = (0..topology.layer_count())
            .map(|l| Layer::new(topology.stage(l), topology.size(l)))
            .collect();
        let (connections, build_repairs) = topology.build_connections(&mut rng);
        let mut net = Self {
            topology,
            layers,
            connections,
            paths: Vec::new(),
            params,
            stats: Stats::default(),
            rng,
            tracker: MovementTracker::default(),
            ticks: 0,
            build_repairs,
            shapes_dirty: false,
        };
        net.recount_activations();
        net
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn input_size(&self) -> usize {
        self.topology.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.topology.output_size()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Direct write access to the connection blocks. Shapes are re-validated
    /// before the next pass that reads them.
    pub fn connections_mut(&mut self) -> &mut [Connection] {
        self.shapes_dirty = true;
        &mut self.connections
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn params(&self) -> &LearningParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut LearningParams {
        &mut self.params
    }

    pub fn update_params(&mut self, update: &LearningParamsUpdate) {
        update.apply(&mut self.params);
        debug!(params = ?self.params, "learning params updated");
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Repairs made while allocating the connections at construction.
    pub fn build_repairs(&self) -> &[ShapeRepair] {
        &self.build_repairs
    }

    /// Re-run the shape validation pass over the current connections.
    pub fn validate_shapes(&mut self) -> Vec<ShapeRepair> {
        let mut conns = std::mem::take(&mut self.connections);
        let repairs = self.topology.validate(&mut conns, &mut self.rng);
        self.connections = conns;
        self.shapes_dirty = false;
        repairs
    }

    /// Validate shapes only if [`Network::connections_mut`] was used since
    /// the last check.
    pub(crate) fn ensure_shapes(&mut self) {
        if self.shapes_dirty {
            self.validate_shapes();
        }
    }

    pub fn output(&self) -> &[f32] {
        match self.layers.last() {
            Some(layer) => &layer.values,
            None => &[],
        }
    }

    /// Fraction of all nodes marked active by the last forward pass.
    pub fn density(&self) -> f32 {
        let total = self.topology.total_nodes();
        if total == 0 {
            return 0.0;
        }
        let active: usize = self.layers.iter().map(Layer::active_count).sum();
        active as f32 / total as f32
    }

    pub fn activation_distribution(&self) -> &HashMap<Activation, usize> {
        &self.stats.activation_counts
    }

    /// Assign the nonlinearity of one hidden node. Returns false for input
    /// and output layers or out-of-range indices.
    pub fn set_activation(&mut self, layer: usize, node: usize, activation: Activation) -> bool {
        let Some(l) = self.layers.get_mut(layer) else {
            return false;
        };
        if !l.is_hidden() || node >= l.len() {
            return false;
        }
        l.activations[node] = activation;
        self.recount_activations();
        true
    }

    pub(crate) fn recount_activations(&mut self) {
        let counts = &mut self.stats.activation_counts;
        counts.clear();
        for layer in self.layers.iter().filter(|l| l.is_hidden()) {
            for a in &layer.activations {
                *counts.entry(*a).or_insert(0) += 1;
            }
        }
    }

    /// Drop per-tick state at an episode boundary. Learned state is kept.
    pub fn reset_episode(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
        self.paths.clear();
        self.tracker = MovementTracker::default();
    }

    /// Propagate one input through the diamond and return the raw output.
    ///
    /// Rebuilds the path list. Weights and biases are not touched.
    pub fn forward(&mut self, input: impl Into<Input>) -> Vec<f32> {
        let values = input.into().normalize(self.input_size());
        self.ensure_shapes();
        self.paths.clear();

        {
            let input_layer = &mut self.layers[0];
            for (i, v) in values.into_iter().enumerate() {
                input_layer.values[i] = v;
                input_layer.pre_activation[i] = v;
                input_layer.active[i] = v != 0.0;
            }
        }

        let mut staged: Vec<Path> = Vec::new();
        for dst in 1..self.layers.len() {
            let (before, after) = self.layers.split_at_mut(dst);
            let src = &before[dst - 1];
            let out = &mut after[0];
            let conn = &self.connections[dst - 1];
            let cols = out.len();
            let stage = out.stage;

            let fan_in = match conn.route {
                Route::Contract { split: false } => fan_in_counts(src.len(), cols),
                _ => Vec::new(),
            };

            let mut sums = vec![0.0f32; cols];
            let mut touched = vec![false; cols];
            staged.clear();

            let mut carry = |from: usize,
                             to: usize,
                             contribution: f32,
                             magnitude: f32,
                             sign: f32,
                             primary: bool,
                             factor: f32| {
                if contribution == 0.0 || !contribution.is_finite() {
                    return;
                }
                sums[to] += contribution;
                touched[to] = true;
                staged.push(Path {
                    layer: dst - 1,
                    from,
                    to,
                    magnitude,
                    sign,
                    stage,
                    primary,
                    factor,
                });
            };

            for i in (0..src.len()).filter(|i| src.active[*i]) {
                let a = src.values[i];
                let w = &conn.weights[i];
                match conn.route {
                    Route::Bridge => {
                        let j = i % cols;
                        carry(i, j, a * w[j], a.abs(), a.signum(), true, 1.0);
                    }
                    Route::Expand => {
                        let (j, sign) = if a >= 0.0 {
                            ((2 * i) % cols, 1.0)
                        } else {
                            ((2 * i + 1) % cols, -1.0)
                        };
                        carry(i, j, a.abs() * w[j], a.abs(), sign, true, 1.0);
                    }
                    Route::Mesh { split } | Route::Contract { split: split @ true } => {
                        for (j, wj) in w.iter().enumerate() {
                            let primary = i == j;
                            let factor = if split && !primary { SECONDARY_FACTOR } else { 1.0 };
                            let magnitude = a.abs() * factor;
                            carry(i, j, a * wj * factor, magnitude, a.signum(), primary, factor);
                        }
                    }
                    Route::Contract { split: false } => {
                        let j = (i / 2) % cols;
                        let factor = 1.0 / fan_in[j].max(1) as f32;
                        carry(i, j, a * w[j] * factor, a.abs() * factor, a.signum(), true, factor);
                    }
                }
            }

            let hidden = out.is_hidden();
            for j in 0..cols {
                if !touched[j] {
                    out.values[j] = 0.0;
                    out.pre_activation[j] = 0.0;
                    out.active[j] = false;
                    continue;
                }
                let pre = sums[j] + conn.biases[j];
                let value = if hidden { out.activations[j].apply(pre) } else { pre };
                out.pre_activation[j] = pre;
                out.values[j] = value;
                out.active[j] = value != 0.0;
            }

            self.paths
                .extend(staged.iter().filter(|p| out.active[p.to]).copied());

            // Floor node carries no incoming path.
            if hidden && out.active_count() == 0 && cols > 0 {
                out.values[0] = FLOOR_ACTIVATION;
                out.pre_activation[0] = FLOOR_ACTIVATION;
                out.active[0] = true;
            }
        }

        self.output().to_vec()
    }

    /// One decision tick: forward, optional training, plasticity, integrity.
    pub fn tick(&mut self, input: impl Into<Input>, signal: Option<TrainSignal>) -> TickReport {
        let output = self.forward(input);
        let error = match signal {
            Some(TrainSignal::Reward(r)) => Some(self.train_reward(r)),
            Some(TrainSignal::Target(t)) => Some(self.train_target(&t)),
            None => None,
        };
        let plasticity = self.adapt_structure();
        let integrity = self.verify_integrity();
        self.ticks += 1;
        TickReport {
            output,
            error,
            plasticity,
            integrity,
        }
    }
}

/// How many source indices collapse onto each destination under `i → i/2`.
fn fan_in_counts(rows: usize, cols: usize) -> Vec<usize> {
    let mut counts = vec![0usize; cols];
    for i in 0..rows {
        counts[(i / 2) % cols] += 1;
    }
    counts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn seeded(seed: u64) -> Network {
        Network::new(NetworkConfig::default().with_seed(seed))
    }

    /// Every weight 0.1, every bias 0, except an output bias favoring index 1.
    pub(crate) fn uniform_network(seed: u64) -> Network {
        let mut net = seeded(seed);
        for conn in net.connections_mut() {
            for row in &mut conn.weights {
                row.fill(0.1);
            }
            conn.biases.fill(0.0);
        }
        if let Some(last) = net.connections_mut().last_mut() {
            last.biases[1] = 0.01;
        }
        net
    }

    fn weights_and_biases(net: &Network) -> Vec<f32> {
        net.connections()
            .iter()
            .flat_map(|c| c.weights.iter().flatten().chain(c.biases.iter()).copied())
            .collect()
    }

    #[test]
    fn forward_returns_finite_output_and_leaves_weights_alone() {
        let mut net = seeded(11);
        let before = weights_and_biases(&net);
        for input in [[0.2, 0.9, 0.0, 0.4], [1.0, 0.0, 0.0, 0.0], [-0.5, 0.3, 0.7, -1.0]] {
            let out = net.forward(input);
            assert_eq!(out.len(), 4);
            assert!(out.iter().all(|v| v.is_finite()));
        }
        assert_eq!(before, weights_and_biases(&net));
    }

    #[test]
    fn malformed_inputs_are_normalized() {
        let mut net = seeded(12);
        let cases: Vec<Input> = vec![
            Input::Vector(vec![]),
            Input::Vector(vec![1.0; 7]),
            Input::Vector(vec![f32::NAN, f32::INFINITY, 1.0, 0.0]),
            Input::Scalar(0.8),
            Input::Point { x: 0.3, y: 0.6 },
            Input::Missing,
            Input::from(&serde_json::json!({"x": 2, "y": 3})),
            Input::from(&serde_json::json!("up")),
            Input::from(&serde_json::json!([1, "a", null, 0.5])),
        ];
        for input in cases {
            let out = net.forward(input);
            assert_eq!(out.len(), 4);
            assert!(out.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn normalization_seeds_recognizable_fields() {
        assert_eq!(Input::Scalar(0.7).normalize(4), vec![0.7, 0.0, 0.0, 0.0]);
        assert_eq!(
            Input::Point { x: 0.1, y: 0.2 }.normalize(4),
            vec![0.1, 0.0, 0.2, 0.0]
        );
        assert_eq!(Input::Vector(vec![1.0, 2.0]).normalize(4), vec![0.0; 4]);
        assert_eq!(
            Input::Vector(vec![f32::NAN, 1.0, 2.0, 3.0]).normalize(4),
            vec![0.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn paths_link_adjacent_layers_into_active_nodes() {
        let mut net = seeded(13);
        net.forward([0.9, 0.1, 0.4, 0.0]);
        assert!(!net.paths().is_empty());
        for p in net.paths() {
            let dst = &net.layers()[p.layer + 1];
            assert!(dst.active[p.to], "path into inactive node {p:?}");
            assert!(net.layers()[p.layer].active[p.from]);
            assert!(p.from < net.layers()[p.layer].len());
            assert_eq!(p.stage, dst.stage);
        }
    }

    #[test]
    fn silent_hidden_layer_gets_floor_activation() {
        let mut net = seeded(14);
        // Zero the second expansion block so layer 2 receives nothing.
        for row in &mut net.connections_mut()[1].weights {
            row.fill(0.0);
        }
        net.forward([1.0, 1.0, 1.0, 1.0]);
        let layer = &net.layers()[2];
        assert_eq!(layer.active_count(), 1);
        assert!(layer.active[0]);
        assert_eq!(layer.values[0], FLOOR_ACTIVATION);
        assert!(net.paths().iter().all(|p| p.layer != 1));
    }

    #[test]
    fn expansion_routes_by_source_sign() {
        let mut net = uniform_network(15);
        net.forward([1.0, -1.0, 0.0, 0.0]);
        let first: Vec<(usize, usize, f32)> = net
            .paths()
            .iter()
            .filter(|p| p.layer == 0)
            .map(|p| (p.from, p.to, p.sign))
            .collect();
        assert_eq!(first, vec![(0, 0, 1.0), (1, 3, -1.0)]);
        // Magnitude is used, not the signed value.
        assert!((net.layers()[1].values[3] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn last_central_mesh_halves_secondary_pairs() {
        let mut net = uniform_network(16);
        net.forward([1.0, 1.0, 0.0, 0.0]);
        for p in net.paths().iter().filter(|p| p.layer == 5) {
            if p.from == p.to {
                assert!(p.primary);
                assert_eq!(p.factor, 1.0);
            } else {
                assert!(!p.primary);
                assert_eq!(p.factor, SECONDARY_FACTOR);
            }
        }
    }

    #[test]
    fn fan_in_averages_colliding_sources() {
        let topology = Topology::from_stages(4, &[8, 16], &[16, 16], &[16, 8, 4], 4);
        let mut net = Network::with_topology(topology, LearningParams::default(), Prng::new(17));
        for conn in net.connections_mut() {
            for row in &mut conn.weights {
                row.fill(0.1);
            }
            conn.biases.fill(0.0);
        }
        net.forward([1.0, 1.0, 1.0, 1.0]);
        let fan_in_layer = 5;
        assert_eq!(
            net.connections()[fan_in_layer].route,
            Route::Contract { split: false }
        );
        let paths: Vec<&Path> = net.paths().iter().filter(|p| p.layer == fan_in_layer).collect();
        assert!(!paths.is_empty());
        for p in &paths {
            assert_eq!(p.to, p.from / 2);
            assert!((p.factor - 0.5).abs() < 1e-6);
        }
        // Destination 0 is the mean of sources 0 and 1, times the weight.
        let src = &net.layers()[fan_in_layer];
        let dst = &net.layers()[fan_in_layer + 1];
        let expected = 0.1 * (src.values[0] + src.values[1]) * 0.5;
        assert!((dst.values[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn tied_outputs_resolve_to_right_via_bias() {
        let mut a = uniform_network(18);
        let mut b = uniform_network(99);
        let out_a = a.forward([1.0, 1.0, 0.0, 0.0]);
        let out_b = b.forward([1.0, 1.0, 0.0, 0.0]);
        assert_eq!(out_a, out_b);
        assert_eq!(crate::reward::argmax(&out_a), Some(1));
        assert_eq!(
            crate::reward::select_action(&out_a, None),
            Some(crate::reward::Direction::Right)
        );
    }

    #[test]
    fn same_seed_builds_identical_networks() {
        let mut a = seeded(19);
        let mut b = seeded(19);
        assert_eq!(weights_and_biases(&a), weights_and_biases(&b));
        assert_eq!(a.forward([0.3, 0.2, 0.1, 0.9]), b.forward([0.3, 0.2, 0.1, 0.9]));
    }

    #[test]
    fn params_accept_partial_updates() {
        let mut net = seeded(20);
        net.update_params(&LearningParamsUpdate {
            mutation_rate: Some(0.0),
            reward_scaling: Some(1.0),
            ..Default::default()
        });
        let p = net.params();
        assert_eq!(p.mutation_rate, 0.0);
        assert_eq!(p.reward_scaling, 1.0);
        assert_eq!(p.base_learning_rate, 0.05);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        assert!(NetworkConfig::default().validate().is_ok());
        let mut cfg = NetworkConfig::default();
        cfg.input_size = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = NetworkConfig::default();
        cfg.params.mutation_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn try_new_rejects_invalid_config() {
        let mut cfg = NetworkConfig::default().with_seed(3);
        cfg.params.mutation_rate = 5.0;
        assert_eq!(Network::try_new(cfg.clone()).err(), Some("mutation_rate must be in [0, 1]"));
        // The unchecked constructor still builds a usable network.
        let mut net = Network::new(cfg);
        assert_eq!(net.forward([0.1, 0.2, 0.3, 0.4]).len(), 4);
        assert!(Network::try_new(NetworkConfig::default().with_seed(3)).is_ok());
    }

    #[test]
    fn forward_repairs_rows_truncated_through_connections_mut() {
        let mut net = seeded(24);
        for row in &mut net.connections_mut()[2].weights {
            row.truncate(1);
        }
        net.connections_mut()[2].confidence[0].clear();

        let out = net.forward([1.0, 1.0, 1.0, 1.0]);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|v| v.is_finite()));
        let conn = &net.connections()[2];
        assert!(conn.weights.iter().all(|r| r.len() == 16));
        assert!(conn.confidence.iter().all(|r| r.len() == 16));
        assert!(net.validate_shapes().is_empty());
    }

    #[test]
    fn training_repairs_shapes_broken_after_forward() {
        let mut net = seeded(25);
        net.forward([0.9, 0.4, 0.2, 0.7]);
        for row in &mut net.connections_mut().last_mut().expect("output block").confidence {
            row.truncate(1);
        }
        assert!(net.train_reward(-1.0).is_finite());
        net.update_confidence_from_reward(-0.5, Some(crate::reward::Direction::Down));
        let conn = net.connections().last().expect("output block");
        assert!(conn.confidence.iter().all(|r| r.len() == 4));
        assert!(net.verify_integrity().is_clean());
    }

    #[test]
    fn reset_episode_clears_tick_state_only() {
        let mut net = seeded(21);
        net.forward([0.5, 0.5, 0.5, 0.5]);
        let weights = weights_and_biases(&net);
        net.reset_episode();
        assert!(net.paths().is_empty());
        assert_eq!(net.density(), 0.0);
        assert_eq!(weights, weights_and_biases(&net));
    }

    #[test]
    fn activation_distribution_counts_hidden_nodes() {
        let mut net = seeded(22);
        let hidden: usize = net.layers().iter().filter(|l| l.is_hidden()).map(Layer::len).sum();
        assert_eq!(net.activation_distribution()[&Activation::LeakyRelu], hidden);
        assert!(net.set_activation(3, 0, Activation::Tanh));
        assert!(!net.set_activation(0, 0, Activation::Tanh));
        assert_eq!(net.activation_distribution()[&Activation::Tanh], 1);
    }

    #[test]
    fn tick_runs_every_stage_in_order() {
        let mut net = seeded(23);
        let report = net.tick([0.1, 0.8, 0.3, 0.0], Some(TrainSignal::Reward(1.0)));
        assert_eq!(report.output.len(), 4);
        assert!(report.error.is_some());
        assert!(report.integrity.is_clean());
        assert_eq!(net.ticks(), 1);
        assert_eq!(net.stats().training_iterations, 1);

        let report = net.tick([0.1, 0.8, 0.3, 0.0], None);
        assert!(report.error.is_none());
        assert_eq!(net.stats().training_iterations, 1);
        assert_eq!(net.ticks(), 2);
    }

    #[test]
    fn network_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Network>();
    }
}
