//! Confidence-weighted backpropagation restricted to the paths of the last
//! forward pass.
//!
//! Two entry points share one update: [`Network::train_target`] with an explicit
//! target and [`Network::train_reward`], which derives a target from the current
//! output. Connections that did not carry signal get no gradient at all.

use tracing::{debug, warn};

use crate::activation::Activation;
use crate::network::{Input, Network, TrainSignal};
use crate::topology::Route;

/// Full-target updates run at this multiple of the base rate.
pub const TARGET_RATE_SCALE: f32 = 1.5;
/// Positive reward pulls every output up to at least this value.
pub const REWARD_FLOOR_TARGET: f32 = 0.7;
/// ...and the current winner up to at least this one.
pub const REWARD_WINNER_TARGET: f32 = 1.0;
/// Non-positive reward inverts outputs around this threshold.
pub const INVERT_THRESHOLD: f32 = 0.4;

const ERROR_EXPONENT: f32 = 1.5;
const STABLE_GRADIENT: f32 = 0.1;
const CONFIDENCE_GAIN: f32 = 0.01;
const CONFIDENCE_DECAY: f32 = 0.02;
const CONFIDENCE_FLOOR: f32 = 0.05;
const RATE_FLOOR: f32 = 0.2;
const MUTATION_SCALE: f32 = 8.0;

/// Synthetic target for a scalar reward, derived from the current output.
pub fn reward_target(output: &[f32], reward: f32) -> Vec<f32> {
    if reward > 0.0 {
        let winner = crate::reward::argmax(output);
        output
            .iter()
            .enumerate()
            .map(|(j, o)| {
                if Some(j) == winner {
                    o.max(REWARD_WINNER_TARGET)
                } else {
                    o.max(REWARD_FLOOR_TARGET)
                }
            })
            .collect()
    } else {
        output
            .iter()
            .map(|o| if *o > INVERT_THRESHOLD { 0.0 } else { 1.0 })
            .collect()
    }
}

/// Signed error with super-linear emphasis: `sign(e)·|e|^1.5`.
#[inline]
fn emphasize(e: f32) -> f32 {
    e.signum() * e.abs().powf(ERROR_EXPONENT)
}

/// Learning-rate multiplier: low confidence adapts faster.
#[inline]
pub fn rate_multiplier(confidence: f32, modifier: f32) -> f32 {
    let doubt = 1.0 - confidence;
    doubt * doubt * modifier + RATE_FLOOR
}

/// One fired connection's update: confidence moves first, and the weight step
/// is scaled by the new confidence. Returns `(weight, confidence)`; the weight
/// may be non-finite and is checked by the caller.
fn connection_step(
    weight: f32,
    confidence: f32,
    gradient: f32,
    rate: f32,
    modifier: f32,
) -> (f32, f32) {
    let confidence = if gradient.abs() < STABLE_GRADIENT {
        (confidence + CONFIDENCE_GAIN).min(1.0)
    } else {
        (confidence - CONFIDENCE_DECAY * gradient.abs()).max(CONFIDENCE_FLOOR)
    };
    let weight = weight + rate * rate_multiplier(confidence, modifier) * gradient;
    (weight, confidence)
}

impl Network {
    /// Forward `input`, then train on `signal`. Returns the mean absolute error.
    pub fn train(&mut self, input: impl Into<Input>, signal: TrainSignal) -> f32 {
        self.forward(input);
        match signal {
            TrainSignal::Reward(r) => self.train_reward(r),
            TrainSignal::Target(t) => self.train_target(&t),
        }
    }

    /// Update toward an explicit target for the last forward pass. Short
    /// targets are zero-padded and non-finite entries read as zero.
    pub fn train_target(&mut self, target: &[f32]) -> f32 {
        let mut padded: Vec<f32> = target
            .iter()
            .map(|t| if t.is_finite() { *t } else { 0.0 })
            .collect();
        padded.resize(self.output_size(), 0.0);
        let rate = TARGET_RATE_SCALE * self.params.base_learning_rate;
        self.apply_target(&padded, rate)
    }

    /// Update from a scalar reward for the last forward pass.
    pub fn train_reward(&mut self, reward: f32) -> f32 {
        let reward = if reward.is_finite() {
            reward
        } else {
            warn!(reward, "non-finite reward treated as zero");
            0.0
        };
        self.stats.cumulative_reward += f64::from(reward);
        self.stats.reward_count += 1;

        let target = reward_target(self.output(), reward);
        let rate = reward.abs() * self.params.base_learning_rate * self.params.reward_scaling;
        self.apply_target(&target, rate)
    }

    fn apply_target(&mut self, target: &[f32], rate: f32) -> f32 {
        self.ensure_shapes();
        let out_layer = self.layers.len() - 1;
        let output = &self.layers[out_layer].values;
        let errors: Vec<f32> = output
            .iter()
            .zip(target)
            .map(|(o, t)| emphasize(t - o))
            .collect();
        let mean_error = if output.is_empty() {
            0.0
        } else {
            output
                .iter()
                .zip(target)
                .map(|(o, t)| (t - o).abs())
                .sum::<f32>()
                / output.len() as f32
        };

        // Paths are ordered by layer, so walking them backwards finishes every
        // destination's delta before its sources are reached.
        let mut back: Vec<Vec<f32>> = self.layers.iter().map(|l| vec![0.0; l.len()]).collect();
        let mut gradients = vec![0.0f32; self.paths.len()];
        for (k, p) in self.paths.iter().enumerate().rev() {
            let d = self.delta(p.layer + 1, p.to, &errors, &back);
            let a = self.layers[p.layer].values[p.from];
            let conn = &self.connections[p.layer];
            let (input_term, back_sign) = match conn.route {
                Route::Expand => (a.abs(), p.sign),
                _ => (a, 1.0),
            };
            gradients[k] = d * input_term * p.factor;
            back[p.layer][p.from] += d * conn.weights[p.from][p.to] * p.factor * back_sign;
        }

        let bias_deltas: Vec<Vec<f32>> = (1..self.layers.len())
            .map(|l| {
                (0..self.layers[l].len())
                    .map(|j| {
                        if self.layers[l].active[j] {
                            self.delta(l, j, &errors, &back)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let modifier = self.params.confidence_modifier;
        let threshold = self.params.mutation_threshold;
        let mutation_rate = self.params.mutation_rate;
        let mut discarded = 0usize;

        for (p, g) in self.paths.iter().zip(&gradients) {
            let conn = &mut self.connections[p.layer];
            let w = &mut conn.weights[p.from][p.to];
            let (updated, c) =
                connection_step(*w, conn.confidence[p.from][p.to], *g, rate, modifier);
            conn.confidence[p.from][p.to] = c;
            if updated.is_finite() {
                *w = updated;
            } else {
                discarded += 1;
            }

            if c < threshold && self.rng.gen_bool(mutation_rate) {
                let kick = self.rng.gen_range_f32(-1.0, 1.0) * (threshold - c) * MUTATION_SCALE;
                let mutated = *w + kick;
                if mutated.is_finite() {
                    *w = mutated;
                    self.stats.weight_mutations += 1;
                } else {
                    discarded += 1;
                }
            }
        }

        for (l, deltas) in bias_deltas.iter().enumerate() {
            for (b, d) in self.connections[l].biases.iter_mut().zip(deltas) {
                let updated = *b + rate * d;
                if *d != 0.0 && updated.is_finite() {
                    *b = updated;
                }
            }
        }

        if discarded > 0 {
            warn!(discarded, "non-finite weight updates discarded");
        }

        self.stats.training_iterations += 1;
        self.stats.last_error = mean_error;
        debug!(
            iteration = self.stats.training_iterations,
            error = mean_error,
            paths = self.paths.len(),
            "training step"
        );

        self.verify_integrity();
        mean_error
    }

    fn delta(&self, layer: usize, node: usize, errors: &[f32], back: &[Vec<f32>]) -> f32 {
        if layer + 1 == self.layers.len() {
            errors[node]
        } else {
            Activation::gate(self.layers[layer].pre_activation[node]) * back[layer][node]
        }
    }
}
