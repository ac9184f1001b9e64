use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::Network;

const DISTANCE_HISTORY: usize = 20;
const DIRECTION_HISTORY: usize = 10;

const MIN_MOVE_REWARD: f32 = 0.01;
const MAX_MOVE_REWARD: f32 = 0.1;
const STREAK_FOR_BONUS: u32 = 2;

const MIN_CONFIDENCE_STEP: f32 = 0.001;
const PATH_REWARD_SCALE: f32 = 0.1;
const NODE_REWARD_SCALE: f32 = 0.05;
const DIRECTION_PENALTY_SCALE: f32 = 0.2;
const PENALTY_WEIGHT_FLOOR: f32 = 0.1;

/// Discrete actions, in output-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    pub fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Right => 1,
            Direction::Down => 2,
            Direction::Left => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Direction> {
        Self::ALL.get(index).copied()
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
        }
    }

    /// Grid step; `y` grows downward.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Right => "right",
            Direction::Down => "down",
            Direction::Left => "left",
        }
    }
}

/// Index of the first maximum, ignoring NaN.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if *v <= b => {}
            _ => best = Some((i, *v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Highest-scoring direction that does not reverse `current`.
pub fn select_action(output: &[f32], current: Option<Direction>) -> Option<Direction> {
    let forbidden = current.map(Direction::opposite);
    let mut ranked: Vec<(Direction, f32)> = Direction::ALL
        .iter()
        .zip(output)
        .filter(|(_, v)| !v.is_nan())
        .map(|(d, v)| (*d, *v))
        .collect();
    // Stable: ties keep output order.
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .map(|(d, _)| d)
        .find(|d| Some(*d) != forbidden)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: GridPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// Distance-to-goal history feeding the movement reward.
#[derive(Debug, Clone, Default)]
pub struct MovementTracker {
    last_direction: Option<Direction>,
    last_distance: Option<u32>,
    streak: u32,
    distances: VecDeque<u32>,
    correct: VecDeque<Direction>,
    wrong: VecDeque<Direction>,
}

impl MovementTracker {
    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn distances(&self) -> &VecDeque<u32> {
        &self.distances
    }

    pub fn correct_directions(&self) -> &VecDeque<Direction> {
        &self.correct
    }

    pub fn wrong_directions(&self) -> &VecDeque<Direction> {
        &self.wrong
    }

    /// Record a move and return its reward. The first call only primes.
    pub fn observe(&mut self, direction: Direction, distance: u32) -> (f32, bool) {
        push_bounded(&mut self.distances, distance, DISTANCE_HISTORY);

        let mut closer = false;
        let mut reward = 0.0;
        if let Some(prev) = self.last_distance {
            if distance < prev {
                closer = true;
                let improvement = (prev - distance) as f32 / prev as f32;
                reward = (improvement * 0.5).clamp(MIN_MOVE_REWARD, MAX_MOVE_REWARD);
                push_bounded(&mut self.correct, direction, DIRECTION_HISTORY);
                self.streak += 1;
                if self.streak >= STREAK_FOR_BONUS {
                    reward *= 2.0;
                }
            } else {
                let regression = if distance == 0 {
                    0.0
                } else {
                    (distance - prev) as f32 / distance as f32
                };
                reward = -(regression * 0.5).clamp(MIN_MOVE_REWARD, MAX_MOVE_REWARD);
                push_bounded(&mut self.wrong, direction, DIRECTION_HISTORY);
                self.streak = 0;
            }
        }

        self.last_direction = Some(direction);
        self.last_distance = Some(distance);
        (reward, closer)
    }
}

fn push_bounded<T>(q: &mut VecDeque<T>, v: T, cap: usize) {
    q.push_back(v);
    while q.len() > cap {
        q.pop_front();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveEvaluation {
    pub reward: f32,
    pub distance: u32,
    pub closer: bool,
    pub streak: u32,
}

/// Structural effects of one confidence-only pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfidenceUpdate {
    pub paths_deleted: usize,
    pub nodes_mutated: usize,
    pub nodes_reset: usize,
}

#[inline]
fn signed_step(reward: f32, scale: f32) -> f32 {
    if reward > 0.0 {
        (reward * scale).max(MIN_CONFIDENCE_STEP)
    } else {
        (reward * scale).min(-MIN_CONFIDENCE_STEP)
    }
}

impl Network {
    pub fn movement(&self) -> &MovementTracker {
        &self.tracker
    }

    /// Reward a move by its change in distance to `goal`, then run the
    /// confidence-only pass with it.
    pub fn evaluate_move(
        &mut self,
        direction: Direction,
        goal: GridPos,
        head: GridPos,
    ) -> MoveEvaluation {
        let distance = head.manhattan(goal);
        let (reward, closer) = self.tracker.observe(direction, distance);
        if reward != 0.0 {
            self.update_confidence_from_reward(reward, Some(direction));
        }
        MoveEvaluation {
            reward,
            distance,
            closer,
            streak: self.tracker.streak(),
        }
    }

    /// Nudge the confidence of every fired path and node by `reward`.
    ///
    /// No weight gradient is computed. Confidence may go negative; crossing
    /// zero deletes a path or mutates a hidden node's nonlinearity.
    pub fn update_confidence_from_reward(
        &mut self,
        reward: f32,
        direction: Option<Direction>,
    ) -> ConfidenceUpdate {
        let mut outcome = ConfidenceUpdate::default();
        if !reward.is_finite() || reward == 0.0 {
            return outcome;
        }
        self.ensure_shapes();

        let path_step = signed_step(reward, PATH_REWARD_SCALE);
        let mut fired: Vec<Vec<bool>> = self.layers.iter().map(|l| vec![false; l.len()]).collect();
        let mut doomed = Vec::new();

        for p in &self.paths {
            fired[p.layer][p.from] = true;
            fired[p.layer + 1][p.to] = true;

            let c = &mut self.connections[p.layer].confidence[p.from][p.to];
            if reward > 0.0 {
                *c = (*c + path_step * (1.0 - *c)).min(1.0);
            } else {
                *c += path_step;
                if *c < 0.0 {
                    doomed.push((p.layer, p.from, p.to));
                }
            }
        }

        for &(layer, from, to) in &doomed {
            let conn = &mut self.connections[layer];
            conn.weights[from][to] = 0.0;
            conn.confidence[from][to] = 0.0;
            outcome.paths_deleted += 1;
            debug!(layer, from, to, "path deleted on negative confidence");
        }

        let node_step = signed_step(reward, NODE_REWARD_SCALE);
        for (l, mask) in fired.iter().enumerate() {
            let hidden = self.layers[l].is_hidden();
            for (n, _) in mask.iter().enumerate().filter(|(_, f)| **f) {
                let layer = &mut self.layers[l];
                let c = &mut layer.confidence[n];
                if reward > 0.0 {
                    *c = (*c + node_step * (1.0 - *c)).min(1.0);
                    continue;
                }
                *c += node_step;
                if *c >= 0.0 {
                    continue;
                }
                *c = crate::topology::NEUTRAL_CONFIDENCE;
                if hidden {
                    let from = layer.activations[n];
                    let to = from.mutate(&mut self.rng);
                    layer.activations[n] = to;
                    outcome.nodes_mutated += 1;
                    debug!(layer = l, node = n, from = from.name(), to = to.name(), "node mutated");
                } else {
                    outcome.nodes_reset += 1;
                }
            }
        }

        if reward < 0.0 {
            if let Some(dir) = direction {
                self.penalize_direction(dir, reward, &mut outcome, &mut doomed);
            }
        }

        // Deleted connections must not be trained later in this tick.
        if !doomed.is_empty() {
            self.paths.retain(|p| !doomed.contains(&(p.layer, p.from, p.to)));
        }

        self.stats.paths_deleted += outcome.paths_deleted as u64;
        self.stats.node_mutations += outcome.nodes_mutated as u64;
        if outcome.nodes_mutated > 0 {
            self.recount_activations();
        }
        outcome
    }

    /// Extra penalty on the incoming connections of the output node that
    /// chose `dir`, and half of it on the node itself per connection.
    fn penalize_direction(
        &mut self,
        dir: Direction,
        reward: f32,
        outcome: &mut ConfidenceUpdate,
        deleted: &mut Vec<(usize, usize, usize)>,
    ) {
        let out_node = dir.index();
        let conn_layer = self.connections.len().saturating_sub(1);
        let Some(out_layer) = self.layers.last_mut() else {
            return;
        };
        let Some(conn) = self.connections.last_mut() else {
            return;
        };
        if out_node >= out_layer.len() {
            return;
        }

        let penalty = (-MIN_CONFIDENCE_STEP * 2.0).min(-reward.abs() * DIRECTION_PENALTY_SCALE);
        for i in 0..conn.rows() {
            if conn.weights[i][out_node].abs() <= PENALTY_WEIGHT_FLOOR {
                continue;
            }
            conn.confidence[i][out_node] += penalty;
            if conn.confidence[i][out_node] < 0.0 {
                conn.weights[i][out_node] = 0.0;
                conn.confidence[i][out_node] = 0.0;
                outcome.paths_deleted += 1;
                deleted.push((conn_layer, i, out_node));
                debug!(from = i, direction = dir.name(), "output path deleted");
            }

            let node = &mut out_layer.confidence[out_node];
            *node += penalty / 2.0;
            if *node < 0.0 {
                *node = crate::topology::NEUTRAL_CONFIDENCE;
                outcome.nodes_reset += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::seeded;

    #[test]
    fn argmax_takes_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn selection_never_reverses() {
        let out = [0.9, 0.1, 0.5, 0.2];
        assert_eq!(select_action(&out, None), Some(Direction::Up));
        assert_eq!(select_action(&out, Some(Direction::Down)), Some(Direction::Down));
        assert_eq!(select_action(&out, Some(Direction::Left)), Some(Direction::Up));
        assert_eq!(Direction::Right.opposite(), Direction::Left);
    }

    #[test]
    fn movement_rewards_follow_distance_changes() {
        let mut t = MovementTracker::default();
        assert_eq!(t.observe(Direction::Up, 10), (0.0, false));

        let (r, closer) = t.observe(Direction::Up, 8);
        assert!(closer);
        assert!((r - 0.1).abs() < 1e-6);

        // Second consecutive improvement doubles.
        let (r, _) = t.observe(Direction::Up, 7);
        assert!((r - 0.125).abs() < 1e-6);
        assert_eq!(t.streak(), 2);

        let (r, closer) = t.observe(Direction::Left, 9);
        assert!(!closer);
        assert!((r + 0.1).abs() < 1e-6);
        assert_eq!(t.streak(), 0);

        let (r, _) = t.observe(Direction::Left, 9);
        assert!((r + 0.01).abs() < 1e-6);
        assert_eq!(t.wrong_directions().len(), 2);
        assert_eq!(t.correct_directions().len(), 2);
    }

    #[test]
    fn histories_are_bounded() {
        let mut t = MovementTracker::default();
        for d in 0..50u32 {
            t.observe(Direction::Right, 100 - d);
        }
        assert_eq!(t.distances().len(), DISTANCE_HISTORY);
        assert_eq!(t.correct_directions().len(), DIRECTION_HISTORY);
    }

    #[test]
    fn positive_reward_raises_confidence_up_to_one() {
        let mut net = seeded(41);
        net.forward([0.8, 0.3, 0.6, 0.1]);
        let p = net.paths()[0];
        let mut last = net.connections()[p.layer].confidence[p.from][p.to];
        for _ in 0..200 {
            net.update_confidence_from_reward(0.5, None);
            let c = net.connections()[p.layer].confidence[p.from][p.to];
            assert!(c >= last);
            assert!(c <= 1.0);
            last = c;
        }
        assert!(last > 0.9);
    }

    #[test]
    fn negative_confidence_deletes_path_in_same_update() {
        let mut net = seeded(42);
        net.forward([0.8, 0.3, 0.6, 0.1]);
        let p = net.paths()[0];
        net.connections_mut()[p.layer].confidence[p.from][p.to] = 0.05;
        let outcome = net.update_confidence_from_reward(-1.0, None);
        assert!(outcome.paths_deleted >= 1);
        assert_eq!(net.connections()[p.layer].weights[p.from][p.to], 0.0);
        assert_eq!(net.connections()[p.layer].confidence[p.from][p.to], 0.0);
        assert_eq!(net.stats().paths_deleted, outcome.paths_deleted as u64);
    }

    #[test]
    fn deleted_path_stays_deleted_through_training() {
        let mut net = seeded(47);
        net.update_params(&crate::network::LearningParamsUpdate {
            mutation_rate: Some(0.0),
            ..Default::default()
        });
        net.forward([0.8, 0.3, 0.6, 0.1]);
        let last = net.connections().len() - 1;
        let p = *net
            .paths()
            .iter()
            .find(|p| p.layer == last)
            .expect("output path");
        net.connections_mut()[p.layer].confidence[p.from][p.to] = 0.001;

        let outcome = net.update_confidence_from_reward(-0.1, None);
        assert!(outcome.paths_deleted >= 1);
        let listed = |net: &Network| {
            net.paths()
                .iter()
                .any(|q| (q.layer, q.from, q.to) == (p.layer, p.from, p.to))
        };
        assert!(!listed(&net));

        net.train_reward(-0.1);
        assert_eq!(net.connections()[p.layer].weights[p.from][p.to], 0.0);
        assert_eq!(net.connections()[p.layer].confidence[p.from][p.to], 0.0);
    }

    #[test]
    fn direction_penalty_deletions_leave_the_path_list() {
        let mut net = seeded(48);
        net.forward([0.8, 0.3, 0.6, 0.1]);
        let last = net.connections().len() - 1;
        let p = *net
            .paths()
            .iter()
            .find(|p| p.layer == last)
            .expect("output path");
        {
            let conn = &mut net.connections_mut()[p.layer];
            conn.weights[p.from][p.to] = 0.5;
            conn.confidence[p.from][p.to] = 0.15;
        }
        let dir = Direction::from_index(p.to).expect("direction");
        net.update_confidence_from_reward(-1.0, Some(dir));

        let conn = &net.connections()[p.layer];
        assert_eq!(conn.weights[p.from][p.to], 0.0);
        assert_eq!(conn.confidence[p.from][p.to], 0.0);
        assert!(!net
            .paths()
            .iter()
            .any(|q| (q.layer, q.from, q.to) == (p.layer, p.from, p.to)));
    }

    #[test]
    fn hidden_node_crossing_zero_mutates() {
        let mut net = seeded(43);
        net.forward([0.8, 0.3, 0.6, 0.1]);
        let p = *net
            .paths()
            .iter()
            .find(|p| net.layers()[p.layer + 1].is_hidden())
            .expect("hidden path");
        let (l, n) = (p.layer + 1, p.to);
        net.layers[l].confidence[n] = 0.01;
        let before = net.layers()[l].activations[n];
        let outcome = net.update_confidence_from_reward(-1.0, None);
        assert!(outcome.nodes_mutated >= 1);
        assert_ne!(net.layers()[l].activations[n], before);
        assert_eq!(net.layers()[l].confidence[n], 0.5);
        assert!(net.stats().node_mutations >= 1);
    }

    #[test]
    fn direction_penalty_hits_chosen_output() {
        let mut net = seeded(44);
        net.paths.clear();
        {
            let conn = net.connections_mut().last_mut().expect("output block");
            for row in &mut conn.weights {
                row.fill(0.5);
            }
        }
        net.update_confidence_from_reward(-0.5, Some(Direction::Right));
        let conn = net.connections().last().expect("output block");
        for i in 0..conn.rows() {
            assert!((conn.confidence[i][1] - 0.4).abs() < 1e-6);
            assert_eq!(conn.confidence[i][0], 0.5);
        }
        // Eight incoming connections, half the penalty each.
        let node = net.layers().last().expect("output layer").confidence[1];
        assert!((node - 0.1).abs() < 1e-5);
    }

    #[test]
    fn output_node_resets_instead_of_mutating() {
        let mut net = seeded(45);
        net.paths.clear();
        {
            let conn = net.connections_mut().last_mut().expect("output block");
            for row in &mut conn.weights {
                row.fill(0.5);
            }
        }
        let before = net.layers().last().expect("output layer").activations.clone();
        let outcome = net.update_confidence_from_reward(-1.0, Some(Direction::Up));
        // Eight connections at -0.1 each cross zero exactly once.
        assert_eq!(outcome.nodes_reset, 1);
        assert_eq!(outcome.nodes_mutated, 0);
        assert_eq!(net.layers().last().expect("output layer").activations, before);
    }

    #[test]
    fn evaluate_move_feeds_confidence_pass() {
        let mut net = seeded(46);
        let goal = GridPos::new(5, 5);
        net.forward([0.5, 0.1, 0.2, 0.9]);
        let first = net.evaluate_move(Direction::Right, goal, GridPos::new(0, 5));
        assert_eq!(first.reward, 0.0);
        assert_eq!(first.distance, 5);

        let p = net.paths()[0];
        let before = net.connections()[p.layer].confidence[p.from][p.to];
        let second = net.evaluate_move(Direction::Right, goal, GridPos::new(1, 5));
        assert!(second.closer);
        assert!(second.reward > 0.0);
        assert!(net.connections()[p.layer].confidence[p.from][p.to] > before);
    }
}
