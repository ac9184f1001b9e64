use diamondnet::network::Network;
use diamondnet::observer::NetworkAdapter;
use diamondnet::prng::Prng;
use diamondnet::reward::{select_action, Direction, GridPos};
use tracing::info;

const FOOD_REWARD: f32 = 1.0;
const WALL_PENALTY: f32 = -1.0;

#[derive(Debug, Clone, Copy)]
pub struct GridConfig {
    pub width: i32,
    pub height: i32,
    pub episodes: usize,
    pub max_steps: usize,
    pub report_every: usize,
    pub seed: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            episodes: 50,
            max_steps: 400,
            report_every: 10,
            seed: 2026,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GridSummary {
    pub episodes: usize,
    pub food_eaten: usize,
    pub wall_hits: usize,
    pub timeouts: usize,
    pub best_episode: usize,
}

struct GridState {
    head: GridPos,
    food: GridPos,
    direction: Option<Direction>,
    rng: Prng,
}

impl GridState {
    fn new(cfg: &GridConfig, rng: Prng) -> Self {
        let mut s = Self {
            head: GridPos::new(cfg.width / 2, cfg.height / 2),
            food: GridPos::default(),
            direction: None,
            rng,
        };
        s.place_food(cfg);
        s
    }

    fn reset(&mut self, cfg: &GridConfig) {
        self.head = GridPos::new(cfg.width / 2, cfg.height / 2);
        self.direction = None;
        self.place_food(cfg);
    }

    fn place_food(&mut self, cfg: &GridConfig) {
        loop {
            let food = GridPos::new(
                self.rng.gen_index(cfg.width as usize) as i32,
                self.rng.gen_index(cfg.height as usize) as i32,
            );
            if food != self.head {
                self.food = food;
                return;
            }
        }
    }

    /// Distance to the food along each direction, normalized to [0, 1].
    fn observe(&self, cfg: &GridConfig) -> [f32; 4] {
        let dx = self.food.x - self.head.x;
        let dy = self.food.y - self.head.y;
        let w = cfg.width as f32;
        let h = cfg.height as f32;
        [
            (-dy).max(0) as f32 / h,
            dx.max(0) as f32 / w,
            dy.max(0) as f32 / h,
            (-dx).max(0) as f32 / w,
        ]
    }

    fn in_bounds(&self, cfg: &GridConfig) -> bool {
        (0..cfg.width).contains(&self.head.x) && (0..cfg.height).contains(&self.head.y)
    }
}

/// Drive the network through `cfg.episodes` food-chasing episodes.
pub fn run_grid_demo(net: &mut Network, cfg: GridConfig) -> GridSummary {
    let mut state = GridState::new(&cfg, Prng::new(cfg.seed));
    let mut summary = GridSummary::default();

    for episode in 0..cfg.episodes {
        state.reset(&cfg);
        net.reset_episode();
        let mut eaten = 0;
        let mut ended = false;

        for _ in 0..cfg.max_steps {
            let output = net.forward(state.observe(&cfg));
            let Some(dir) = select_action(&output, state.direction) else {
                break;
            };
            let (ox, oy) = dir.offset();
            state.head = GridPos::new(state.head.x + ox, state.head.y + oy);
            state.direction = Some(dir);

            let reward = if !state.in_bounds(&cfg) {
                summary.wall_hits += 1;
                ended = true;
                WALL_PENALTY
            } else if state.head == state.food {
                eaten += 1;
                state.place_food(&cfg);
                FOOD_REWARD
            } else {
                net.evaluate_move(dir, state.food, state.head).reward
            };

            net.train_reward(reward);
            net.adapt_structure();
            net.verify_integrity();

            if ended {
                break;
            }
        }

        if !ended {
            summary.timeouts += 1;
        }
        summary.food_eaten += eaten;
        summary.best_episode = summary.best_episode.max(eaten);
        summary.episodes += 1;

        if cfg.report_every > 0 && (episode + 1) % cfg.report_every == 0 {
            let view = NetworkAdapter::new(net).snapshot();
            info!(
                episode = episode + 1,
                eaten,
                total = summary.food_eaten,
                density = view.density,
                iterations = view.stats.training_iterations,
                mean_reward = view.stats.mean_reward(),
                pruned = view.stats.pruned,
                grown = view.stats.grown + view.stats.boosted,
                "episode"
            );
        }
    }
    summary
}
