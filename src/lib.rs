//! # diamondnet
//!
//! A small online-learning network with a fixed "diamond" topology:
//! expand, fully connect, contract.
//!
//! Routing differs per stage (fan-out, full mesh, fan-in, index-aligned
//! bridges), training only touches connections that fired on the last pass,
//! and every connection carries a confidence that scales its learning rate and
//! drives pruning, growth and nonlinearity mutation.
//!
//! ## Quick Start
//!
//! ```
//! use diamondnet::prelude::*;
//!
//! let mut net = Network::new(NetworkConfig::default().with_seed(42));
//!
//! // One decision tick: distances to the goal in [up, right, down, left].
//! let report = net.tick([0.2, 0.9, 0.4, 0.1], Some(TrainSignal::Reward(1.0)));
//! let action = select_action(&report.output, None);
//! assert!(action.is_some());
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): JSON snapshots and config deserialization
//!
//! ## Modules
//!
//! - [`topology`]: Stage layout, routing, shape validation
//! - [`network`]: Network aggregate and forward pass
//! - [`trainer`]: Confidence-weighted backpropagation
//! - [`reward`]: Movement reward, confidence-only updates, action selection
//! - [`plasticity`]: Density-driven pruning and growth
//! - [`integrity`]: Non-finite repair and magnitude clamps
//! - [`snapshot`] / [`image`]: Persistence
//! - [`observer`]: Read-only observation adapters

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/activation.rs"]
pub mod activation;

#[path = "core/topology.rs"]
pub mod topology;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/trainer.rs"]
pub mod trainer;

#[path = "core/reward.rs"]
pub mod reward;

#[path = "core/plasticity.rs"]
pub mod plasticity;

#[path = "core/integrity.rs"]
pub mod integrity;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/snapshot.rs"]
pub mod snapshot;

#[path = "core/image.rs"]
pub mod image;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use diamondnet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::activation::Activation;
    pub use crate::error::LoadError;
    pub use crate::integrity::{IntegrityReport, Repair};
    pub use crate::network::{
        Input, LearningParams, LearningParamsUpdate, Network, NetworkConfig, Path, Stats,
        TickReport, TrainSignal,
    };
    pub use crate::observer::{NetworkAdapter, NetworkView};
    pub use crate::plasticity::{PlasticityOutcome, StructuralChange};
    pub use crate::reward::{select_action, Direction, GridPos, MoveEvaluation};
    pub use crate::snapshot::NetworkSnapshot;
    pub use crate::topology::{Route, ShapeRepair, Stage, Topology};
}
