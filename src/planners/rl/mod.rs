//! Learned-policy side of the controller and the environment that trains it
//!
//! Training and play share the encoder and the action decoder, so a policy
//! always sees observations and emits actions with one meaning.
//!
//! # Architecture
//!
//! ```text
//! WorldSnapshot
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StateEncoder                                               │
//! │  - Fixed-length observation, nearest entities first         │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PolicyInferenceEngine                                      │
//! │  - Normalize, burn MLP forward, greedy action               │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ActionId → decode() → Intent (direction, fire)             │
//! └─────────────────────────────────────────────────────────────┘
//!
//! RLEnv: reset/step over the headless Arena with the same encoder and
//! decoder; BatchEnv steps many of them in parallel.
//! ```

pub mod action_space;
pub mod encoder;
pub mod env;
pub mod executor;
pub mod metrics;
pub mod policy;
pub mod reward;
pub mod sim;
pub mod train;

// Re-export commonly used types
pub use action_space::{
    ActionId, Direction, FIRE_ONLY, Intent, NO_OP, NUM_ACTIONS, decode, decode_raw,
};
pub use encoder::{EncoderConfig, ObservationVector, StateEncoder};
pub use env::{
    BatchEnv, EnvConfig, Episode, RLEnv, StepInfo, StepResult, TerminationReason,
    TrainingEnvironment, Transition,
};
pub use executor::{InferenceConfig, InferenceStats, PolicyInferenceEngine};
pub use metrics::{EvaluationMetrics, MovingAverage, TrainingMetrics};
pub use policy::{LayerWeights, Normalization, Policy, PolicyBackend, PolicyNet};
pub use reward::{RewardComponents, RewardWeights};
pub use sim::{Arena, ArenaConfig, TickEvents};
pub use train::{Algorithm, TrainConfig, Trainer, write_initial_policy};
