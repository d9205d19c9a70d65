pub mod controller;
pub mod error;
pub mod infra;
pub mod planners;
pub mod state;

// Re-export commonly used types for convenience
pub use controller::{
    ControlOutput, Controller, ControllerConfig, ControllerStats, DecisionOrigin, DecisionSource,
    arbitrate,
};
pub use infra::{Bounds, MotionConfig, MotionSmoother, Vec2};
pub use planners::heuristic::{BehaviorState, FallbackConfig, FallbackStateMachine};
pub use planners::rl::{ActionId, ObservationVector, Policy, PolicyInferenceEngine, StateEncoder};
pub use state::WorldSnapshot;
