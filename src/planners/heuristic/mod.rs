mod behavior;
mod steering;

pub use behavior::{BehaviorState, FallbackConfig, FallbackStateMachine};
pub use steering::{
    AttackSteering, EvadeSteering, PatrolSteering, PursueSteering, Steer, Steering,
    SurvivalSteering,
};
