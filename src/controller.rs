//! Per-agent controller: picks a decision source each tick and smooths its output
//!
//! The rule-based state machine runs every tick so its behavior state always
//! tracks the world. When a policy is loaded, its action stands unless the
//! state machine is evading or the agent is low on health, in which case the
//! state machine's non-firing survival action is played. The first policy
//! failure permanently switches the controller to rules for the session.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::infra::{MotionConfig, MotionSmoother, Vec2};
use crate::planners::heuristic::{BehaviorState, FallbackConfig, FallbackStateMachine};
use crate::planners::rl::{
    ActionId, EncoderConfig, InferenceConfig, Policy, PolicyInferenceEngine, StateEncoder, decode,
};
use crate::state::{AgentState, WorldSnapshot};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub encoder: EncoderConfig,
    pub fallback: FallbackConfig,
    pub motion: MotionConfig,
    pub inference: InferenceConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            fallback: FallbackConfig::default(),
            motion: MotionConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fallback.validate()?;
        if !(self.motion.max_speed >= 0.0 && self.motion.max_acceleration > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "motion limits must be non-negative speed and positive acceleration, got {} / {}",
                self.motion.max_speed, self.motion.max_acceleration
            )));
        }
        if !(self.encoder.max_speed > 0.0) {
            return Err(ConfigError::Invalid(
                "encoder velocity scale must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where actions come from; chosen at construction, demoted to `Fallback` on failure
#[derive(Debug)]
pub enum DecisionSource {
    Policy(PolicyInferenceEngine),
    Fallback,
}

impl DecisionSource {
    pub fn is_policy(&self) -> bool {
        matches!(self, DecisionSource::Policy(_))
    }
}

/// Which rule produced a tick's action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOrigin {
    Policy,
    Fallback,
    /// The state machine is evading and vetoed the policy
    EvadeOverride,
    /// Health is at or below `FallbackConfig::protect_health`
    LowHealthOverride,
    /// The world could not be read this tick
    SafeNoOp,
}

/// What the game loop applies to the agent for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    pub velocity: Vec2,
    pub fire: bool,
    pub action: ActionId,
    pub origin: DecisionOrigin,
    pub behavior: BehaviorState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ticks: u64,
    pub policy_decisions: u64,
    pub fallback_decisions: u64,
    pub overrides: u64,
    /// Ticks answered with the safe no-op
    pub degraded_ticks: u64,
    pub policy_load_attempts: u32,
}

/// Precedence between a policy action and the state machine's decision.
///
/// EVADE vetoes the policy, then low health hands the tick to the rules'
/// survival action, otherwise the policy action stands.
pub fn arbitrate(
    policy_action: ActionId,
    fallback: (ActionId, BehaviorState),
    agent: &AgentState,
    config: &ControllerConfig,
) -> (ActionId, DecisionOrigin) {
    let (fallback_action, behavior) = fallback;
    if behavior == BehaviorState::Evade {
        (fallback_action, DecisionOrigin::EvadeOverride)
    } else if agent.health <= config.fallback.protect_health {
        (fallback_action, DecisionOrigin::LowHealthOverride)
    } else {
        (policy_action, DecisionOrigin::Policy)
    }
}

/// Drives one agent; owned exclusively by that agent
#[derive(Debug)]
pub struct Controller {
    config: ControllerConfig,
    encoder: StateEncoder,
    fallback: FallbackStateMachine,
    smoother: MotionSmoother,
    source: DecisionSource,
    behavior: BehaviorState,
    velocity: Vec2,
    stats: ControllerStats,
}

impl Controller {
    /// Creates a controller, loading the policy at `policy_path` if given.
    ///
    /// A policy that fails to load is reported and the controller runs on
    /// rules for the rest of the session.
    pub fn new(config: ControllerConfig, policy_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut controller = Self::with_source(config, DecisionSource::Fallback)?;

        match policy_path {
            Some(path) => {
                controller.stats.policy_load_attempts += 1;
                let obs_size = controller.encoder.obs_size();
                match PolicyInferenceEngine::load(path, obs_size, controller.config.inference.clone())
                {
                    Ok(engine) => controller.source = DecisionSource::Policy(engine),
                    Err(e) => warn!("Policy unavailable, using rule-based control: {}", e),
                }
            }
            None => info!("No policy configured, using rule-based control"),
        }
        Ok(controller)
    }

    /// Creates a controller around an already loaded, possibly shared policy
    pub fn with_policy(config: ControllerConfig, policy: Arc<Policy>) -> Result<Self, ConfigError> {
        let mut controller = Self::with_source(config, DecisionSource::Fallback)?;
        let obs_size = controller.encoder.obs_size();
        if policy.observation_size() == obs_size {
            let engine = PolicyInferenceEngine::new(policy, controller.config.inference.clone());
            controller.source = DecisionSource::Policy(engine);
        } else {
            warn!(
                "Policy expects {} observation values, encoder produces {}; using rule-based control",
                policy.observation_size(),
                obs_size
            );
        }
        Ok(controller)
    }

    fn with_source(config: ControllerConfig, source: DecisionSource) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            encoder: StateEncoder::new(config.encoder.clone()),
            fallback: FallbackStateMachine::new(config.fallback.clone()),
            smoother: MotionSmoother::new(config.motion.clone()),
            source,
            behavior: BehaviorState::default(),
            velocity: Vec2::ZERO,
            stats: ControllerStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn source(&self) -> &DecisionSource {
        &self.source
    }

    pub fn is_policy_active(&self) -> bool {
        self.source.is_policy()
    }

    pub fn behavior(&self) -> BehaviorState {
        self.behavior
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Forget per-round state; the decision source is kept for the session
    pub fn reset(&mut self) {
        self.behavior = BehaviorState::default();
        self.velocity = Vec2::ZERO;
    }

    /// Decide, decode and smooth one tick
    pub fn tick(&mut self, world: &WorldSnapshot) -> ControlOutput {
        self.stats.ticks += 1;

        let (action, origin) = match world.validate() {
            Ok(()) => self.decide(world),
            Err(e) => {
                warn!("Skipping decision this tick: {}", e);
                (ActionId::NO_OP, DecisionOrigin::SafeNoOp)
            }
        };

        match origin {
            DecisionOrigin::Policy => self.stats.policy_decisions += 1,
            DecisionOrigin::Fallback => self.stats.fallback_decisions += 1,
            DecisionOrigin::EvadeOverride | DecisionOrigin::LowHealthOverride => {
                self.stats.overrides += 1
            }
            DecisionOrigin::SafeNoOp => self.stats.degraded_ticks += 1,
        }

        let intent = decode(action);
        self.velocity = self.smoother.smooth_direction(intent.direction, self.velocity);

        ControlOutput {
            velocity: self.velocity,
            fire: intent.fire,
            action,
            origin,
            behavior: self.behavior,
        }
    }

    fn decide(&mut self, world: &WorldSnapshot) -> (ActionId, DecisionOrigin) {
        let previous = self.behavior;
        let fallback = self.fallback.decide(world, previous);

        let DecisionSource::Policy(engine) = &mut self.source else {
            self.behavior = fallback.1;
            return (fallback.0, DecisionOrigin::Fallback);
        };

        let observation = match self.encoder.encode(world) {
            Ok(obs) => obs,
            Err(e) => {
                warn!("Cannot encode world for the policy this tick: {}", e);
                return (ActionId::NO_OP, DecisionOrigin::SafeNoOp);
            }
        };

        self.behavior = fallback.1;
        match engine.infer(&observation) {
            Ok(policy_action) => {
                let (action, origin) =
                    arbitrate(policy_action, fallback, &world.agent, &self.config);
                if origin != DecisionOrigin::Policy {
                    debug!("{:?}: policy chose {}, playing {}", origin, policy_action, action);
                }
                (action, origin)
            }
            Err(e) => {
                error!(
                    "Policy inference failed, switching to rule-based control for this session: {}",
                    e
                );
                self.source = DecisionSource::Fallback;
                (fallback.0, DecisionOrigin::Fallback)
            }
        }
    }
}
