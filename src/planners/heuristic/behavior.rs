use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::infra::Vec2;
use crate::planners::heuristic::steering::{
    AttackSteering, EvadeSteering, PatrolSteering, PursueSteering, Steer, Steering,
    SurvivalSteering,
};
use crate::planners::rl::ActionId;
use crate::state::WorldSnapshot;

/// Persistent behavior mode of the rule-based controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BehaviorState {
    #[default]
    Patrol,
    Pursue,
    Evade,
    Attack,
}

impl fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BehaviorState::Patrol => "patrol",
            BehaviorState::Pursue => "pursue",
            BehaviorState::Evade => "evade",
            BehaviorState::Attack => "attack",
        };
        f.write_str(name)
    }
}

/// Thresholds and patrol layout for the fallback state machine
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Enter EVADE when a threat is closer than this
    pub evade_distance: f32,
    /// EVADE is kept until the threat is farther than `evade_distance + hysteresis_margin`
    pub hysteresis_margin: f32,
    /// Start pursuing targets inside this range
    pub pursue_range: f32,
    /// Attack targets inside this range
    pub fire_range: f32,
    /// Inside this distance ATTACK strafes instead of closing in
    pub attack_standoff: f32,
    /// Maximum angle (degrees) between fire direction and target for an opportunistic shot
    pub align_tolerance_deg: f32,
    /// Direction the agent's guns point
    pub fire_direction: Vec2,
    /// Patrol centre as a fraction of the screen size
    pub patrol_center: Vec2,
    pub patrol_radius: f32,
    pub patrol_waypoints: u32,
    pub frames_per_waypoint: u64,
    /// Hover once this close to the waypoint
    pub arrive_radius: f32,
    /// Within this distance of a screen edge, evasion slides along the wall
    pub wall_margin: f32,
    /// At or below this health the agent only evades or retreats and never fires
    pub protect_health: i32,
    /// Height of the retreat point above the bottom edge; it sits at the horizontal centre
    pub safe_zone_inset: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            evade_distance: 80.0,
            hysteresis_margin: 30.0,
            pursue_range: 300.0,
            fire_range: 200.0,
            attack_standoff: 60.0,
            align_tolerance_deg: 10.0,
            fire_direction: Vec2::new(0.0, -1.0),
            patrol_center: Vec2::new(0.25, 0.75),
            patrol_radius: 80.0,
            patrol_waypoints: 4,
            frames_per_waypoint: 60,
            arrive_radius: 8.0,
            wall_margin: 40.0,
            protect_health: 1,
            safe_zone_inset: 80.0,
        }
    }
}

impl FallbackConfig {
    /// Distance at which EVADE is released
    pub fn evade_exit_distance(&self) -> f32 {
        self.evade_distance + self.hysteresis_margin
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.evade_distance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "evade distance must be positive, got {}",
                self.evade_distance
            )));
        }
        if !(self.hysteresis_margin > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "hysteresis margin must be positive, got {}",
                self.hysteresis_margin
            )));
        }
        if !(self.fire_range > 0.0 && self.fire_range < self.pursue_range) {
            return Err(ConfigError::Invalid(format!(
                "fire range {} must be positive and below pursue range {}",
                self.fire_range, self.pursue_range
            )));
        }
        if self.fire_direction.normalized().is_none() {
            return Err(ConfigError::Invalid("fire direction must be non-zero".to_string()));
        }
        if !(self.safe_zone_inset >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "safe zone inset must be non-negative, got {}",
                self.safe_zone_inset
            )));
        }
        if self.patrol_waypoints == 0 || self.frames_per_waypoint == 0 {
            return Err(ConfigError::Invalid(
                "patrol needs at least one waypoint and a positive dwell time".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deterministic rule-based decision source.
///
/// The machine itself is stateless: the caller owns the `BehaviorState` and
/// threads it through `decide`, so several agents can share one machine.
#[derive(Debug, Clone, Default)]
pub struct FallbackStateMachine {
    config: FallbackConfig,
}

impl FallbackStateMachine {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Picks an action for this tick and the behavior state for the next one
    pub fn decide(&self, world: &WorldSnapshot, state: BehaviorState) -> (ActionId, BehaviorState) {
        let threat = world.nearest_threat();
        let target = world.nearest_enemy().map(|(enemy, dist)| (enemy.position, dist));

        let next = self.transition(state, threat.map(|t| t.1), target.map(|t| t.1));
        if next != state {
            debug!(
                "Behavior {} -> {} (threat={:?}, target={:?})",
                state,
                next,
                threat.map(|t| t.1),
                target.map(|t| t.1)
            );
        }

        let protect = world.agent.health <= self.config.protect_health;
        let steering = match (next, threat, target) {
            (BehaviorState::Evade, Some((threat_pos, _)), _) => {
                Steering::Evade(EvadeSteering(threat_pos))
            }
            _ if protect => {
                let nearby = threat.filter(|(_, dist)| *dist <= self.config.pursue_range);
                Steering::Survive(SurvivalSteering(nearby.map(|(pos, _)| pos)))
            }
            (BehaviorState::Attack, _, Some((target_pos, _))) => {
                Steering::Attack(AttackSteering(target_pos))
            }
            (BehaviorState::Pursue, _, Some((target_pos, _))) => {
                Steering::Pursue(PursueSteering(target_pos))
            }
            _ => Steering::Patrol(PatrolSteering),
        };

        let (direction, mut fire) = steering.steer(world, &self.config);
        if !fire && !protect {
            fire = self.target_aligned(world, target);
        }

        (ActionId::from_parts(direction, fire), next)
    }

    /// State transition given the nearest threat and target distances
    pub fn transition(
        &self,
        state: BehaviorState,
        threat_distance: Option<f32>,
        target_distance: Option<f32>,
    ) -> BehaviorState {
        let config = &self.config;
        let threat = threat_distance.unwrap_or(f32::INFINITY);

        let evading = match state {
            BehaviorState::Evade => threat <= config.evade_exit_distance(),
            _ => threat < config.evade_distance,
        };
        if evading {
            return BehaviorState::Evade;
        }

        let target = target_distance.unwrap_or(f32::INFINITY);
        let in_pursuit = target <= config.pursue_range;
        let in_fire_range = target < config.fire_range;

        match state {
            BehaviorState::Patrol | BehaviorState::Evade => {
                if state == BehaviorState::Patrol && in_pursuit {
                    BehaviorState::Pursue
                } else {
                    BehaviorState::Patrol
                }
            }
            BehaviorState::Pursue | BehaviorState::Attack => {
                if in_fire_range {
                    BehaviorState::Attack
                } else if in_pursuit {
                    BehaviorState::Pursue
                } else {
                    BehaviorState::Patrol
                }
            }
        }
    }

    /// Whether the nearest target in range lies along the fire direction
    fn target_aligned(&self, world: &WorldSnapshot, target: Option<(Vec2, f32)>) -> bool {
        let Some((target_pos, dist)) = target else {
            return false;
        };
        if dist > self.config.pursue_range {
            return false;
        }
        let (Some(to_target), Some(aim)) = (
            (target_pos - world.agent.position).normalized(),
            self.config.fire_direction.normalized(),
        ) else {
            return false;
        };
        let cos_tolerance = self.config.align_tolerance_deg.to_radians().cos();
        to_target.dot(&aim) >= cos_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Bounds;
    use crate::planners::rl::{Direction, NUM_ACTIONS};
    use crate::state::{AgentState, BulletInfo, BulletOwner, EnemyInfo};

    fn world_at(agent: Vec2) -> WorldSnapshot {
        WorldSnapshot::new(AgentState::new(agent, Bounds::new(1280.0, 720.0)))
    }

    fn enemy(x: f32, y: f32, threat: bool) -> EnemyInfo {
        EnemyInfo {
            position: Vec2::new(x, y),
            velocity: Vec2::ZERO,
            threat,
        }
    }

    #[test]
    fn test_default_state_is_patrol() {
        assert_eq!(BehaviorState::default(), BehaviorState::Patrol);
    }

    #[test]
    fn test_config_validation() {
        assert!(FallbackConfig::default().validate().is_ok());
        let bad = FallbackConfig {
            hysteresis_margin: 0.0,
            ..FallbackConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FallbackConfig {
            fire_range: 400.0,
            ..FallbackConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_evade_scenario() {
        let machine = FallbackStateMachine::new(FallbackConfig {
            evade_distance: 50.0,
            ..FallbackConfig::default()
        });
        let mut world = world_at(Vec2::new(100.0, 100.0));
        world.enemies.push(enemy(110.0, 100.0, true));

        let (action, state) = machine.decide(&world, BehaviorState::Patrol);
        assert_eq!(state, BehaviorState::Evade);
        assert_eq!(action.direction(), Some(Direction::West));
    }

    #[test]
    fn test_hysteresis() {
        let machine = FallbackStateMachine::default();
        let enter = machine.config().evade_distance;
        let exit = machine.config().evade_exit_distance();
        assert!(exit > enter);

        let mut state = machine.transition(BehaviorState::Patrol, Some(enter - 1.0), None);
        assert_eq!(state, BehaviorState::Evade);

        // Oscillating around the entry threshold never leaves EVADE
        for d in [enter + 1.0, enter - 1.0, enter + 10.0, exit - 0.5, exit] {
            state = machine.transition(state, Some(d), None);
            assert_eq!(state, BehaviorState::Evade, "left evade at {d}");
        }

        state = machine.transition(state, Some(exit + 0.5), None);
        assert_eq!(state, BehaviorState::Patrol);

        // Re-entry still needs the strict entry distance
        state = machine.transition(state, Some(enter + 1.0), None);
        assert_eq!(state, BehaviorState::Patrol);
    }

    #[test]
    fn test_patrol_pursue_attack_chain() {
        let machine = FallbackStateMachine::default();
        let state = machine.transition(BehaviorState::Patrol, None, Some(250.0));
        assert_eq!(state, BehaviorState::Pursue);
        let state = machine.transition(state, None, Some(150.0));
        assert_eq!(state, BehaviorState::Attack);
        let state = machine.transition(state, None, Some(250.0));
        assert_eq!(state, BehaviorState::Pursue);
        let state = machine.transition(state, None, Some(900.0));
        assert_eq!(state, BehaviorState::Patrol);
    }

    #[test]
    fn test_evade_overrides_attack() {
        let machine = FallbackStateMachine::default();
        let state = machine.transition(BehaviorState::Attack, Some(20.0), Some(20.0));
        assert_eq!(state, BehaviorState::Evade);
    }

    #[test]
    fn test_attack_fires() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(300.0, 500.0));
        world.enemies.push(enemy(450.0, 420.0, false));

        let (action, state) = machine.decide(&world, BehaviorState::Pursue);
        assert_eq!(state, BehaviorState::Attack);
        assert!(action.fires());
        assert!(action.direction().is_some());
    }

    #[test]
    fn test_aligned_target_fires_while_pursuing() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(300.0, 600.0));
        // Straight above, outside fire range but inside pursue range
        world.enemies.push(enemy(300.0, 350.0, false));

        let (action, state) = machine.decide(&world, BehaviorState::Patrol);
        assert_eq!(state, BehaviorState::Pursue);
        assert!(action.fires());
        assert_eq!(action.direction(), Some(Direction::North));
    }

    #[test]
    fn test_hostile_bullet_triggers_evade() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(640.0, 400.0));
        world.bullets.push(BulletInfo {
            position: Vec2::new(640.0, 350.0),
            velocity: Vec2::new(0.0, 6.0),
            owner: BulletOwner::Enemy,
        });

        let (action, state) = machine.decide(&world, BehaviorState::Patrol);
        assert_eq!(state, BehaviorState::Evade);
        assert_eq!(action.direction(), Some(Direction::South));
    }

    #[test]
    fn test_actions_always_in_set() {
        let machine = FallbackStateMachine::default();
        let mut state = BehaviorState::Patrol;
        let mut world = world_at(Vec2::new(200.0, 500.0));
        world.enemies.push(enemy(600.0, 100.0, true));
        for frame in 0..400u64 {
            world.stats.elapsed_frames = frame;
            world.enemies[0].position = Vec2::new(600.0 - frame as f32, 100.0 + frame as f32);
            let (action, next) = machine.decide(&world, state);
            assert!(action.index() < NUM_ACTIONS);
            state = next;
        }
    }

    #[test]
    fn test_low_health_retreats_without_firing() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(640.0, 600.0));
        world.agent.health = 1;
        // Not a threat, well inside fire range
        world.enemies.push(enemy(640.0, 450.0, false));

        let (action, state) = machine.decide(&world, BehaviorState::Pursue);
        assert_eq!(state, BehaviorState::Attack);
        assert!(!action.fires());
        // Safe zone is (640, 640)
        assert_eq!(action.direction(), Some(Direction::South));

        world.agent.position = Vec2::new(640.0, 640.0);
        let (action, _) = machine.decide(&world, BehaviorState::Attack);
        assert_eq!(action, ActionId::NO_OP);
    }

    #[test]
    fn test_low_health_evades_distant_threat() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(640.0, 400.0));
        world.agent.health = 1;
        // Outside the evade distance, still a threat
        world.enemies.push(enemy(520.0, 400.0, true));

        let (action, state) = machine.decide(&world, BehaviorState::Patrol);
        assert_ne!(state, BehaviorState::Evade);
        assert!(!action.fires());
        assert_eq!(action.direction(), Some(Direction::East));
    }

    #[test]
    fn test_healthy_agent_still_attacks() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(640.0, 600.0));
        world.agent.health = 2;
        world.enemies.push(enemy(640.0, 450.0, false));
        let (action, _) = machine.decide(&world, BehaviorState::Attack);
        assert!(action.fires());
    }

    #[test]
    fn test_decide_is_pure() {
        let machine = FallbackStateMachine::default();
        let mut world = world_at(Vec2::new(200.0, 500.0));
        world.enemies.push(enemy(260.0, 380.0, false));
        world.stats.elapsed_frames = 77;
        let a = machine.decide(&world, BehaviorState::Pursue);
        let b = machine.decide(&world, BehaviorState::Pursue);
        assert_eq!(a, b);
    }
}
