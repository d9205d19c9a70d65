use std::f32::consts::TAU;

use crate::infra::Vec2;
use crate::planners::heuristic::behavior::FallbackConfig;
use crate::planners::rl::Direction;
use crate::state::WorldSnapshot;

/// Movement direction (or hover) and fire flag for one behavior
pub trait Steer {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Steering {
    Patrol(PatrolSteering),
    Pursue(PursueSteering),
    Evade(EvadeSteering),
    Attack(AttackSteering),
    Survive(SurvivalSteering),
}

impl Steer for Steering {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool) {
        match self {
            Steering::Patrol(s) => s.steer(world, config),
            Steering::Pursue(s) => s.steer(world, config),
            Steering::Evade(s) => s.steer(world, config),
            Steering::Attack(s) => s.steer(world, config),
            Steering::Survive(s) => s.steer(world, config),
        }
    }
}

/// Cycles through waypoints on a circle around the patrol centre
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatrolSteering;

impl PatrolSteering {
    pub fn waypoint(world: &WorldSnapshot, config: &FallbackConfig) -> Vec2 {
        let bounds = world.bounds();
        let center = Vec2::new(
            config.patrol_center.x * bounds.width,
            config.patrol_center.y * bounds.height,
        );
        let count = config.patrol_waypoints.max(1) as u64;
        let index = (world.stats.elapsed_frames / config.frames_per_waypoint.max(1)) % count;
        let angle = index as f32 * TAU / count as f32;
        let offset = Vec2::new(angle.cos(), angle.sin()) * config.patrol_radius;
        bounds.clamp(center + offset, 0.0)
    }
}

impl Steer for PatrolSteering {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool) {
        let to_waypoint = Self::waypoint(world, config) - world.agent.position;
        if to_waypoint.length() <= config.arrive_radius {
            return (None, false);
        }
        (Direction::from_vector(to_waypoint), false)
    }
}

/// Closes in on a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PursueSteering(pub Vec2);

impl Steer for PursueSteering {
    fn steer(&self, world: &WorldSnapshot, _config: &FallbackConfig) -> (Option<Direction>, bool) {
        (Direction::from_vector(self.0 - world.agent.position), false)
    }
}

/// Closes to standoff distance, then strafes around the target while firing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackSteering(pub Vec2);

impl Steer for AttackSteering {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool) {
        let to_target = self.0 - world.agent.position;
        let direction = if to_target.length() > config.attack_standoff {
            Direction::from_vector(to_target)
        } else {
            Direction::from_vector(to_target.perpendicular())
        };
        (direction, true)
    }
}

/// Moves directly away from a threat, sliding along the screen edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvadeSteering(pub Vec2);

impl EvadeSteering {
    /// Drops the components of `away` that would push into a nearby wall
    fn slide_along_walls(world: &WorldSnapshot, away: Vec2, margin: f32) -> Vec2 {
        let pos = world.agent.position;
        let bounds = world.bounds();
        let mut slide = away;
        if (pos.x < margin && slide.x < 0.0) || (pos.x > bounds.width - margin && slide.x > 0.0) {
            slide.x = 0.0;
        }
        if (pos.y < margin && slide.y < 0.0) || (pos.y > bounds.height - margin && slide.y > 0.0) {
            slide.y = 0.0;
        }
        slide
    }
}

impl Steer for EvadeSteering {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool) {
        let pos = world.agent.position;
        let to_center = world.bounds().center() - pos;
        // Threat on top of the agent: flee away from the screen centre, else straight up
        let away = (pos - self.0)
            .normalized()
            .or_else(|| (-to_center).normalized())
            .unwrap_or(Vec2::new(0.0, -1.0));

        let slide = Self::slide_along_walls(world, away, config.wall_margin);
        if let Some(direction) = Direction::from_vector(slide) {
            return (Some(direction), false);
        }

        // Pinned against a wall: sidestep, preferring the side facing the arena
        let side = away.perpendicular();
        let side = if side.dot(&to_center) >= 0.0 { side } else { -side };
        (Direction::from_vector(side), false)
    }
}

/// Low-health retreat: evades the given threat, otherwise heads for the
/// safe zone at the bottom centre of the screen. Never fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurvivalSteering(pub Option<Vec2>);

impl SurvivalSteering {
    pub fn safe_zone(world: &WorldSnapshot, config: &FallbackConfig) -> Vec2 {
        let bounds = world.bounds();
        let zone = Vec2::new(bounds.width * 0.5, bounds.height - config.safe_zone_inset);
        bounds.clamp(zone, 0.0)
    }
}

impl Steer for SurvivalSteering {
    fn steer(&self, world: &WorldSnapshot, config: &FallbackConfig) -> (Option<Direction>, bool) {
        if let Some(threat) = self.0 {
            let (direction, _) = EvadeSteering(threat).steer(world, config);
            return (direction, false);
        }
        let to_zone = Self::safe_zone(world, config) - world.agent.position;
        if to_zone.length() <= config.arrive_radius {
            return (None, false);
        }
        (Direction::from_vector(to_zone), false)
    }
}
