use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::infra::{Bounds, Vec2};

/// The controlled fighter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: i32,
    pub max_health: i32,
    /// Ticks until the next shot is allowed
    pub fire_cooldown: u32,
    pub bounds: Bounds,
}

impl AgentState {
    pub fn new(position: Vec2, bounds: Bounds) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            health: 3,
            max_health: 3,
            fire_cooldown: 0,
            bounds,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn can_fire(&self) -> bool {
        self.fire_cooldown == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyInfo {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Enemy is on a collision or firing course and should be avoided
    pub threat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulletOwner {
    Agent,
    Enemy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletInfo {
    pub position: Vec2,
    pub velocity: Vec2,
    pub owner: BulletOwner,
}

impl BulletInfo {
    pub fn is_hostile(&self) -> bool {
        self.owner == BulletOwner::Enemy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerUpKind {
    Health,
    RapidFire,
    Score,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 3] = [PowerUpKind::Health, PowerUpKind::RapidFire, PowerUpKind::Score];

    /// Encode the kind as a normalized float
    pub fn code(&self) -> f32 {
        match self {
            PowerUpKind::Health => -1.0,
            PowerUpKind::RapidFire => 0.0,
            PowerUpKind::Score => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUpInfo {
    pub position: Vec2,
    pub kind: PowerUpKind,
}

/// Scalar game progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub elapsed_frames: u64,
    pub score: u32,
    /// Difficulty in `[0, 1]`
    pub difficulty: f32,
}

/// Read-only view of the world handed to the controller each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub agent: AgentState,
    pub enemies: Vec<EnemyInfo>,
    pub bullets: Vec<BulletInfo>,
    pub power_ups: Vec<PowerUpInfo>,
    pub stats: GameStats,
}

impl WorldSnapshot {
    pub fn new(agent: AgentState) -> Self {
        Self {
            agent,
            enemies: Vec::new(),
            bullets: Vec::new(),
            power_ups: Vec::new(),
            stats: GameStats::default(),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.agent.bounds
    }

    /// Checks that every field can be encoded without producing NaN
    pub fn validate(&self) -> Result<(), EncodeError> {
        let agent = &self.agent;
        if !agent.bounds.is_valid() {
            return Err(EncodeError::InvalidWorldState(format!(
                "screen bounds must be positive and finite, got {}x{}",
                agent.bounds.width, agent.bounds.height
            )));
        }
        if agent.max_health <= 0 {
            return Err(EncodeError::InvalidWorldState(format!(
                "max health must be positive, got {}",
                agent.max_health
            )));
        }
        if !agent.position.is_finite() || !agent.velocity.is_finite() {
            return Err(EncodeError::InvalidWorldState(
                "agent position or velocity is not finite".to_string(),
            ));
        }
        if let Some(i) = self
            .enemies
            .iter()
            .position(|e| !e.position.is_finite() || !e.velocity.is_finite())
        {
            return Err(EncodeError::InvalidWorldState(format!("enemy {i} is not finite")));
        }
        if let Some(i) = self
            .bullets
            .iter()
            .position(|b| !b.position.is_finite() || !b.velocity.is_finite())
        {
            return Err(EncodeError::InvalidWorldState(format!("bullet {i} is not finite")));
        }
        if let Some(i) = self.power_ups.iter().position(|p| !p.position.is_finite()) {
            return Err(EncodeError::InvalidWorldState(format!("power-up {i} is not finite")));
        }
        if !self.stats.difficulty.is_finite() {
            return Err(EncodeError::InvalidWorldState("difficulty is not finite".to_string()));
        }
        Ok(())
    }

    /// Nearest enemy of any kind, with its distance
    pub fn nearest_enemy(&self) -> Option<(&EnemyInfo, f32)> {
        let origin = self.agent.position;
        self.enemies
            .iter()
            .map(|e| (e, origin.distance(&e.position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Nearest threat: flagged enemies and enemy-owned bullets
    pub fn nearest_threat(&self) -> Option<(Vec2, f32)> {
        let origin = self.agent.position;
        let enemies = self.enemies.iter().filter(|e| e.threat).map(|e| e.position);
        let bullets = self.bullets.iter().filter(|b| b.is_hostile()).map(|b| b.position);
        enemies
            .chain(bullets)
            .map(|p| (p, origin.distance(&p)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}
