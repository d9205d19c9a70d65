//! State encoder for RL - converts a WorldSnapshot into a fixed-length observation

use crate::error::EncodeError;
use crate::infra::{Bounds, Vec2};
use crate::state::{AgentState, WorldSnapshot};

/// Agent block: position (2), velocity (2), health (1), cooldown (1)
pub const AGENT_FEATURES: usize = 6;
/// Enemy slot: present (1), position (2), velocity (2), threat (1)
pub const ENEMY_FEATURES: usize = 6;
/// Bullet slot: present (1), position (2), velocity (2), hostility (1)
pub const BULLET_FEATURES: usize = 6;
/// Power-up slot: present (1), position (2), kind (1)
pub const POWER_UP_FEATURES: usize = 4;
/// Elapsed frames, score, difficulty, enemy count
pub const SCALAR_FEATURES: usize = 4;

/// Configuration for the state encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Maximum number of enemies to encode
    pub max_enemies: usize,
    /// Maximum number of bullets to encode
    pub max_bullets: usize,
    /// Maximum number of power-ups to encode
    pub max_power_ups: usize,
    /// Velocity normalization constant (pixels per tick)
    pub max_speed: f32,
    pub max_fire_cooldown: u32,
    pub max_score: f32,
    pub max_frames: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_enemies: 4,
            max_bullets: 6,
            max_power_ups: 2,
            max_speed: 10.0,
            max_fire_cooldown: 10,
            max_score: 1000.0,
            max_frames: 5000.0,
        }
    }
}

/// Fixed-length observation, every value in `[-1, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationVector(Vec<f32>);

impl ObservationVector {
    /// Observation of the given length with every value zero
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for ObservationVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Pure encoder: the same snapshot always produces the same vector
#[derive(Debug, Clone)]
pub struct StateEncoder {
    config: EncoderConfig,
}

impl StateEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Length of every observation this encoder produces
    pub fn obs_size(&self) -> usize {
        AGENT_FEATURES
            + ENEMY_FEATURES * self.config.max_enemies
            + BULLET_FEATURES * self.config.max_bullets
            + POWER_UP_FEATURES * self.config.max_power_ups
            + SCALAR_FEATURES
    }

    pub fn encode(&self, world: &WorldSnapshot) -> Result<ObservationVector, EncodeError> {
        world.validate()?;
        if !(self.config.max_speed.is_finite() && self.config.max_speed > 0.0) {
            return Err(EncodeError::InvalidWorldState(format!(
                "velocity normalization constant must be positive, got {}",
                self.config.max_speed
            )));
        }

        let bounds = world.bounds();
        let origin = world.agent.position;
        let mut obs = Vec::with_capacity(self.obs_size());

        self.encode_agent(&world.agent, &mut obs);

        // Enemies, nearest first
        let enemies = nearest_first(&world.enemies, origin, |e| e.position);
        for slot in 0..self.config.max_enemies {
            match enemies.get(slot) {
                Some(enemy) => {
                    obs.push(1.0);
                    self.push_position(bounds, enemy.position, &mut obs);
                    self.push_velocity(enemy.velocity, &mut obs);
                    obs.push(flag(enemy.threat));
                }
                None => obs.extend_from_slice(&[0.0; ENEMY_FEATURES]),
            }
        }

        // Bullets, nearest first
        let bullets = nearest_first(&world.bullets, origin, |b| b.position);
        for slot in 0..self.config.max_bullets {
            match bullets.get(slot) {
                Some(bullet) => {
                    obs.push(1.0);
                    self.push_position(bounds, bullet.position, &mut obs);
                    self.push_velocity(bullet.velocity, &mut obs);
                    obs.push(if bullet.is_hostile() { 1.0 } else { -1.0 });
                }
                None => obs.extend_from_slice(&[0.0; BULLET_FEATURES]),
            }
        }

        // Power-ups, nearest first
        let power_ups = nearest_first(&world.power_ups, origin, |p| p.position);
        for slot in 0..self.config.max_power_ups {
            match power_ups.get(slot) {
                Some(power_up) => {
                    obs.push(1.0);
                    self.push_position(bounds, power_up.position, &mut obs);
                    obs.push(power_up.kind.code());
                }
                None => obs.extend_from_slice(&[0.0; POWER_UP_FEATURES]),
            }
        }

        // Game state scalars
        obs.push(ratio(world.stats.elapsed_frames as f32, self.config.max_frames));
        obs.push(ratio(world.stats.score as f32, self.config.max_score));
        obs.push(world.stats.difficulty);
        obs.push(ratio(
            world.enemies.len() as f32,
            self.config.max_enemies.max(1) as f32 * 2.0,
        ));

        for value in obs.iter_mut() {
            *value = value.clamp(-1.0, 1.0);
        }
        debug_assert_eq!(obs.len(), self.obs_size());

        Ok(ObservationVector(obs))
    }

    fn encode_agent(&self, agent: &AgentState, obs: &mut Vec<f32>) {
        self.push_position(agent.bounds, agent.position, obs);
        self.push_velocity(agent.velocity, obs);
        obs.push(agent.health as f32 / agent.max_health as f32 * 2.0 - 1.0);
        obs.push(ratio(
            agent.fire_cooldown as f32,
            self.config.max_fire_cooldown.max(1) as f32,
        ));
    }

    fn push_position(&self, bounds: Bounds, pos: Vec2, obs: &mut Vec<f32>) {
        let normalized = bounds.normalize(pos);
        obs.push(normalized.x);
        obs.push(normalized.y);
    }

    fn push_velocity(&self, velocity: Vec2, obs: &mut Vec<f32>) {
        obs.push(velocity.x / self.config.max_speed);
        obs.push(velocity.y / self.config.max_speed);
    }
}

/// Sorts entities by distance to `origin`; ties go to the lower y, then the lower x
fn nearest_first<T>(items: &[T], origin: Vec2, position: impl Fn(&T) -> Vec2) -> Vec<&T> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| {
        let (pa, pb) = (position(*a), position(*b));
        origin
            .distance_squared(&pa)
            .total_cmp(&origin.distance_squared(&pb))
            .then_with(|| pa.y.total_cmp(&pb.y))
            .then_with(|| pa.x.total_cmp(&pb.x))
    });
    sorted
}

fn ratio(value: f32, max: f32) -> f32 {
    if max > 0.0 { value / max } else { 0.0 }
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}
