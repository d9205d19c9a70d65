//! Headless arena used by the training environment
//!
//! A deliberately small shooter: enemies spawn in the top half and drift
//! toward the agent, firing aimed shots; power-ups fall from the top. Every
//! destroyed or collected entity respawns, so entity counts never change
//! within an episode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::infra::{Bounds, Vec2};
use crate::planners::rl::action_space::Intent;
use crate::state::{
    AgentState, BulletInfo, BulletOwner, EnemyInfo, GameStats, PowerUpInfo, PowerUpKind,
    WorldSnapshot,
};

/// Arena dimensions, entity counts and speeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub width: f32,
    pub height: f32,
    pub initial_health: i32,
    pub max_health: i32,
    pub enemy_count: usize,
    pub power_up_count: usize,
    /// Agent speed in pixels per tick
    pub move_speed: f32,
    pub enemy_speed: f32,
    pub bullet_speed: f32,
    pub enemy_bullet_speed: f32,
    pub power_up_speed: f32,
    /// Ticks between agent shots
    pub fire_cooldown: u32,
    pub rapid_fire_cooldown: u32,
    pub rapid_fire_ticks: u32,
    /// Per-tick chance an enemy fires at difficulty 0.5
    pub enemy_fire_chance: f64,
    pub hit_radius: f32,
    pub pickup_radius: f32,
    /// Enemies closer than this are flagged as threats
    pub threat_radius: f32,
    /// Difficulty in `[0, 1]`
    pub difficulty: f32,
    pub score_per_kill: u32,
    pub score_per_power_up: u32,
    /// Keep-out distance from the screen edges for the agent and spawns
    pub edge_margin: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            initial_health: 3,
            max_health: 3,
            enemy_count: 3,
            power_up_count: 1,
            move_speed: 5.0,
            enemy_speed: 2.0,
            bullet_speed: 8.0,
            enemy_bullet_speed: 5.0,
            power_up_speed: 1.5,
            fire_cooldown: 10,
            rapid_fire_cooldown: 4,
            rapid_fire_ticks: 300,
            enemy_fire_chance: 0.01,
            hit_radius: 30.0,
            pickup_radius: 30.0,
            threat_radius: 150.0,
            difficulty: 0.5,
            score_per_kill: 10,
            score_per_power_up: 25,
            edge_margin: 20.0,
        }
    }
}

impl ArenaConfig {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.width, self.height)
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickEvents {
    pub kills: u32,
    pub pickups: u32,
    pub damage: u32,
    pub missed_shots: u32,
    pub shots_fired: u32,
    /// Health reached zero; nothing later in the tick can revive the agent
    pub destroyed: bool,
}

#[derive(Debug, Clone)]
struct Enemy {
    position: Vec2,
    velocity: Vec2,
}

#[derive(Debug, Clone)]
struct Bullet {
    position: Vec2,
    velocity: Vec2,
    owner: BulletOwner,
}

#[derive(Debug, Clone)]
struct PowerUp {
    position: Vec2,
    kind: PowerUpKind,
}

#[derive(Debug, Clone)]
pub struct Arena {
    config: ArenaConfig,
    rng: StdRng,
    agent: AgentState,
    enemies: Vec<Enemy>,
    bullets: Vec<Bullet>,
    power_ups: Vec<PowerUp>,
    frame: u64,
    score: u32,
    rapid_fire_left: u32,
}

impl Arena {
    /// Fresh arena; every random draw comes from `seed`
    pub fn new(config: ArenaConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bounds = config.bounds();
        let margin = config.edge_margin;

        let x = rng.random_range(margin..(config.width - margin).max(margin + 1.0));
        let mut agent = AgentState::new(Vec2::new(x, config.height * 0.875), bounds);
        agent.max_health = config.max_health.max(1);
        agent.health = config.initial_health.min(agent.max_health);

        let mut arena = Self {
            config,
            rng,
            agent,
            enemies: Vec::new(),
            bullets: Vec::new(),
            power_ups: Vec::new(),
            frame: 0,
            score: 0,
            rapid_fire_left: 0,
        };
        for _ in 0..arena.config.enemy_count {
            let enemy = arena.spawn_enemy();
            arena.enemies.push(enemy);
        }
        for _ in 0..arena.config.power_up_count {
            let power_up = arena.spawn_power_up();
            arena.power_ups.push(power_up);
        }
        arena
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn agent(&self) -> &AgentState {
        &self.agent
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Read-only view in the same shape the live game hands the controller
    pub fn snapshot(&self) -> WorldSnapshot {
        let agent_pos = self.agent.position;
        let threat_radius = self.config.threat_radius;
        WorldSnapshot {
            agent: self.agent.clone(),
            enemies: self
                .enemies
                .iter()
                .map(|e| EnemyInfo {
                    position: e.position,
                    velocity: e.velocity,
                    threat: e.position.distance(&agent_pos) < threat_radius,
                })
                .collect(),
            bullets: self
                .bullets
                .iter()
                .map(|b| BulletInfo {
                    position: b.position,
                    velocity: b.velocity,
                    owner: b.owner,
                })
                .collect(),
            power_ups: self
                .power_ups
                .iter()
                .map(|p| PowerUpInfo {
                    position: p.position,
                    kind: p.kind,
                })
                .collect(),
            stats: GameStats {
                elapsed_frames: self.frame,
                score: self.score,
                difficulty: self.config.difficulty,
            },
        }
    }

    /// Advances the world one tick with the agent following `intent`
    pub fn advance(&mut self, intent: Intent) -> TickEvents {
        let mut events = TickEvents::default();
        let bounds = self.config.bounds();

        self.move_agent(intent, &mut events);
        self.move_enemies(&mut events);
        self.move_bullets(bounds, &mut events);
        self.move_power_ups(&mut events);

        self.agent.health = self.agent.health.max(0);
        events.destroyed = !self.agent.is_alive();
        self.frame += 1;
        events
    }

    fn move_agent(&mut self, intent: Intent, events: &mut TickEvents) {
        self.agent.velocity = intent.direction * self.config.move_speed;
        let next = self.agent.position + self.agent.velocity;
        self.agent.position = self.config.bounds().clamp(next, self.config.edge_margin);

        self.rapid_fire_left = self.rapid_fire_left.saturating_sub(1);
        self.agent.fire_cooldown = self.agent.fire_cooldown.saturating_sub(1);
        if intent.fire && self.agent.can_fire() {
            self.bullets.push(Bullet {
                position: self.agent.position,
                velocity: Vec2::new(0.0, -self.config.bullet_speed),
                owner: BulletOwner::Agent,
            });
            self.agent.fire_cooldown = if self.rapid_fire_left > 0 {
                self.config.rapid_fire_cooldown
            } else {
                self.config.fire_cooldown
            };
            events.shots_fired += 1;
        }
    }

    fn move_enemies(&mut self, events: &mut TickEvents) {
        let agent_pos = self.agent.position;
        let fire_chance = (self.config.enemy_fire_chance
            * (0.5 + self.config.difficulty.clamp(0.0, 1.0) as f64))
            .clamp(0.0, 1.0);

        for i in 0..self.enemies.len() {
            let heading = (agent_pos - self.enemies[i].position)
                .normalized()
                .unwrap_or(Vec2::new(0.0, 1.0));
            let enemy = &mut self.enemies[i];
            enemy.velocity = heading * self.config.enemy_speed;
            enemy.position += enemy.velocity;

            if enemy.position.distance(&agent_pos) < self.config.hit_radius {
                self.agent.health -= 1;
                events.damage += 1;
                self.enemies[i] = self.spawn_enemy();
                continue;
            }

            if self.rng.random_bool(fire_chance) {
                let position = self.enemies[i].position;
                self.bullets.push(Bullet {
                    position,
                    velocity: heading * self.config.enemy_bullet_speed,
                    owner: BulletOwner::Enemy,
                });
            }
        }
    }

    fn move_bullets(&mut self, bounds: Bounds, events: &mut TickEvents) {
        let mut i = 0;
        while i < self.bullets.len() {
            let bullet = &mut self.bullets[i];
            bullet.position += bullet.velocity;
            let (position, owner) = (bullet.position, bullet.owner);

            let remove = match owner {
                BulletOwner::Agent => {
                    let hit = self
                        .enemies
                        .iter()
                        .position(|e| e.position.distance(&position) < self.config.hit_radius);
                    if let Some(index) = hit {
                        events.kills += 1;
                        self.score += self.config.score_per_kill;
                        self.enemies[index] = self.spawn_enemy();
                        true
                    } else if !bounds.contains(&position) {
                        events.missed_shots += 1;
                        true
                    } else {
                        false
                    }
                }
                BulletOwner::Enemy => {
                    if position.distance(&self.agent.position) < self.config.hit_radius {
                        self.agent.health -= 1;
                        events.damage += 1;
                        true
                    } else {
                        !bounds.contains(&position)
                    }
                }
            };

            if remove {
                self.bullets.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn move_power_ups(&mut self, events: &mut TickEvents) {
        for i in 0..self.power_ups.len() {
            let power_up = &mut self.power_ups[i];
            power_up.position.y += self.config.power_up_speed;
            let (position, kind) = (power_up.position, power_up.kind);

            let reachable = self.agent.is_alive()
                && position.distance(&self.agent.position) < self.config.pickup_radius;
            if reachable {
                match kind {
                    PowerUpKind::Health => {
                        self.agent.health = (self.agent.health + 1).min(self.agent.max_health);
                    }
                    PowerUpKind::RapidFire => self.rapid_fire_left = self.config.rapid_fire_ticks,
                    PowerUpKind::Score => self.score += self.config.score_per_power_up,
                }
                events.pickups += 1;
                self.power_ups[i] = self.spawn_power_up();
            } else if position.y > self.config.height {
                self.power_ups[i] = self.spawn_power_up();
            }
        }
    }

    /// Drops an extra power-up at `position`
    #[cfg(test)]
    pub(crate) fn place_power_up(&mut self, position: Vec2, kind: PowerUpKind) {
        self.power_ups.push(PowerUp { position, kind });
    }

    fn random_x(&mut self) -> f32 {
        let margin = self.config.edge_margin;
        let upper = (self.config.width - margin).max(margin + 1.0);
        self.rng.random_range(margin..upper)
    }

    fn spawn_enemy(&mut self) -> Enemy {
        let x = self.random_x();
        let y = self.rng.random_range(0.0..self.config.height * 0.5);
        Enemy {
            position: Vec2::new(x, y),
            velocity: Vec2::ZERO,
        }
    }

    fn spawn_power_up(&mut self) -> PowerUp {
        let x = self.random_x();
        let kind = PowerUpKind::ALL[self.rng.random_range(0..PowerUpKind::ALL.len())];
        PowerUp {
            position: Vec2::new(x, 0.0),
            kind,
        }
    }
}
