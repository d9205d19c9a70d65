//! RL Environment - gym-like interface for training
//!
//! Actions go through the same decoder the live controller uses, and
//! observations through the same encoder, so a policy trained here sees
//! exactly what it will see in play.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ActionError;
use crate::planners::heuristic::{BehaviorState, FallbackConfig, FallbackStateMachine};

use super::action_space::{ActionId, decode};
use super::encoder::{EncoderConfig, ObservationVector, StateEncoder};
use super::reward::{RewardComponents, RewardWeights, efficiency_score};
use super::sim::{Arena, ArenaConfig};

/// Mixes the episode counter into the base seed
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Environment configuration
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Maximum steps per episode
    pub max_steps: usize,
    /// Base seed; episode `n` uses a seed derived from this and `n`
    pub seed: u64,
    pub arena: ArenaConfig,
    pub rewards: RewardWeights,
    pub encoder_config: EncoderConfig,
    /// Rules used for expert demonstrations
    pub fallback_config: FallbackConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_steps: 5000,
            seed: 0,
            arena: ArenaConfig::default(),
            rewards: RewardWeights::default(),
            encoder_config: EncoderConfig::default(),
            fallback_config: FallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    AgentDestroyed,
    /// Truncated at `max_steps`
    StepLimit,
    /// The world could not be encoded
    WorldStateError,
}

/// Step result from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Next observation
    pub observation: ObservationVector,
    pub reward: f32,
    /// Episode done
    pub done: bool,
    /// Truncated (hit max steps)
    pub truncated: bool,
    /// Additional info
    pub info: StepInfo,
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Steps taken this episode
    pub steps: usize,
    pub health: i32,
    pub score: u32,
    /// Episode totals so far
    pub kills: u32,
    pub pickups: u32,
    pub damage: u32,
    pub missed_shots: u32,
    /// Components behind this step's reward
    pub components: RewardComponents,
    pub termination: Option<TerminationReason>,
}

/// One (observation, action, reward, next observation, done) record
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: ObservationVector,
    pub action: ActionId,
    pub reward: f32,
    pub next_observation: ObservationVector,
    pub done: bool,
}

/// A finished rollout
#[derive(Debug, Clone, Default)]
pub struct Episode {
    pub seed: u64,
    pub transitions: Vec<Transition>,
    /// Info from the final step
    pub info: StepInfo,
}

impl Episode {
    pub fn total_reward(&self) -> f32 {
        self.transitions.iter().map(|t| t.reward).sum()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.info.termination
    }
}

/// Episode lifecycle every training environment provides
pub trait TrainingEnvironment {
    /// Starts a new episode and returns its first observation
    fn reset(&mut self) -> ObservationVector;

    /// Applies one action and advances the world one tick
    fn step(&mut self, action: ActionId) -> StepResult;

    fn observation_size(&self) -> usize;
}

/// Single-agent training environment over the headless arena
#[derive(Debug, Clone)]
pub struct RLEnv {
    config: EnvConfig,
    encoder: StateEncoder,
    expert: FallbackStateMachine,
    arena: Arena,
    /// Behavior state for expert queries; never shared between environments
    behavior: BehaviorState,
    /// Expert decision already taken at this step count
    expert_cache: Option<(usize, ActionId)>,
    episode: u64,
    episode_seed: u64,
    steps: usize,
    observation: ObservationVector,
    totals: StepInfo,
}

impl RLEnv {
    pub fn new(config: EnvConfig) -> Self {
        let encoder = StateEncoder::new(config.encoder_config.clone());
        let expert = FallbackStateMachine::new(config.fallback_config.clone());
        let arena = Arena::new(config.arena.clone(), config.seed);
        let observation = ObservationVector::zeros(encoder.obs_size());

        let mut env = Self {
            config,
            encoder,
            expert,
            arena,
            behavior: BehaviorState::default(),
            expert_cache: None,
            episode: 0,
            episode_seed: 0,
            steps: 0,
            observation,
            totals: StepInfo::default(),
        };
        env.reset_with_seed(env.config.seed);
        env
    }

    /// Starts an episode whose every transition is determined by `seed`
    pub fn reset_with_seed(&mut self, seed: u64) -> ObservationVector {
        self.arena = Arena::new(self.config.arena.clone(), seed);
        self.episode_seed = seed;
        self.behavior = BehaviorState::default();
        self.expert_cache = None;
        self.steps = 0;
        self.totals = StepInfo {
            health: self.arena.agent().health,
            ..StepInfo::default()
        };

        self.observation = match self.encoder.encode(&self.arena.snapshot()) {
            Ok(obs) => obs,
            Err(e) => {
                warn!("Cannot encode initial world for seed {}: {}", seed, e);
                self.totals.termination = Some(TerminationReason::WorldStateError);
                ObservationVector::zeros(self.encoder.obs_size())
            }
        };
        debug!("Episode reset with seed {}", seed);
        self.observation.clone()
    }

    /// Like `step`, for ids coming from an untrusted source
    pub fn step_raw(&mut self, id: u8) -> Result<StepResult, ActionError> {
        let action = ActionId::new(id)?;
        Ok(self.step(action))
    }

    /// What the rule-based controller would do now.
    ///
    /// The expert's behavior state advances once per tick however often this
    /// is called; `step` calls it too, so the state tracks the world whoever
    /// picks the actions.
    pub fn expert_action(&mut self) -> ActionId {
        if let Some((_, action)) = self.expert_cache.filter(|(step, _)| *step == self.steps) {
            return action;
        }
        let (action, next) = self.expert.decide(&self.arena.snapshot(), self.behavior);
        self.behavior = next;
        self.expert_cache = Some((self.steps, action));
        action
    }

    pub fn behavior(&self) -> BehaviorState {
        self.behavior
    }

    pub fn is_done(&self) -> bool {
        self.totals.termination.is_some()
    }

    pub fn episode_seed(&self) -> u64 {
        self.episode_seed
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn observation(&self) -> &ObservationVector {
        &self.observation
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Current world state (for debugging)
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Plays one full episode from a fresh reset, choosing actions with `select`
    pub fn run_episode<F>(&mut self, mut select: F) -> Episode
    where
        F: FnMut(&mut RLEnv, &ObservationVector) -> ActionId,
    {
        let mut observation = self.reset();
        let mut episode = Episode {
            seed: self.episode_seed,
            ..Episode::default()
        };

        while !self.is_done() {
            let action = select(self, &observation);
            let result = self.step(action);
            episode.transitions.push(Transition {
                observation,
                action,
                reward: result.reward,
                next_observation: result.observation.clone(),
                done: result.done,
            });
            observation = result.observation;
            episode.info = result.info;
        }
        episode
    }

    fn finished_step(&self) -> StepResult {
        StepResult {
            observation: self.observation.clone(),
            reward: 0.0,
            done: true,
            truncated: self.totals.termination == Some(TerminationReason::StepLimit),
            info: StepInfo {
                components: RewardComponents::default(),
                ..self.totals.clone()
            },
        }
    }
}

impl TrainingEnvironment for RLEnv {
    fn reset(&mut self) -> ObservationVector {
        self.episode += 1;
        let seed = self.config.seed.wrapping_add(self.episode.wrapping_mul(SEED_STRIDE));
        self.reset_with_seed(seed)
    }

    fn step(&mut self, action: ActionId) -> StepResult {
        if self.is_done() {
            return self.finished_step();
        }

        self.expert_action();
        let events = self.arena.advance(decode(action));
        self.steps += 1;

        let agent = self.arena.agent();
        let totals = &mut self.totals;
        totals.steps = self.steps;
        totals.health = agent.health;
        totals.score = self.arena.score();
        totals.kills += events.kills;
        totals.pickups += events.pickups;
        totals.damage += events.damage;
        totals.missed_shots += events.missed_shots;

        let alive = agent.is_alive();
        let components = RewardComponents {
            survival: if alive { 1.0 } else { 0.0 },
            enemy_kills: events.kills as f32,
            power_ups: events.pickups as f32,
            damage_taken: events.damage as f32,
            missed_shots: events.missed_shots as f32,
            efficiency: efficiency_score(
                totals.kills,
                totals.pickups,
                totals.damage,
                self.steps as u32,
            ),
        };
        let reward = components.total(&self.config.rewards);
        totals.components = components;

        if events.destroyed || !alive {
            totals.termination = Some(TerminationReason::AgentDestroyed);
        } else if self.steps >= self.config.max_steps {
            totals.termination = Some(TerminationReason::StepLimit);
        }

        match self.encoder.encode(&self.arena.snapshot()) {
            Ok(obs) => self.observation = obs,
            Err(e) => {
                warn!("Terminating episode {}: {}", self.episode_seed, e);
                self.totals.termination = Some(TerminationReason::WorldStateError);
                self.observation = ObservationVector::zeros(self.encoder.obs_size());
            }
        }

        if let Some(reason) = self.totals.termination {
            debug!(
                "Episode {} finished after {} steps: {:?} (kills={}, damage={})",
                self.episode_seed, self.steps, reason, self.totals.kills, self.totals.damage
            );
        }

        StepResult {
            observation: self.observation.clone(),
            reward,
            done: self.is_done(),
            truncated: self.totals.termination == Some(TerminationReason::StepLimit),
            info: self.totals.clone(),
        }
    }

    fn observation_size(&self) -> usize {
        self.encoder.obs_size()
    }
}

/// Batch of isolated environments stepped in parallel
pub struct BatchEnv {
    envs: Vec<RLEnv>,
}

impl BatchEnv {
    pub fn new(envs: Vec<RLEnv>) -> Self {
        Self { envs }
    }

    /// `count` environments whose base seeds differ
    pub fn from_config(config: &EnvConfig, count: usize) -> Self {
        let envs = (0..count as u64)
            .map(|i| {
                RLEnv::new(EnvConfig {
                    seed: config.seed.wrapping_add(i.wrapping_mul(SEED_STRIDE).rotate_left(17)),
                    ..config.clone()
                })
            })
            .collect();
        Self { envs }
    }

    /// Reset all environments
    pub fn reset_all(&mut self) -> Vec<ObservationVector> {
        self.envs.par_iter_mut().map(|e| e.reset()).collect()
    }

    /// Step all environments, one action each
    pub fn step_all(&mut self, actions: &[ActionId]) -> Vec<StepResult> {
        self.envs
            .par_iter_mut()
            .zip(actions.par_iter())
            .map(|(env, &action)| env.step(action))
            .collect()
    }

    /// Expert action for each environment
    pub fn expert_actions(&mut self) -> Vec<ActionId> {
        self.envs.par_iter_mut().map(|e| e.expert_action()).collect()
    }

    pub fn envs(&self) -> &[RLEnv] {
        &self.envs
    }

    pub fn envs_mut(&mut self) -> &mut [RLEnv] {
        &mut self.envs
    }

    /// Get batch size
    pub fn batch_size(&self) -> usize {
        self.envs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Vec2;
    use crate::planners::rl::action_space::{Direction, NUM_ACTIONS};
    use crate::state::PowerUpKind;

    fn short_config(max_steps: usize) -> EnvConfig {
        EnvConfig {
            max_steps,
            seed: 11,
            ..EnvConfig::default()
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert_eq!(config.max_steps, 5000);
        assert_eq!(config.arena.initial_health, 3);
    }

    #[test]
    fn test_observation_length() {
        let mut env = RLEnv::new(short_config(10));
        let obs = env.reset();
        assert_eq!(obs.len(), env.observation_size());
        let result = env.step(ActionId::NO_OP);
        assert_eq!(result.observation.len(), env.observation_size());
    }

    #[test]
    fn test_dead_agent_terminates_on_first_step() {
        let mut config = short_config(100);
        config.arena.initial_health = 0;
        let mut env = RLEnv::new(config);
        env.reset();
        let result = env.step(ActionId::NO_OP);
        assert!(result.done);
        assert!(!result.truncated);
        assert_eq!(result.info.termination, Some(TerminationReason::AgentDestroyed));
    }

    #[test]
    fn test_health_pickup_cannot_revive_dead_agent() {
        let mut config = short_config(100);
        config.arena.initial_health = 0;
        config.arena.enemy_count = 0;
        config.arena.power_up_count = 0;
        let mut env = RLEnv::new(config);
        env.reset();
        let above = env.arena.agent().position - Vec2::new(0.0, 2.0);
        env.arena.place_power_up(above, PowerUpKind::Health);

        let result = env.step(ActionId::NO_OP);
        assert!(result.done);
        assert_eq!(result.info.health, 0);
        assert_eq!(result.info.pickups, 0);
        assert_eq!(result.info.termination, Some(TerminationReason::AgentDestroyed));
    }

    #[test]
    fn test_behavior_tracks_world_whoever_acts() {
        let mut env = RLEnv::new(short_config(2000));
        env.reset();
        let machine = FallbackStateMachine::new(env.config().fallback_config.clone());
        let mut left_patrol = false;

        while !env.is_done() {
            let world = env.arena().snapshot();
            let (_, expected) = machine.decide(&world, env.behavior());
            env.step(ActionId::NO_OP);
            assert_eq!(env.behavior(), expected);
            left_patrol |= expected != BehaviorState::Patrol;
        }
        // Damage needs an enemy or bullet close enough to leave PATROL first
        assert!(left_patrol || env.steps() == 2000);
    }

    #[test]
    fn test_expert_action_once_per_tick() {
        let mut env = RLEnv::new(short_config(100));
        env.reset();
        let machine = FallbackStateMachine::new(env.config().fallback_config.clone());
        let world = env.arena().snapshot();
        let (expected, next) = machine.decide(&world, BehaviorState::Patrol);

        assert_eq!(env.expert_action(), expected);
        assert_eq!(env.expert_action(), expected);
        assert_eq!(env.behavior(), next);

        // Stepping with the expert's own action does not decide again
        env.step(expected);
        assert_eq!(env.behavior(), next);

        env.reset();
        assert_eq!(env.behavior(), BehaviorState::Patrol);
    }

    #[test]
    fn test_batch_expert_actions_match_each_env() {
        let mut batch = BatchEnv::from_config(&short_config(50), 3);
        batch.reset_all();
        let actions = batch.expert_actions();
        assert_eq!(actions.len(), 3);
        let again: Vec<ActionId> = batch.envs_mut().iter_mut().map(|e| e.expert_action()).collect();
        assert_eq!(actions, again);
    }

    #[test]
    fn test_step_limit_truncates() {
        let mut env = RLEnv::new(short_config(5));
        env.reset();
        let mut last = None;
        for _ in 0..5 {
            last = Some(env.step(ActionId::NO_OP));
        }
        let last = last.unwrap();
        if last.info.termination == Some(TerminationReason::StepLimit) {
            assert!(last.done && last.truncated);
        } else {
            // Killed within five ticks
            assert_eq!(last.info.termination, Some(TerminationReason::AgentDestroyed));
        }
    }

    #[test]
    fn test_step_after_done_is_inert() {
        let mut config = short_config(100);
        config.arena.initial_health = 0;
        let mut env = RLEnv::new(config);
        env.reset();
        let first = env.step(ActionId::NO_OP);
        let second = env.step(ActionId::FIRE_ONLY);
        assert!(second.done);
        assert_eq!(second.reward, 0.0);
        assert_eq!(second.observation, first.observation);
        assert_eq!(second.info.steps, first.info.steps);
    }

    #[test]
    fn test_reset_with_seed_reproducible() {
        let mut a = RLEnv::new(short_config(200));
        let mut b = RLEnv::new(short_config(200));
        assert_eq!(a.reset_with_seed(77), b.reset_with_seed(77));
        for i in 0..200u32 {
            let action = ActionId::try_from((i % NUM_ACTIONS as u32) as u8).unwrap();
            assert_eq!(a.step(action), b.step(action));
        }
    }

    #[test]
    fn test_reset_changes_episode_seed() {
        let mut env = RLEnv::new(short_config(10));
        env.reset();
        let first = env.episode_seed();
        env.reset();
        assert_ne!(first, env.episode_seed());
    }

    #[test]
    fn test_step_raw_rejects_invalid_id() {
        let mut env = RLEnv::new(short_config(10));
        env.reset();
        assert!(env.step_raw(18).is_err());
        assert!(env.step_raw(4).is_ok());
    }

    #[test]
    fn test_expert_episode_completes() {
        let mut env = RLEnv::new(short_config(300));
        let episode = env.run_episode(|env, _| env.expert_action());
        assert!(!episode.is_empty());
        assert!(episode.len() <= 300);
        assert!(episode.transitions.last().unwrap().done);
        assert!(episode.termination().is_some());
    }

    #[test]
    fn test_survival_reward_positive_when_idle() {
        let mut config = short_config(10);
        config.arena.enemy_count = 0;
        config.arena.power_up_count = 0;
        let mut env = RLEnv::new(config);
        env.reset();
        let result = env.step(ActionId::from_parts(Some(Direction::East), false));
        assert!(result.reward > 0.0);
        assert_eq!(result.info.components.survival, 1.0);
    }

    #[test]
    fn test_batch_env_isolated() {
        let mut batch = BatchEnv::from_config(&short_config(50), 4);
        let observations = batch.reset_all();
        assert_eq!(observations.len(), 4);
        let results = batch.step_all(&[ActionId::NO_OP; 4]);
        assert_eq!(results.len(), 4);
        let seeds: Vec<u64> = batch.envs().iter().map(|e| e.episode_seed()).collect();
        for i in 0..seeds.len() {
            for j in (i + 1)..seeds.len() {
                assert_ne!(seeds[i], seeds[j]);
            }
        }
    }
}
