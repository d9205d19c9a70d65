//! Rollout collection and evaluation driven by the command line

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::error::{ConfigError, TrainError};

use super::action_space::{ActionId, NUM_ACTIONS};
use super::encoder::{ObservationVector, StateEncoder};
use super::env::{BatchEnv, EnvConfig, Episode, RLEnv, TrainingEnvironment, Transition};
use super::executor::{InferenceConfig, InferenceStats, PolicyInferenceEngine};
use super::metrics::{EvaluationMetrics, TrainingMetrics};
use super::policy::Policy;

/// Who picks the actions during rollouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Algorithm {
    /// Rule-based state machine (expert demonstrations)
    #[default]
    Fallback,
    /// Uniformly random actions
    Random,
    /// Greedy actions from a policy artifact
    Policy,
}

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub algorithm: Algorithm,
    /// Transitions to collect across all environments
    pub total_timesteps: usize,
    /// Number of parallel environments
    pub num_envs: usize,
    /// Policy artifact for `Algorithm::Policy`
    pub model_path: Option<PathBuf>,
    /// Log metrics every this many finished episodes
    pub log_interval: usize,
    /// Transitions kept for inspection before the buffer is recycled
    pub buffer_capacity: usize,
    /// Unbounded by default so wall-clock time never changes a rollout
    pub inference: InferenceConfig,
    /// Environment config
    pub env_config: EnvConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Fallback,
            total_timesteps: 100_000,
            num_envs: 8,
            model_path: None,
            log_interval: 10,
            buffer_capacity: 2048,
            inference: InferenceConfig::unbounded(),
            env_config: EnvConfig::default(),
        }
    }
}

/// Bounded store of recent transitions
#[derive(Debug, Default)]
pub struct RolloutBuffer {
    transitions: Vec<Transition>,
    capacity: usize,
}

impl RolloutBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` when the buffer just became full
    pub fn push(&mut self, transition: Transition) -> bool {
        self.transitions.push(transition);
        self.transitions.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// How often each action was taken
    pub fn action_histogram(&self) -> [usize; NUM_ACTIONS] {
        let mut counts = [0; NUM_ACTIONS];
        for t in &self.transitions {
            counts[t.action.index()] += 1;
        }
        counts
    }
}

/// Action selection strategy for rollouts
#[derive(Debug)]
pub enum ActionSource {
    Fallback,
    Random(StdRng),
    Policy {
        engine: PolicyInferenceEngine,
        /// Set after the first inference failure; later ticks use the expert
        degraded: bool,
    },
}

impl ActionSource {
    pub fn choose(&mut self, env: &mut RLEnv, observation: &ObservationVector) -> ActionId {
        match self {
            ActionSource::Fallback => env.expert_action(),
            ActionSource::Random(rng) => {
                ActionId::try_from(rng.random_range(0..NUM_ACTIONS)).unwrap_or(ActionId::NO_OP)
            }
            ActionSource::Policy { engine, degraded } => {
                if *degraded {
                    return env.expert_action();
                }
                match engine.infer(observation) {
                    Ok(action) => action,
                    Err(e) => {
                        warn!("Policy inference failed, using rule-based actions: {}", e);
                        *degraded = true;
                        env.expert_action()
                    }
                }
            }
        }
    }

    /// Latency and failure counters when actions come from a policy
    pub fn inference_stats(&self) -> Option<&InferenceStats> {
        match self {
            ActionSource::Policy { engine, .. } => Some(engine.stats()),
            _ => None,
        }
    }
}

/// Writes a seeded, freshly initialized policy sized for the environment's encoder.
///
/// Returns the observation size the artifact expects.
pub fn write_initial_policy(
    env_config: &EnvConfig,
    path: &Path,
    hidden: &[usize],
    seed: u64,
) -> Result<usize, TrainError> {
    let obs_size = StateEncoder::new(env_config.encoder_config.clone()).obs_size();
    let policy = Policy::random(obs_size, hidden, seed);
    policy.save_atomic(path)?;
    info!(
        "Initialized policy at {} ({} inputs, {} parameters)",
        path.display(),
        obs_size,
        policy.parameter_count()
    );
    Ok(obs_size)
}

/// Collects rollouts and evaluates action sources
pub struct Trainer {
    config: TrainConfig,
    source: ActionSource,
    metrics: TrainingMetrics,
    buffer: RolloutBuffer,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self, TrainError> {
        if config.num_envs == 0 {
            return Err(ConfigError::Invalid("at least one environment is required".to_string()).into());
        }
        config.env_config.fallback_config.validate()?;

        let source = match config.algorithm {
            Algorithm::Fallback => ActionSource::Fallback,
            Algorithm::Random => ActionSource::Random(StdRng::seed_from_u64(config.env_config.seed)),
            Algorithm::Policy => {
                let path = config.model_path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("the policy algorithm needs a model path".to_string())
                })?;
                let obs_size = StateEncoder::new(config.env_config.encoder_config.clone()).obs_size();
                let policy = Policy::load(path, obs_size)?;
                ActionSource::Policy {
                    engine: PolicyInferenceEngine::new(Arc::new(policy), config.inference.clone()),
                    degraded: false,
                }
            }
        };

        Ok(Self {
            buffer: RolloutBuffer::new(config.buffer_capacity),
            metrics: TrainingMetrics::default(),
            config,
            source,
        })
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn buffer(&self) -> &RolloutBuffer {
        &self.buffer
    }

    /// Collects `total_timesteps` transitions across the parallel environments
    pub fn collect(&mut self) -> &TrainingMetrics {
        let mut batch = BatchEnv::from_config(&self.config.env_config, self.config.num_envs);
        let mut observations = batch.reset_all();
        let mut episodes: Vec<Episode> = batch
            .envs()
            .iter()
            .map(|env| Episode {
                seed: env.episode_seed(),
                ..Episode::default()
            })
            .collect();

        info!(
            "Collecting {} timesteps with {:?} across {} environments",
            self.config.total_timesteps,
            self.config.algorithm,
            batch.batch_size()
        );

        let mut collected = 0;
        while collected < self.config.total_timesteps {
            let actions: Vec<ActionId> = if matches!(self.source, ActionSource::Fallback) {
                batch.expert_actions()
            } else {
                batch
                    .envs_mut()
                    .iter_mut()
                    .zip(&observations)
                    .map(|(env, obs)| self.source.choose(env, obs))
                    .collect()
            };
            let results = batch.step_all(&actions);
            collected += results.len();
            self.metrics.add_timesteps(results.len());

            for (i, result) in results.into_iter().enumerate() {
                let transition = Transition {
                    observation: std::mem::replace(&mut observations[i], result.observation.clone()),
                    action: actions[i],
                    reward: result.reward,
                    next_observation: result.observation,
                    done: result.done,
                };
                if self.buffer.push(transition.clone()) {
                    self.log_buffer();
                }
                episodes[i].transitions.push(transition);

                if result.done {
                    episodes[i].info = result.info;
                    self.finish_episode(&episodes[i]);
                    let env = &mut batch.envs_mut()[i];
                    observations[i] = env.reset();
                    episodes[i] = Episode {
                        seed: env.episode_seed(),
                        ..Episode::default()
                    };
                }
            }
        }

        self.metrics.log_to_console();
        &self.metrics
    }

    /// Plays `episodes` full episodes in one environment
    pub fn evaluate(&mut self, episodes: usize) -> EvaluationMetrics {
        let mut env = RLEnv::new(self.config.env_config.clone());
        let mut metrics = EvaluationMetrics::new();
        for _ in 0..episodes {
            let source = &mut self.source;
            let episode = env.run_episode(|env, obs| source.choose(env, obs));
            metrics.record_episode(&episode);
        }
        metrics.print_summary();
        if let Some(stats) = self.source.inference_stats() {
            info!(
                "Policy inference: {} calls, mean {:?}, max {:?}, {} over budget, {} failed",
                stats.calls,
                stats.mean_latency(),
                stats.max_latency,
                stats.overruns,
                stats.failures
            );
        }
        metrics
    }

    /// One short episode to check the pipeline end to end
    pub fn smoke_test(&mut self) -> Episode {
        let mut env = RLEnv::new(EnvConfig {
            max_steps: self.config.env_config.max_steps.min(200),
            ..self.config.env_config.clone()
        });
        let source = &mut self.source;
        let episode = env.run_episode(|env, obs| source.choose(env, obs));
        info!(
            "Smoke episode: {} steps, reward {:.2}, {:?}",
            episode.len(),
            episode.total_reward(),
            episode.termination()
        );
        episode
    }

    fn finish_episode(&mut self, episode: &Episode) {
        self.metrics.record_episode(episode);
        if self.metrics.episodes % self.config.log_interval.max(1) == 0 {
            self.metrics.log_to_console();
        }
    }

    fn log_buffer(&mut self) {
        let histogram = self.buffer.action_histogram();
        let total = self.buffer.len().max(1) as f32;
        let top: Vec<String> = ActionId::all()
            .zip(histogram)
            .filter(|(_, count)| *count > 0)
            .map(|(action, count)| format!("{}:{:.0}%", action, count as f32 / total * 100.0))
            .collect();
        tracing::debug!("Action distribution over {} transitions: {}", self.buffer.len(), top.join(" "));
        self.buffer.clear();
    }
}
