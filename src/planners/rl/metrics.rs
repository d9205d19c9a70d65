//! Metrics for rollout collection and evaluation

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::env::{Episode, TerminationReason};

/// Moving average calculator
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: VecDeque<f32>,
    window_size: usize,
    sum: f32,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() >= self.window_size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    pub fn average(&self) -> f32 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f32
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rollout metrics tracker
#[derive(Debug)]
pub struct TrainingMetrics {
    pub episode_rewards: MovingAverage,
    pub episode_lengths: MovingAverage,
    pub kills: MovingAverage,
    pub damage: MovingAverage,
    /// Fraction of episodes ending with the agent destroyed
    pub death_rate: MovingAverage,
    pub episodes: usize,
    pub total_timesteps: usize,
    start_time: Instant,
}

impl TrainingMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            episode_rewards: MovingAverage::new(window_size),
            episode_lengths: MovingAverage::new(window_size),
            kills: MovingAverage::new(window_size),
            damage: MovingAverage::new(window_size),
            death_rate: MovingAverage::new(window_size),
            episodes: 0,
            total_timesteps: 0,
            start_time: Instant::now(),
        }
    }

    /// Record episode completion
    pub fn record_episode(&mut self, episode: &Episode) {
        self.episodes += 1;
        self.episode_rewards.push(episode.total_reward());
        self.episode_lengths.push(episode.len() as f32);
        self.kills.push(episode.info.kills as f32);
        self.damage.push(episode.info.damage as f32);
        let died = episode.termination() == Some(TerminationReason::AgentDestroyed);
        self.death_rate.push(if died { 1.0 } else { 0.0 });
    }

    pub fn add_timesteps(&mut self, timesteps: usize) {
        self.total_timesteps += timesteps;
    }

    /// Get training duration in seconds
    pub fn training_duration_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Get timesteps per second
    pub fn timesteps_per_second(&self) -> f64 {
        let duration = self.training_duration_secs();
        if duration > 0.0 {
            self.total_timesteps as f64 / duration
        } else {
            0.0
        }
    }

    /// Log current metrics to console
    pub fn log_to_console(&self) {
        tracing::info!(
            "Episodes {} | Timesteps {} | SPS {:.1}",
            self.episodes,
            self.total_timesteps,
            self.timesteps_per_second()
        );
        tracing::info!(
            "  Episode: reward={:.2}, length={:.1}, kills={:.2}, damage={:.2}, death={:.1}%",
            self.episode_rewards.average(),
            self.episode_lengths.average(),
            self.kills.average(),
            self.damage.average(),
            self.death_rate.average() * 100.0
        );
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Evaluation metrics over full episodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub num_episodes: usize,
    pub total_reward: f32,
    pub total_steps: usize,
    pub total_kills: u32,
    pub total_pickups: u32,
    pub total_damage: u32,
    pub num_deaths: usize,
    /// Episodes per termination reason
    pub terminations: BTreeMap<String, usize>,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an evaluation episode
    pub fn record_episode(&mut self, episode: &Episode) {
        self.num_episodes += 1;
        self.total_reward += episode.total_reward();
        self.total_steps += episode.len();
        self.total_kills += episode.info.kills;
        self.total_pickups += episode.info.pickups;
        self.total_damage += episode.info.damage;

        let reason = episode.termination();
        if reason == Some(TerminationReason::AgentDestroyed) {
            self.num_deaths += 1;
        }
        let key = reason.map_or_else(|| "Unfinished".to_string(), |r| format!("{r:?}"));
        *self.terminations.entry(key).or_default() += 1;
    }

    fn per_episode(&self, total: f32) -> f32 {
        if self.num_episodes > 0 {
            total / self.num_episodes as f32
        } else {
            0.0
        }
    }

    pub fn avg_reward(&self) -> f32 {
        self.per_episode(self.total_reward)
    }

    pub fn avg_steps(&self) -> f32 {
        self.per_episode(self.total_steps as f32)
    }

    pub fn avg_kills(&self) -> f32 {
        self.per_episode(self.total_kills as f32)
    }

    pub fn death_rate(&self) -> f32 {
        self.per_episode(self.num_deaths as f32)
    }

    /// Print summary
    pub fn print_summary(&self) {
        tracing::info!("=== Evaluation Summary ===");
        tracing::info!("Episodes: {}", self.num_episodes);
        tracing::info!("Avg Reward: {:.2}", self.avg_reward());
        tracing::info!("Avg Steps: {:.1}", self.avg_steps());
        tracing::info!("Avg Kills: {:.2}", self.avg_kills());
        tracing::info!("Death Rate: {:.1}%", self.death_rate() * 100.0);
        for (reason, count) in &self.terminations {
            tracing::info!("  {}: {}", reason, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planners::rl::action_space::ActionId;
    use crate::planners::rl::encoder::ObservationVector;
    use crate::planners::rl::env::{StepInfo, Transition};

    fn episode(rewards: &[f32], termination: TerminationReason, kills: u32) -> Episode {
        let transitions = rewards
            .iter()
            .map(|&reward| Transition {
                observation: ObservationVector::zeros(2),
                action: ActionId::NO_OP,
                reward,
                next_observation: ObservationVector::zeros(2),
                done: false,
            })
            .collect();
        Episode {
            seed: 0,
            transitions,
            info: StepInfo {
                kills,
                termination: Some(termination),
                ..StepInfo::default()
            },
        }
    }

    #[test]
    fn test_moving_average() {
        let mut avg = MovingAverage::new(3);

        avg.push(1.0);
        assert!((avg.average() - 1.0).abs() < 1e-6);

        avg.push(2.0);
        assert!((avg.average() - 1.5).abs() < 1e-6);

        avg.push(3.0);
        assert!((avg.average() - 2.0).abs() < 1e-6);

        avg.push(4.0); // Pushes out 1.0
        assert!((avg.average() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_evaluation_metrics() {
        let mut metrics = EvaluationMetrics::new();

        metrics.record_episode(&episode(&[4.0, 6.0], TerminationReason::StepLimit, 2));
        metrics.record_episode(&episode(&[5.0], TerminationReason::AgentDestroyed, 0));

        assert_eq!(metrics.num_episodes, 2);
        assert!((metrics.avg_reward() - 7.5).abs() < 1e-6);
        assert!((metrics.death_rate() - 0.5).abs() < 1e-6);
        assert!((metrics.avg_kills() - 1.0).abs() < 1e-6);
        assert_eq!(metrics.terminations.get("StepLimit"), Some(&1));
    }

    #[test]
    fn test_summary_serializes() {
        let mut metrics = EvaluationMetrics::new();
        metrics.record_episode(&episode(&[1.0], TerminationReason::AgentDestroyed, 1));
        let json = serde_json::to_string(&metrics).unwrap();
        let back: EvaluationMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metrics);
    }

    #[test]
    fn test_training_metrics_death_rate() {
        let mut metrics = TrainingMetrics::new(10);
        metrics.record_episode(&episode(&[1.0], TerminationReason::AgentDestroyed, 0));
        metrics.record_episode(&episode(&[1.0], TerminationReason::StepLimit, 0));
        assert_eq!(metrics.episodes, 2);
        assert!((metrics.death_rate.average() - 0.5).abs() < 1e-6);
    }
}
