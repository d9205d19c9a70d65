//! Policy inference engine - queries a loaded policy for one action per tick

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{InferenceError, LoadError};

use super::action_space::ActionId;
use super::encoder::ObservationVector;
use super::policy::Policy;

/// Configuration for policy inference
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Wall time one `infer` call should take; `None` disables the check
    pub budget: Option<Duration>,
    /// Over-budget calls in a row tolerated before inference fails
    pub max_consecutive_overruns: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            budget: Some(Duration::from_millis(8)),
            max_consecutive_overruns: 3,
        }
    }
}

impl InferenceConfig {
    /// No latency budget; actions depend only on the observation
    pub fn unbounded() -> Self {
        Self {
            budget: None,
            ..Self::default()
        }
    }
}

/// Latency bookkeeping exposed for health reporting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceStats {
    pub calls: u64,
    pub failures: u64,
    /// Calls that ran over budget
    pub overruns: u64,
    pub consecutive_overruns: u32,
    pub last_latency: Duration,
    pub max_latency: Duration,
    pub total_latency: Duration,
}

impl InferenceStats {
    pub fn mean_latency(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total_latency.as_secs_f64() / self.calls as f64)
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.calls += 1;
        self.last_latency = elapsed;
        self.total_latency += elapsed;
        self.max_latency = self.max_latency.max(elapsed);
    }
}

/// Owns a shared, immutable policy and turns observations into actions
#[derive(Debug, Clone)]
pub struct PolicyInferenceEngine {
    policy: Arc<Policy>,
    config: InferenceConfig,
    stats: InferenceStats,
}

impl PolicyInferenceEngine {
    pub fn new(policy: Arc<Policy>, config: InferenceConfig) -> Self {
        Self {
            policy,
            config,
            stats: InferenceStats::default(),
        }
    }

    /// Load a policy artifact sized for `expected_obs_len` observations
    pub fn load(
        path: &Path,
        expected_obs_len: usize,
        config: InferenceConfig,
    ) -> Result<Self, LoadError> {
        let policy = Policy::load(path, expected_obs_len)?;
        Ok(Self::new(Arc::new(policy), config))
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    pub fn stats(&self) -> &InferenceStats {
        &self.stats
    }

    /// Greedy action for an observation (lowest index wins ties)
    pub fn infer(&mut self, observation: &ObservationVector) -> Result<ActionId, InferenceError> {
        let start = Instant::now();
        let result = self.select(observation);
        let elapsed = start.elapsed();
        self.stats.record(elapsed);

        let result = result.and_then(|action| self.check_budget(elapsed).map(|()| action));
        if result.is_err() {
            self.stats.failures += 1;
        }
        result
    }

    /// Isolated overruns are tolerated; a run of them fails the call
    fn check_budget(&mut self, elapsed: Duration) -> Result<(), InferenceError> {
        let Some(budget) = self.config.budget else {
            return Ok(());
        };
        if elapsed <= budget {
            self.stats.consecutive_overruns = 0;
            return Ok(());
        }

        self.stats.overruns += 1;
        self.stats.consecutive_overruns += 1;
        let overruns = self.stats.consecutive_overruns;
        if overruns >= self.config.max_consecutive_overruns.max(1) {
            return Err(InferenceError::BudgetExceeded {
                overruns,
                elapsed,
                budget,
            });
        }
        warn!(
            "Policy inference took {:?}, budget is {:?} ({} in a row)",
            elapsed, budget, overruns
        );
        Ok(())
    }

    fn select(&self, observation: &ObservationVector) -> Result<ActionId, InferenceError> {
        let obs = observation.as_slice();
        let expected = self.policy.observation_size();
        if obs.len() != expected {
            return Err(InferenceError::ShapeMismatch {
                expected,
                found: obs.len(),
            });
        }
        if obs.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFiniteInput);
        }

        let logits = self.policy.logits(obs)?;
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFiniteOutput);
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, &logit) in logits.iter().enumerate() {
            if best.is_none_or(|(_, v)| logit > v) {
                best = Some((i, logit));
            }
        }
        let (index, _) = best.ok_or(InferenceError::NonFiniteOutput)?;
        Ok(ActionId::try_from(index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planners::rl::action_space::NUM_ACTIONS;
    use crate::planners::rl::policy::{LayerWeights, Normalization};

    /// Policy whose logits are `bias`, independent of the observation
    fn constant_policy(obs: usize, bias: Vec<f32>) -> Policy {
        let outputs = bias.len();
        Policy::new(
            obs,
            Normalization::identity(obs),
            vec![LayerWeights {
                weights: vec![vec![0.0; outputs]; obs],
                bias,
            }],
        )
        .unwrap()
    }

    fn engine(policy: Policy) -> PolicyInferenceEngine {
        PolicyInferenceEngine::new(Arc::new(policy), InferenceConfig::unbounded())
    }

    fn budgeted_engine() -> PolicyInferenceEngine {
        PolicyInferenceEngine::new(
            Arc::new(constant_policy(1, vec![0.0; NUM_ACTIONS])),
            InferenceConfig::default(),
        )
    }

    #[test]
    fn test_argmax_lowest_index_on_ties() {
        let mut bias = vec![0.0; NUM_ACTIONS];
        bias[3] = 2.0;
        bias[9] = 2.0;
        let mut engine = engine(constant_policy(4, bias));
        let action = engine.infer(&ObservationVector::zeros(4)).unwrap();
        assert_eq!(action.id(), 3);
        assert_eq!(engine.stats().calls, 1);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut engine = engine(constant_policy(4, vec![0.0; NUM_ACTIONS]));
        assert_eq!(
            engine.infer(&ObservationVector::zeros(5)),
            Err(InferenceError::ShapeMismatch { expected: 4, found: 5 })
        );
        assert_eq!(engine.stats().failures, 1);
    }

    #[test]
    fn test_non_finite_input() {
        let mut engine = engine(constant_policy(2, vec![0.0; NUM_ACTIONS]));
        let obs = ObservationVector::from(vec![0.0, f32::NAN]);
        assert_eq!(engine.infer(&obs), Err(InferenceError::NonFiniteInput));
    }

    #[test]
    fn test_non_finite_output() {
        // Finite weights can still overflow
        let policy = Policy::new(
            1,
            Normalization::identity(1),
            vec![LayerWeights {
                weights: vec![vec![f32::MAX; NUM_ACTIONS]],
                bias: vec![f32::MAX; NUM_ACTIONS],
            }],
        )
        .unwrap();
        let mut engine = engine(policy);
        let obs = ObservationVector::from(vec![1.0]);
        assert_eq!(engine.infer(&obs), Err(InferenceError::NonFiniteOutput));
    }

    #[test]
    fn test_isolated_overruns_tolerated() {
        let mut engine = budgeted_engine();
        let slow = Duration::from_millis(50);
        let fast = Duration::from_millis(1);

        assert!(engine.check_budget(slow).is_ok());
        assert!(engine.check_budget(slow).is_ok());
        assert!(engine.check_budget(fast).is_ok());
        assert_eq!(engine.stats().consecutive_overruns, 0);
        assert!(engine.check_budget(slow).is_ok());
        assert_eq!(engine.stats().overruns, 3);
    }

    #[test]
    fn test_run_of_overruns_fails() {
        let mut engine = budgeted_engine();
        let slow = Duration::from_millis(50);
        assert!(engine.check_budget(slow).is_ok());
        assert!(engine.check_budget(slow).is_ok());
        assert!(matches!(
            engine.check_budget(slow),
            Err(InferenceError::BudgetExceeded { overruns: 3, .. })
        ));
    }

    #[test]
    fn test_unbounded_never_checks_latency() {
        let mut engine = engine(constant_policy(1, vec![0.0; NUM_ACTIONS]));
        for _ in 0..10 {
            assert!(engine.check_budget(Duration::from_secs(1)).is_ok());
        }
        assert_eq!(engine.stats().overruns, 0);
    }

    #[test]
    fn test_mean_latency() {
        let mut stats = InferenceStats::default();
        assert_eq!(stats.mean_latency(), Duration::ZERO);
        stats.record(Duration::from_millis(2));
        stats.record(Duration::from_millis(4));
        assert!((stats.mean_latency().as_secs_f64() - 0.003).abs() < 1e-9);
        assert_eq!(stats.max_latency, Duration::from_millis(4));

        // More calls than fit in a u32
        let stats = InferenceStats {
            calls: u64::from(u32::MAX) + 2,
            total_latency: Duration::from_secs(u64::from(u32::MAX) + 2),
            ..InferenceStats::default()
        };
        assert!((stats.mean_latency().as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_policy_actions_in_range() {
        let mut engine = engine(Policy::random(8, &[16], 5));
        for k in 0..50 {
            let obs: Vec<f32> = (0..8).map(|i| ((i * 7 + k) % 11) as f32 / 5.5 - 1.0).collect();
            let action = engine.infer(&ObservationVector::from(obs)).unwrap();
            assert!(action.index() < NUM_ACTIONS);
        }
    }
}
