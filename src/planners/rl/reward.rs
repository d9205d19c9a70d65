//! Reward composition: a weighted sum of named per-step components

use serde::{Deserialize, Serialize};

/// Weight per reward component. Damage and missed shots are penalties and
/// are subtracted, so their weights are given as positive magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub survival: f32,
    pub enemy_kill: f32,
    pub power_up: f32,
    pub damage_taken: f32,
    pub missed_shot: f32,
    pub efficiency: f32,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            survival: 0.1,
            enemy_kill: 50.0,
            power_up: 5.0,
            damage_taken: 2.0,
            missed_shot: 0.05,
            efficiency: 0.01,
        }
    }
}

/// Raw measurements for one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardComponents {
    /// 1 while the agent is alive after the step
    pub survival: f32,
    pub enemy_kills: f32,
    pub power_ups: f32,
    pub damage_taken: f32,
    pub missed_shots: f32,
    /// Running efficiency score in `[0, 1]`
    pub efficiency: f32,
}

impl RewardComponents {
    pub fn total(&self, weights: &RewardWeights) -> f32 {
        weights.survival * self.survival
            + weights.enemy_kill * self.enemy_kills
            + weights.power_up * self.power_ups
            - weights.damage_taken * self.damage_taken
            - weights.missed_shot * self.missed_shots
            + weights.efficiency * self.efficiency
    }

    pub fn accumulate(&mut self, other: &RewardComponents) {
        self.survival += other.survival;
        self.enemy_kills += other.enemy_kills;
        self.power_ups += other.power_ups;
        self.damage_taken += other.damage_taken;
        self.missed_shots += other.missed_shots;
        self.efficiency = other.efficiency;
    }
}

/// Kill/collection rate minus damage rate over the episode so far, clamped to `[0, 1]`
pub fn efficiency_score(kills: u32, pickups: u32, damage: u32, steps: u32) -> f32 {
    if steps == 0 {
        return 0.0;
    }
    let steps = steps as f32;
    let score = 0.6 * kills as f32 / steps + 0.3 * pickups as f32 / steps - 0.1 * damage as f32 / steps;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_sum() {
        let weights = RewardWeights {
            survival: 1.0,
            enemy_kill: 10.0,
            power_up: 3.0,
            damage_taken: 4.0,
            missed_shot: 0.5,
            efficiency: 2.0,
        };
        let components = RewardComponents {
            survival: 1.0,
            enemy_kills: 2.0,
            power_ups: 1.0,
            damage_taken: 1.0,
            missed_shots: 2.0,
            efficiency: 0.5,
        };
        // 1 + 20 + 3 - 4 - 1 + 1
        assert!((components.total(&weights) - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_penalties_are_negative() {
        let weights = RewardWeights::default();
        let hit = RewardComponents {
            damage_taken: 1.0,
            ..RewardComponents::default()
        };
        assert!(hit.total(&weights) < 0.0);
        let miss = RewardComponents {
            missed_shots: 1.0,
            ..RewardComponents::default()
        };
        assert!(miss.total(&weights) < 0.0);
    }

    #[test]
    fn test_efficiency_clamped() {
        assert_eq!(efficiency_score(0, 0, 0, 0), 0.0);
        assert_eq!(efficiency_score(0, 0, 5, 10), 0.0);
        assert_eq!(efficiency_score(10, 10, 0, 1), 1.0);
        assert!((efficiency_score(1, 1, 1, 10) - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_accumulate() {
        let mut sum = RewardComponents::default();
        let step = RewardComponents {
            survival: 1.0,
            enemy_kills: 1.0,
            efficiency: 0.3,
            ..RewardComponents::default()
        };
        sum.accumulate(&step);
        sum.accumulate(&step);
        assert_eq!(sum.survival, 2.0);
        assert_eq!(sum.enemy_kills, 2.0);
        assert_eq!(sum.efficiency, 0.3);
    }
}
