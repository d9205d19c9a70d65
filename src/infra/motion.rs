//! Motion smoothing - turns discrete movement intents into bounded velocity

use super::Vec2;

/// Velocities below this magnitude settle to zero when no movement is requested
const REST_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Maximum speed in pixels per tick
    pub max_speed: f32,
    /// Maximum change of velocity per tick
    pub max_acceleration: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_speed: 5.0,
            max_acceleration: 0.75,
        }
    }
}

/// Rate-limits velocity changes so either decision source produces continuous motion
#[derive(Debug, Clone)]
pub struct MotionSmoother {
    config: MotionConfig,
}

impl MotionSmoother {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Steps `previous` toward `raw_intent` (a desired velocity).
    ///
    /// The result never exceeds `max_speed` and differs from the (sanitized)
    /// previous velocity by at most `max_acceleration`. Reversing the intent
    /// therefore decelerates through zero over several ticks.
    pub fn smooth(&self, raw_intent: Vec2, previous: Vec2) -> Vec2 {
        let max_speed = self.config.max_speed.max(0.0);
        let max_accel = self.config.max_acceleration.max(0.0);

        let previous = if previous.is_finite() {
            previous.clamp_length(max_speed)
        } else {
            Vec2::ZERO
        };
        let desired = if raw_intent.is_finite() {
            raw_intent.clamp_length(max_speed)
        } else {
            Vec2::ZERO
        };

        // Both endpoints lie inside the speed disc, so any point between them does too
        let delta = (desired - previous).clamp_length(max_accel);
        let next = previous + delta;

        if desired == Vec2::ZERO && next.length() < REST_EPSILON.min(max_accel) {
            Vec2::ZERO
        } else {
            next
        }
    }

    /// Smooths a unit direction scaled to full speed
    pub fn smooth_direction(&self, direction: Vec2, previous: Vec2) -> Vec2 {
        self.smooth(direction * self.config.max_speed, previous)
    }
}
