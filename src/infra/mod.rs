mod motion;
mod types;

pub use motion::{MotionConfig, MotionSmoother};
pub use types::{Bounds, Vec2};
