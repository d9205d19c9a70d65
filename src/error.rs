//! Error taxonomy for the control core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The world snapshot could not be encoded
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("invalid world state: {0}")]
    InvalidWorldState(String),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action id {id} is outside the action set (0..{count})")]
    InvalidActionId { id: u32, count: u32 },
}

/// Reasons a policy artifact is rejected
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read policy artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt policy artifact: {0}")]
    Corrupt(String),
    #[error("unsupported policy format tag {0:?}")]
    UnsupportedFormat(String),
    #[error("unsupported policy version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("policy expects {found} observation values, encoder produces {expected}")]
    ObservationSizeMismatch { expected: usize, found: usize },
    #[error("policy emits {found} actions, action set has {expected}")]
    ActionCountMismatch { expected: usize, found: usize },
    #[error("layer {index}: {reason}")]
    LayerShape { index: usize, reason: String },
    #[error("normalization statistics have {found} entries, expected {expected}")]
    NormalizationMismatch { expected: usize, found: usize },
    #[error("policy parameters contain non-finite values")]
    NonFiniteParameters,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("observation has {found} values, policy expects {expected}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("observation contains non-finite values")]
    NonFiniteInput,
    #[error("policy produced non-finite logits")]
    NonFiniteOutput,
    #[error("policy selected invalid action: {0}")]
    InvalidAction(#[from] ActionError),
    #[error("policy backend failed: {0}")]
    Backend(String),
    #[error("{overruns} consecutive inferences over budget (last took {elapsed:?}, budget is {budget:?})")]
    BudgetExceeded {
        overruns: u32,
        elapsed: Duration,
        budget: Duration,
    },
}

/// Rejected configuration values
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Writing a policy checkpoint failed
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("cannot write policy artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize policy: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cannot record policy weights: {0}")]
    Record(String),
}

/// Failures of the rollout and evaluation runner
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Save(#[from] SaveError),
}
