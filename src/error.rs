use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid match filter: {0}")]
    InvalidFilter(String),

    #[error("match filter references unknown match ids: {0:?}")]
    UnknownMatch(Vec<u64>),

    #[error("unknown stage: {0}")]
    InvalidStage(String),

    #[error("run budget of {budget:?} exceeded during {phase} after {elapsed:?}")]
    TimedOut {
        phase: String,
        budget: Duration,
        elapsed: Duration,
    },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl RunError {
    /// True for errors raised before any computation started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RunError::InvalidFilter(_) | RunError::UnknownMatch(_) | RunError::InvalidStage(_)
        )
    }
}
