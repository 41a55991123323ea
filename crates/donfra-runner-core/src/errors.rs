//! Error types for the execution dispatcher.
//!
//! These cover setup and plumbing failures only. Outcomes of user programs
//! are never errors; they are [`crate::types::ExecuteResult`] values, and
//! nothing above the dispatcher ever observes an internal failure kind.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("unsupported language_id: {0}")]
    UnsupportedLanguage(i32),

    #[error("no execution slot became available within {0:?}")]
    AdmissionTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
