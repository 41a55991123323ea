//! Wire types shared by the HTTP front, the dispatcher, and both executors.
//!
//! The four status ids (3, 5, 7, 11) are part of the external contract and
//! must never be renumbered; clients switch on them.

use serde::{Deserialize, Serialize};

/// Fixed token carried by every execution result.
pub const RESULT_TOKEN: &str = "ws-exec";

/// Outcome of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Accepted,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
}

impl ExecStatus {
    /// Wire-stable integer code.
    pub fn id(self) -> i32 {
        match self {
            ExecStatus::Accepted => 3,
            ExecStatus::TimeLimitExceeded => 5,
            ExecStatus::MemoryLimitExceeded => 7,
            ExecStatus::RuntimeError => 11,
        }
    }

    /// Canonical human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ExecStatus::Accepted => "Accepted",
            ExecStatus::TimeLimitExceeded => "Time Limit Exceeded",
            ExecStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
            ExecStatus::RuntimeError => "Runtime Error",
        }
    }

    /// Maps a wire id back to a status. Ids outside the contract yield `None`.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            3 => Some(ExecStatus::Accepted),
            5 => Some(ExecStatus::TimeLimitExceeded),
            7 => Some(ExecStatus::MemoryLimitExceeded),
            11 => Some(ExecStatus::RuntimeError),
            _ => None,
        }
    }
}

/// Body of `POST /execute`. Absent fields decode to their zero values;
/// unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub language_id: i32,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub timeout_ms: i64,
}

/// Status portion of an execution result.
///
/// The description usually mirrors [`ExecStatus::description`], but the
/// admission path reports `Runtime Error` under the description `Queue Full`,
/// so it is carried as data rather than derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteStatus {
    pub id: i32,
    pub description: String,
}

impl ExecuteStatus {
    pub fn of(status: ExecStatus) -> Self {
        Self {
            id: status.id(),
            description: status.description().to_string(),
        }
    }
}

/// Body of the `POST /execute` response. Always delivered with HTTP 200;
/// the outcome lives in `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub token: String,
    pub status: ExecuteStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub execution_time_ms: i64,
}

impl ExecuteResult {
    /// Empty result for the given status.
    pub fn new(status: ExecStatus) -> Self {
        Self {
            token: RESULT_TOKEN.to_string(),
            status: ExecuteStatus::of(status),
            stdout: String::new(),
            stderr: String::new(),
            message: String::new(),
            execution_time_ms: 0,
        }
    }

    /// Runtime-error result carrying only a message.
    pub fn error(message: impl Into<String>) -> Self {
        let mut result = Self::new(ExecStatus::RuntimeError);
        result.message = message.into();
        result
    }

    /// Result for the given status with a message attached.
    pub fn with_message(status: ExecStatus, message: impl Into<String>) -> Self {
        let mut result = Self::new(status);
        result.message = message.into();
        result
    }
}
