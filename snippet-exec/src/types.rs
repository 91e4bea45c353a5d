use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code reported when the deadline expired, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the service itself failed to run the snippet.
pub const INTERNAL_EXIT_CODE: i32 = 125;
pub const UNAUTHORIZED_EXIT_CODE: i32 = 2;
pub const MISSING_CODE_EXIT_CODE: i32 = 1;

/// One caller submission. Owned by a single pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Source code to execute
    pub code: String,
    /// Credential presented by the caller, if any
    pub credential: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            code: code.into(),
            credential,
        }
    }
}

/// How an execution attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    SpawnFailed(String),
}

/// Raw result of one interpreter run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: INTERNAL_EXIT_CODE,
            status: ExecutionStatus::SpawnFailed(reason.into()),
            elapsed: Duration::ZERO,
        }
    }
}

/// Response body returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
}

/// Limits applied to the interpreter process before exec
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum CPU time (seconds)
    pub cpu_time: u64,
    /// Maximum size of any file the process writes (bytes)
    pub file_size: u64,
    /// Bytes kept from each of stdout and stderr; the rest is drained and discarded
    pub output_limit: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: 30,
            file_size: 10 * 1024 * 1024, // 10MB
            output_limit: 1024 * 1024,   // 1MB
        }
    }
}
