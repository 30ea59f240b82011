//! Error types for transit-core.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the request-serving core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Worker {slot} did not signal readiness within {}ms", timeout.as_millis())]
    WorkerInitTimeout { slot: usize, timeout: Duration },

    #[error("Request waited {}ms in queue without a free worker", waited.as_millis())]
    DispatchTimeout { waited: Duration },

    #[error("Worker {slot} exited: {reason}")]
    WorkerExited { slot: usize, reason: String },

    #[error("Malformed worker output: {0}")]
    MalformedWorkerOutput(String),

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("No response within {}ms", timeout.as_millis())]
    CallTimeout { timeout: Duration },

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable machine-readable code, used in API error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkerInitTimeout { .. } => "WORKER_INIT_TIMEOUT",
            Self::DispatchTimeout { .. } => "DISPATCH_TIMEOUT",
            Self::WorkerExited { .. } => "WORKER_EXITED",
            Self::MalformedWorkerOutput(_) => "MALFORMED_WORKER_OUTPUT",
            Self::SpawnFailure { .. } => "SPAWN_FAILURE",
            Self::Computation(_) => "COMPUTATION_ERROR",
            Self::CallTimeout { .. } => "CALL_TIMEOUT",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
