//! Wire protocol for worker subprocess communication.
//!
//! Messages are JSON-serialized and newline-delimited. Requests carry an
//! explicit schema version; replies may echo it and are rejected when they
//! announce a different one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current protocol schema version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default readiness marker a worker prints on stderr once it has loaded.
pub const DEFAULT_READY_MARKER: &str = "Service ready";

/// Request frame from parent to worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkRequest {
    /// Schema version.
    pub v: u32,
    /// Correlation id, echoed back as `request_id`.
    pub id: String,
    /// Computation to run.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Positional or named parameters.
    #[serde(default)]
    pub params: Value,
}

impl WorkRequest {
    pub fn new(id: impl Into<String>, request_type: impl Into<String>, params: Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id: id.into(),
            request_type: request_type.into(),
            params,
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        // A struct of strings and a `Value` always serializes.
        let mut json = serde_json::to_string(self).unwrap_or_default();
        json.push('\n');
        json
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Raw reply frame as written by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplyFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyFrame {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            v: Some(PROTOCOL_VERSION),
            request_id: Some(request_id.into()),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            v: Some(PROTOCOL_VERSION),
            request_id,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).unwrap_or_default();
        json.push('\n');
        json
    }
}

/// A decoded worker reply.
///
/// The closed set of shapes a stdout line can take once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkResponse {
    /// Successful computation.
    Success { request_id: String, data: Value },
    /// The worker ran the request and reported a failure.
    Failure { request_id: String, message: String },
    /// A failure the worker could not attribute to a request
    /// (e.g. it failed to parse what we sent).
    Unattributed { message: String },
}

/// Why a stdout line could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Not JSON, or JSON of the wrong shape.
    Invalid(String),
    /// The reply announced a schema version we do not speak.
    Version(u32),
    /// A successful reply without a correlation id.
    MissingId,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid reply frame: {}", msg),
            Self::Version(v) => write!(
                f,
                "unsupported protocol version {} (expected {})",
                v, PROTOCOL_VERSION
            ),
            Self::MissingId => write!(f, "successful reply without request_id"),
        }
    }
}

impl WorkResponse {
    /// Decode one stdout line.
    pub fn from_line(line: &str) -> Result<Self, FrameError> {
        let frame: ReplyFrame =
            serde_json::from_str(line.trim()).map_err(|e| FrameError::Invalid(e.to_string()))?;

        if let Some(v) = frame.v
            && v != PROTOCOL_VERSION
        {
            return Err(FrameError::Version(v));
        }

        match (frame.success, frame.request_id) {
            (true, Some(request_id)) => Ok(Self::Success {
                request_id,
                data: frame.data.unwrap_or(Value::Null),
            }),
            (true, None) => Err(FrameError::MissingId),
            (false, Some(request_id)) => Ok(Self::Failure {
                request_id,
                message: frame.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
            (false, None) => Ok(Self::Unattributed {
                message: frame.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    /// Correlation id, if the reply carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Success { request_id, .. } | Self::Failure { request_id, .. } => Some(request_id),
            Self::Unattributed { .. } => None,
        }
    }
}
