//! Transient one-shot processes.
//!
//! Some computations run as a fresh process per call: the input JSON goes in
//! as the last argument and the process prints one JSON object on stdout.

use super::signals::TerminationReason;
use super::spawn::{WorkerCommand, spawn_oneshot};
use crate::error::{CoreError, Result};
use serde_json::Value;
use std::process::Output;
use std::time::Duration;
use tracing::{debug, warn};

/// How many trailing stderr lines go into an error message.
const STDERR_TAIL_LINES: usize = 5;

/// Runs one process per call and decodes its single JSON result.
#[derive(Debug, Clone)]
pub struct OneShotRunner {
    command: WorkerCommand,
    timeout: Duration,
}

impl OneShotRunner {
    pub fn new(command: WorkerCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Run the program with `input` and return its result object without the
    /// `success` flag.
    ///
    /// A process still running at the deadline is killed.
    pub async fn run(&self, input: &Value) -> Result<Value> {
        let payload = serde_json::to_string(input)?;
        let child = spawn_oneshot(&self.command, payload)?;
        let pid = child.id();
        debug!(pid = ?pid, program = %self.command.display_name(), "Started one-shot process");

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    pid = ?pid,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "One-shot process timed out, killed"
                );
                return Err(CoreError::CallTimeout {
                    timeout: self.timeout,
                });
            }
        };

        decode_output(&output)
    }
}

/// Interpret the last non-empty stdout line as the result.
fn decode_output(output: &Output) -> Result<Value> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| serde_json::from_str::<Value>(l.trim()).ok());

    match parsed {
        Some(Value::Object(mut object)) => {
            match object.remove("success") {
                Some(Value::Bool(false)) => {
                    let message = object
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("computation failed");
                    Err(CoreError::Computation(message.to_string()))
                }
                _ => Ok(Value::Object(object)),
            }
        }
        Some(other) if output.status.success() => Ok(other),
        _ if !output.status.success() => {
            let reason = TerminationReason::from_status(output.status);
            let tail = stderr_tail(&output.stderr);
            Err(CoreError::Computation(if tail.is_empty() {
                format!("process {}", reason)
            } else {
                format!("process {}: {}", reason, tail)
            }))
        }
        _ => Err(CoreError::MalformedWorkerOutput(
            "process printed no JSON result".to_string(),
        )),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("; ")
}
