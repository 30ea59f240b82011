//! Process handle for worker subprocesses.
//!
//! Wraps a spawned child with the tasks that drive its pipes: a writer fed
//! by a channel, a stdout reader that forwards reply lines, a stderr reader
//! that watches for the readiness marker, and a monitor that reports exit.

use super::protocol::WorkRequest;
use super::signals::TerminationReason;
use crate::error::{CoreError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long the monitor waits for stdout to drain after the process exits.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Events a worker process reports back to its pool.
#[derive(Debug)]
pub enum ProcEvent {
    /// One non-empty stdout line.
    Line {
        slot: usize,
        generation: u64,
        line: String,
    },
    /// The process is gone. Always sent after the last `Line`.
    Exited {
        slot: usize,
        generation: u64,
        reason: TerminationReason,
    },
}

/// Handle to a running worker subprocess.
pub struct WorkerProc {
    pid: Option<u32>,
    lines: Option<mpsc::UnboundedSender<String>>,
    exited: Arc<AtomicBool>,
    kill_sent: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl WorkerProc {
    /// Take over a spawned child and start its pipe tasks.
    ///
    /// Returns the handle plus a receiver that resolves once the readiness
    /// marker shows up on stderr. The receiver errors if stderr closes first.
    pub fn launch(
        mut child: Child,
        slot: usize,
        generation: u64,
        events: mpsc::UnboundedSender<ProcEvent>,
        ready_marker: String,
    ) -> Result<(Self, oneshot::Receiver<()>)> {
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| missing_pipe("stderr"))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));
        let kill_sent = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(stdin, line_rx, slot));
        let reader = tokio::spawn(read_loop(stdout, slot, generation, events.clone()));
        tokio::spawn(stderr_loop(stderr, slot, ready_marker, ready_tx));
        let monitor = tokio::spawn(monitor_loop(
            child,
            reader,
            slot,
            generation,
            events,
            exited.clone(),
            kill_sent.clone(),
        ));

        Ok((
            Self {
                pid,
                lines: Some(line_tx),
                exited,
                kill_sent,
                monitor: Some(monitor),
            },
            ready_rx,
        ))
    }

    /// Get the process ID.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a request for the worker's stdin.
    ///
    /// Returns `false` when the writer is gone (stdin closed or broken pipe).
    pub fn send(&self, request: &WorkRequest) -> bool {
        match &self.lines {
            Some(tx) => tx.send(request.to_line()).is_ok(),
            None => false,
        }
    }

    /// Close stdin so the worker sees EOF.
    pub fn close_stdin(&mut self) {
        self.lines = None;
    }

    /// Whether the monitor has observed the exit.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) {
        self.signal(Signal::SIGTERM);
    }

    /// Send SIGKILL to the process.
    pub fn kill(&self) {
        if !self.has_exited() {
            self.kill_sent.store(true, Ordering::Release);
        }
        self.signal(Signal::SIGKILL);
    }

    fn signal(&self, sig: Signal) {
        if self.has_exited() {
            return;
        }
        if let Some(pid) = self.pid
            && let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig)
        {
            tracing::debug!(pid, signal = ?sig, error = %e, "Failed to signal worker");
        }
    }

    /// Detach the monitor task so a caller can await the exit.
    pub fn take_monitor(&mut self) -> Option<JoinHandle<()>> {
        self.monitor.take()
    }
}

fn missing_pipe(name: &str) -> CoreError {
    CoreError::Io(std::io::Error::other(format!("Child {} not captured", name)))
}

async fn write_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>, slot: usize) {
    while let Some(line) = rx.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(slot, error = %e, "Failed to write to worker stdin");
            break;
        }
    }
    // Dropping stdin delivers EOF to the worker.
}

async fn read_loop(
    stdout: ChildStdout,
    slot: usize,
    generation: u64,
    events: mpsc::UnboundedSender<ProcEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if events
                    .send(ProcEvent::Line {
                        slot,
                        generation,
                        line,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(slot, error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }
}

async fn stderr_loop(
    stderr: ChildStderr,
    slot: usize,
    ready_marker: String,
    ready_tx: oneshot::Sender<()>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(slot, "worker: {}", line);
        if line.contains(&ready_marker)
            && let Some(tx) = ready_tx.take()
        {
            let _ = tx.send(());
        }
    }
}

async fn monitor_loop(
    mut child: Child,
    reader: JoinHandle<()>,
    slot: usize,
    generation: u64,
    events: mpsc::UnboundedSender<ProcEvent>,
    exited: Arc<AtomicBool>,
    kill_sent: Arc<AtomicBool>,
) {
    let status = child.wait().await;
    exited.store(true, Ordering::Release);

    // Replies written just before exit must be delivered before the exit itself.
    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, reader).await.is_err() {
        tracing::debug!(slot, "Worker stdout still open after exit");
    }

    let reason = match status {
        Ok(status) => TerminationReason::from_status_after_kill(status, kill_sent.load(Ordering::Acquire)),
        Err(e) => {
            tracing::warn!(slot, error = %e, "Failed to wait for worker");
            TerminationReason::Unknown
        }
    };
    let _ = events.send(ProcEvent::Exited {
        slot,
        generation,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::super::spawn::{WorkerCommand, spawn_worker};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cat_echoes_lines_and_reports_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let child = spawn_worker(&WorkerCommand::new("cat")).expect("Failed to spawn cat");
        let (mut proc, _ready) =
            WorkerProc::launch(child, 0, 1, tx, "never printed".to_string()).unwrap();

        assert!(proc.send(&WorkRequest::new("1", "echo", json!([]))));
        match rx.recv().await {
            Some(ProcEvent::Line { slot, generation, line }) => {
                assert_eq!((slot, generation), (0, 1));
                assert!(line.contains("\"echo\""));
            }
            other => panic!("Expected Line, got {:?}", other),
        }

        proc.close_stdin();
        match rx.recv().await {
            Some(ProcEvent::Exited { reason, .. }) => assert!(reason.is_success()),
            other => panic!("Expected Exited, got {:?}", other),
        }
        assert!(proc.has_exited());
    }

    #[tokio::test]
    async fn test_ready_marker_on_stderr() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let child = spawn_worker(
            &WorkerCommand::new("sh")
                .arg("-c")
                .arg("echo 'loading' >&2; echo 'Service ready - waiting' >&2; cat"),
        )
        .expect("Failed to spawn sh");
        let (proc, ready) =
            WorkerProc::launch(child, 2, 1, tx, "Service ready".to_string()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), ready)
            .await
            .expect("ready timed out")
            .expect("ready sender dropped");
        proc.kill();
    }

    #[tokio::test]
    async fn test_kill_is_reported_as_our_own() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let child = spawn_worker(&WorkerCommand::new("cat")).expect("Failed to spawn cat");
        let (proc, _ready) = WorkerProc::launch(child, 0, 1, tx, "never printed".to_string()).unwrap();

        proc.kill();
        match rx.recv().await {
            Some(ProcEvent::Exited { reason, .. }) => assert_eq!(reason, TerminationReason::Killed),
            other => panic!("Expected Exited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ready_receiver_errors_when_process_dies_first() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let child = spawn_worker(&WorkerCommand::new("sh").arg("-c").arg("exit 1"))
            .expect("Failed to spawn sh");
        let (_proc, ready) = WorkerProc::launch(child, 0, 1, tx, "Service ready".to_string()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), ready)
            .await
            .expect("ready timed out");
        assert!(outcome.is_err());
    }
}
