//! Worker pool with a FIFO overflow queue.
//!
//! Owns a fixed number of long-lived worker processes. Each slot runs at most
//! one request at a time; requests that find no free slot wait in a FIFO
//! queue. Every request settles exactly once: with the worker's reply, or
//! with a queue timeout, a per-call deadline, a worker exit, malformed
//! output, or shutdown. Whichever event removes the completion handle from
//! the pool state first wins.

use super::proc::{ProcEvent, WorkerProc};
use super::protocol::{DEFAULT_READY_MARKER, WorkRequest, WorkResponse};
use super::signals::TerminationReason;
use super::spawn::{WorkerCommand, spawn_worker};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(250);
const MAX_RESTART_DELAY: Duration = Duration::from_secs(30);

/// Longest slice of a bad output line kept in logs and errors.
const MAX_LOGGED_LINE: usize = 200;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker processes to spawn.
    pub pool_size: usize,
    /// Worker program.
    pub command: WorkerCommand,
    /// Stderr text that marks a worker as ready.
    pub ready_marker: String,
    /// How long a fresh worker has to print the marker.
    pub ready_timeout: Duration,
    /// How long a request may wait for a free worker.
    pub queue_timeout: Duration,
    /// How long a dispatched request may wait for its reply.
    pub call_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
    /// First delay before respawning a crashed worker (doubles on failure).
    pub restart_delay: Duration,
}

impl WorkerPoolConfig {
    /// Defaults for everything but the worker program.
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            command,
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// Lifecycle state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Initializing,
    Available,
    Busy,
    Crashed,
    Restarting,
    Terminated,
}

type Reply = oneshot::Sender<Result<Value>>;

/// A request assigned to a slot and waiting for its reply.
struct PendingCall {
    id: u64,
    reply: Reply,
    submitted_at: Instant,
    deadline: Option<AbortHandle>,
}

impl PendingCall {
    fn settle(mut self, outcome: Result<Value>) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        // The caller may have stopped waiting; that is fine.
        let _ = self.reply.send(outcome);
    }
}

/// A request waiting for a free slot.
struct QueuedRequest {
    id: u64,
    request_type: String,
    params: Value,
    reply: Reply,
    enqueued_at: Instant,
    timer: Option<AbortHandle>,
}

struct Slot {
    id: usize,
    state: SlotState,
    generation: u64,
    proc: Option<WorkerProc>,
    pending: Option<PendingCall>,
    requests_served: u64,
    restarts: u64,
    started_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
}

impl Slot {
    fn new(id: usize) -> Self {
        Self {
            id,
            state: SlotState::Initializing,
            generation: 0,
            proc: None,
            pending: None,
            requests_served: 0,
            restarts: 0,
            started_at: None,
            last_activity: None,
        }
    }

    /// Kill the process and keep the slot out of rotation until it exits.
    fn recycle(&mut self) {
        self.state = SlotState::Crashed;
        if let Some(proc) = &self.proc {
            proc.kill();
        }
    }
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    queue: VecDeque<QueuedRequest>,
    closed: bool,
    next_generation: u64,
}

impl PoolState {
    fn slot_mut(&mut self, id: usize) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    fn available_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::Available)
    }
}

struct PoolInner {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    next_request_id: AtomicU64,
    events: mpsc::UnboundedSender<ProcEvent>,
}

/// A pool of long-lived worker subprocesses.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create an idle pool. No process is spawned until [`initialize`](Self::initialize).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            config,
            state: Mutex::new(PoolState::default()),
            next_request_id: AtomicU64::new(1),
            events,
        });
        tokio::spawn(event_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Spawn all workers concurrently and wait for each to become ready.
    ///
    /// Slots that fail to start are reported and left out of the pool; the
    /// remaining slots serve requests normally.
    pub async fn initialize(&self) -> InitReport {
        let size = self.inner.config.pool_size;
        {
            let mut state = self.inner.lock();
            if state.closed || !state.slots.is_empty() {
                warn!("Worker pool already initialized or shut down");
                return InitReport::default();
            }
            state.slots = (0..size).map(Slot::new).collect();
        }

        info!(
            workers = size,
            program = %self.inner.config.command.display_name(),
            "Initializing worker pool"
        );

        let mut launches = JoinSet::new();
        for id in 0..size {
            let inner = self.inner.clone();
            launches.spawn(async move { (id, inner.launch(id).await) });
        }

        let mut report = InitReport::default();
        while let Some(joined) = launches.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.ready.push(id),
                Ok((id, Err(e))) => {
                    warn!(slot = id, error = %e, "Worker failed to initialize");
                    report.failed.push(SlotFailure {
                        slot: id,
                        code: e.code(),
                        error: e.to_string(),
                    });
                }
                Err(e) => error!(error = %e, "Worker launch task panicked"),
            }
        }
        report.ready.sort_unstable();
        report.failed.sort_by_key(|f| f.slot);

        {
            let mut state = self.inner.lock();
            state.slots.retain(|s| report.ready.contains(&s.id));
        }

        if report.ready.is_empty() {
            error!(
                failed = report.failed.len(),
                "No worker became ready; requests will queue until they time out"
            );
        } else {
            info!(
                ready = report.ready.len(),
                failed = report.failed.len(),
                "Worker pool ready"
            );
        }
        report
    }

    /// Run one request on the next free worker.
    pub async fn submit(&self, request_type: &str, params: Value) -> Result<Value> {
        let rx = self.inner.submit(request_type, params)?;
        rx.await.unwrap_or(Err(CoreError::ShuttingDown))
    }

    /// Reject queued requests, then stop every worker.
    ///
    /// Workers get their stdin closed and SIGTERM; survivors are killed after
    /// the grace period. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        let monitors = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let rejected = state.queue.len();
            for mut request in state.queue.drain(..) {
                if let Some(timer) = request.timer.take() {
                    timer.abort();
                }
                let _ = request.reply.send(Err(CoreError::ShuttingDown));
            }

            let mut monitors = Vec::new();
            for slot in &mut state.slots {
                slot.state = SlotState::Terminated;
                if let Some(proc) = slot.proc.as_mut() {
                    proc.close_stdin();
                    proc.terminate();
                    if let Some(monitor) = proc.take_monitor() {
                        monitors.push((slot.id, monitor));
                    }
                }
            }
            info!(
                workers = monitors.len(),
                rejected_queued = rejected,
                "Shutting down worker pool"
            );
            monitors
        };

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        for (slot_id, mut monitor) in monitors {
            if tokio::time::timeout_at(deadline, &mut monitor).await.is_err() {
                warn!(slot = slot_id, "Worker ignored SIGTERM, killing");
                if let Some(slot) = self.inner.lock().slot_mut(slot_id)
                    && let Some(proc) = &slot.proc
                {
                    proc.kill();
                }
                let _ = monitor.await;
            }
        }
        info!("Worker pool stopped");
    }

    /// Snapshot of slot states and queue depth.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let now = Instant::now();
        let slots: Vec<SlotStats> = state
            .slots
            .iter()
            .map(|s| SlotStats {
                id: s.id,
                state: s.state,
                pid: s.proc.as_ref().and_then(WorkerProc::pid),
                requests_served: s.requests_served,
                restarts: s.restarts,
                started_at: s.started_at,
                last_activity: s.last_activity,
                busy_for_ms: s
                    .pending
                    .as_ref()
                    .map(|p| now.duration_since(p.submitted_at).as_millis() as u64),
            })
            .collect();

        let count = |wanted: &[SlotState]| slots.iter().filter(|s| wanted.contains(&s.state)).count();
        PoolStats {
            pool_size: slots.len(),
            available: count(&[SlotState::Available]),
            busy: count(&[SlotState::Busy]),
            restarting: count(&[
                SlotState::Initializing,
                SlotState::Crashed,
                SlotState::Restarting,
            ]),
            queued: state.queue.len(),
            total_served: slots.iter().map(|s| s.requests_served).sum(),
            slots,
        }
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the process for `slot_id` and wait for its readiness marker.
    async fn launch(self: &Arc<Self>, slot_id: usize) -> Result<()> {
        let (generation, ready) = {
            let mut state = self.lock();
            if state.closed {
                return Err(CoreError::ShuttingDown);
            }
            state.next_generation += 1;
            let generation = state.next_generation;

            let child = spawn_worker(&self.config.command)?;
            let (proc, ready) = WorkerProc::launch(
                child,
                slot_id,
                generation,
                self.events.clone(),
                self.config.ready_marker.clone(),
            )?;
            debug!(slot = slot_id, pid = ?proc.pid(), "Worker spawned");

            let slot = state
                .slot_mut(slot_id)
                .ok_or(CoreError::ShuttingDown)?;
            slot.generation = generation;
            slot.proc = Some(proc);
            (generation, ready)
        };

        match tokio::time::timeout(self.config.ready_timeout, ready).await {
            Ok(Ok(())) => {
                let mut state = self.lock();
                if state.closed {
                    return Err(CoreError::ShuttingDown);
                }
                let slot = state
                    .slot_mut(slot_id)
                    .filter(|s| s.generation == generation && s.proc.is_some())
                    .ok_or_else(|| CoreError::WorkerExited {
                        slot: slot_id,
                        reason: "exited during startup".to_string(),
                    })?;
                slot.state = SlotState::Available;
                slot.started_at = Some(Utc::now());
                slot.last_activity = slot.started_at;
                info!(
                    slot = slot_id,
                    pid = ?slot.proc.as_ref().and_then(WorkerProc::pid),
                    "Worker ready"
                );
                self.pump(&mut state);
                Ok(())
            }
            Ok(Err(_)) => {
                self.kill_generation(slot_id, generation);
                Err(CoreError::WorkerExited {
                    slot: slot_id,
                    reason: "closed stderr before signalling readiness".to_string(),
                })
            }
            Err(_) => {
                self.kill_generation(slot_id, generation);
                Err(CoreError::WorkerInitTimeout {
                    slot: slot_id,
                    timeout: self.config.ready_timeout,
                })
            }
        }
    }

    fn kill_generation(&self, slot_id: usize, generation: u64) {
        let mut state = self.lock();
        if let Some(slot) = state.slot_mut(slot_id)
            && slot.generation == generation
            && let Some(proc) = &slot.proc
        {
            proc.kill();
        }
    }

    /// Respawn a slot, backing off while spawning keeps failing.
    async fn restart(self: Arc<Self>, slot_id: usize) {
        let mut delay = self.config.restart_delay;
        loop {
            tokio::time::sleep(delay).await;
            if self.lock().closed {
                return;
            }
            match self.launch(slot_id).await {
                Ok(()) => {
                    info!(slot = slot_id, "Worker restarted");
                    return;
                }
                Err(CoreError::ShuttingDown) => return,
                Err(e) => {
                    delay = (delay * 2).min(MAX_RESTART_DELAY);
                    warn!(
                        slot = slot_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Worker restart failed"
                    );
                }
            }
        }
    }

    fn submit(
        self: &Arc<Self>,
        request_type: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let mut request = QueuedRequest {
            id,
            request_type: request_type.to_string(),
            params,
            reply,
            enqueued_at: Instant::now(),
            timer: None,
        };

        let mut state = self.lock();
        if state.closed {
            return Err(CoreError::ShuttingDown);
        }

        if let Some(idx) = state.available_slot() {
            self.dispatch(&mut state, idx, request);
        } else {
            request.timer = Some(self.arm_queue_timer(id, self.config.queue_timeout));
            state.queue.push_back(request);
            debug!(
                request_id = id,
                request_type,
                queued = state.queue.len(),
                "All workers busy, request queued"
            );
        }
        Ok(rx)
    }

    fn arm_queue_timer(self: &Arc<Self>, id: u64, after: Duration) -> AbortHandle {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_queued(id);
            }
        })
        .abort_handle()
    }

    /// Write a request to a slot and mark it busy.
    ///
    /// If the slot's stdin is gone the request goes back to the head of the
    /// queue and the slot is recycled.
    fn dispatch(self: &Arc<Self>, state: &mut PoolState, idx: usize, mut request: QueuedRequest) {
        if let Some(timer) = request.timer.take() {
            timer.abort();
        }

        let frame = WorkRequest::new(request.id.to_string(), request.request_type, request.params);
        let slot = &mut state.slots[idx];
        let sent = slot.proc.as_ref().is_some_and(|p| p.send(&frame));

        if !sent {
            warn!(slot = slot.id, request_id = request.id, "Worker stdin closed, recycling worker");
            slot.recycle();
            let remaining = self
                .config
                .queue_timeout
                .saturating_sub(request.enqueued_at.elapsed());
            let timer = self.arm_queue_timer(request.id, remaining);
            state.queue.push_front(QueuedRequest {
                id: request.id,
                request_type: frame.request_type,
                params: frame.params,
                reply: request.reply,
                enqueued_at: request.enqueued_at,
                timer: Some(timer),
            });
            return;
        }

        let deadline = {
            let weak = Arc::downgrade(self);
            let (slot_id, generation, id) = (slot.id, slot.generation, request.id);
            let after = self.config.call_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire_call(slot_id, generation, id);
                }
            })
            .abort_handle()
        };

        trace!(
            slot = slot.id,
            request_id = request.id,
            request_type = %frame.request_type,
            waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching request"
        );
        slot.pending = Some(PendingCall {
            id: request.id,
            reply: request.reply,
            submitted_at: request.enqueued_at,
            deadline: Some(deadline),
        });
        slot.state = SlotState::Busy;
        slot.last_activity = Some(Utc::now());
    }

    /// Hand queued requests to free slots, oldest first.
    fn pump(self: &Arc<Self>, state: &mut PoolState) {
        while let Some(idx) = state.available_slot() {
            let Some(mut request) = state.queue.pop_front() else {
                break;
            };
            if request.reply.is_closed() {
                if let Some(timer) = request.timer.take() {
                    timer.abort();
                }
                debug!(request_id = request.id, "Skipping queued request whose caller is gone");
                continue;
            }
            self.dispatch(state, idx, request);
        }
    }

    fn expire_queued(&self, id: u64) {
        let mut state = self.lock();
        if let Some(pos) = state.queue.iter().position(|r| r.id == id)
            && let Some(request) = state.queue.remove(pos)
        {
            let waited = request.enqueued_at.elapsed();
            warn!(
                request_id = id,
                request_type = %request.request_type,
                waited_ms = waited.as_millis() as u64,
                "Queued request timed out"
            );
            let _ = request.reply.send(Err(CoreError::DispatchTimeout { waited }));
        }
    }

    fn expire_call(&self, slot_id: usize, generation: u64, id: u64) {
        let mut state = self.lock();
        let Some(slot) = state.slot_mut(slot_id) else {
            return;
        };
        if slot.generation != generation || slot.pending.as_ref().is_none_or(|p| p.id != id) {
            return;
        }
        let Some(mut call) = slot.pending.take() else {
            return;
        };
        // This task is the deadline; do not abort it from inside.
        call.deadline = None;
        warn!(
            slot = slot_id,
            request_id = id,
            timeout_ms = self.config.call_timeout.as_millis() as u64,
            "Worker did not reply in time, recycling worker"
        );
        slot.recycle();
        call.settle(Err(CoreError::CallTimeout {
            timeout: self.config.call_timeout,
        }));
    }

    fn on_line(self: &Arc<Self>, slot_id: usize, generation: u64, line: &str) {
        let mut state = self.lock();
        let Some(slot) = state.slot_mut(slot_id) else {
            return;
        };
        if slot.generation != generation {
            debug!(slot = slot_id, "Ignoring output from a replaced worker");
            return;
        }
        let Some(expected) = slot.pending.as_ref().map(|p| p.id.to_string()) else {
            warn!(
                slot = slot_id,
                line = %truncate(line),
                "Dropping worker output with no request in flight"
            );
            return;
        };

        let outcome = match WorkResponse::from_line(line) {
            Ok(WorkResponse::Success { request_id, data }) if request_id == expected => Ok(Ok(data)),
            Ok(WorkResponse::Failure {
                request_id,
                message,
            }) if request_id == expected => Ok(Err(CoreError::Computation(message))),
            Ok(WorkResponse::Unattributed { message }) => Ok(Err(CoreError::Computation(message))),
            Ok(other) => Err(CoreError::MalformedWorkerOutput(format!(
                "reply for request {} while {} was in flight",
                other.request_id().unwrap_or("?"),
                expected
            ))),
            Err(e) => Err(CoreError::MalformedWorkerOutput(format!(
                "{}: {}",
                e,
                truncate(line)
            ))),
        };

        let Some(call) = slot.pending.take() else {
            return;
        };
        match outcome {
            Ok(result) => {
                slot.state = SlotState::Available;
                slot.requests_served += 1;
                slot.last_activity = Some(Utc::now());
                trace!(
                    slot = slot_id,
                    request_id = call.id,
                    success = result.is_ok(),
                    elapsed_ms = call.submitted_at.elapsed().as_millis() as u64,
                    "Worker request completed"
                );
                call.settle(result);
                self.pump(&mut state);
            }
            Err(err) => {
                warn!(slot = slot_id, error = %err, "Malformed worker output, recycling worker");
                slot.recycle();
                call.settle(Err(err));
            }
        }
    }

    fn on_exit(self: &Arc<Self>, slot_id: usize, generation: u64, reason: TerminationReason) {
        let mut state = self.lock();
        let closed = state.closed;
        let Some(slot) = state.slot_mut(slot_id) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        slot.proc = None;
        if let Some(call) = slot.pending.take() {
            call.settle(Err(CoreError::WorkerExited {
                slot: slot_id,
                reason: reason.to_string(),
            }));
        }

        match slot.state {
            SlotState::Terminated => debug!(slot = slot_id, reason = %reason, "Worker stopped"),
            SlotState::Initializing | SlotState::Restarting => {
                debug!(slot = slot_id, reason = %reason, "Worker exited during startup");
            }
            SlotState::Available | SlotState::Busy | SlotState::Crashed => {
                if closed {
                    slot.state = SlotState::Terminated;
                    return;
                }
                if slot.state == SlotState::Crashed {
                    info!(slot = slot_id, reason = %reason, "Recycled worker exited, restarting");
                } else {
                    warn!(slot = slot_id, reason = %reason, "Worker exited unexpectedly, restarting");
                }
                slot.state = SlotState::Restarting;
                slot.restarts += 1;
                tokio::spawn(self.clone().restart(slot_id));
            }
        }
    }
}

async fn event_loop(inner: Weak<PoolInner>, mut rx: mpsc::UnboundedReceiver<ProcEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            ProcEvent::Line {
                slot,
                generation,
                line,
            } => inner.on_line(slot, generation, &line),
            ProcEvent::Exited {
                slot,
                generation,
                reason,
            } => inner.on_exit(slot, generation, reason),
        }
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(MAX_LOGGED_LINE) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Outcome of [`WorkerPool::initialize`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitReport {
    /// Slots that became ready.
    pub ready: Vec<usize>,
    /// Slots left out of the pool.
    pub failed: Vec<SlotFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotFailure {
    pub slot: usize,
    pub code: &'static str,
    pub error: String,
}

/// Per-slot statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStats {
    pub id: usize,
    pub state: SlotState,
    pub pid: Option<u32>,
    pub requests_served: u64,
    pub restarts: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// How long the current request has been in flight.
    pub busy_for_ms: Option<u64>,
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Slots in the active pool.
    pub pool_size: usize,
    pub available: usize,
    pub busy: usize,
    /// Slots starting, recycling or respawning.
    pub restarting: usize,
    /// Requests waiting for a free slot.
    pub queued: usize,
    pub total_served: u64,
    pub slots: Vec<SlotStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_defaults() {
        let config = WorkerPoolConfig::new(WorkerCommand::new("python3"));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.ready_marker, "Service ready");
        assert_eq!(config.ready_timeout, Duration::from_secs(10));
        assert_eq!(config.queue_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.with_pool_size(2).pool_size, 2);
    }

    #[test]
    fn test_truncate_long_lines() {
        let long = "x".repeat(1000);
        assert_eq!(truncate(&long).len(), MAX_LOGGED_LINE);
        assert_eq!(truncate("short"), "short");
        // Multi-byte characters are never split.
        let wide = "é".repeat(300);
        assert_eq!(truncate(&wide).chars().count(), MAX_LOGGED_LINE);
    }

    #[tokio::test]
    async fn test_uninitialized_pool_queues_then_times_out() {
        let mut config = WorkerPoolConfig::new(WorkerCommand::new("cat"));
        config.queue_timeout = Duration::from_millis(50);
        let pool = WorkerPool::new(config);

        let err = pool.submit("summary", Value::Null).await.unwrap_err();
        assert!(matches!(err, CoreError::DispatchTimeout { .. }));
        assert_eq!(pool.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_and_later_submissions() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(WorkerCommand::new("cat"))));

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit("summary", Value::Null).await })
        };
        tokio::task::yield_now().await;
        while pool.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        pool.shutdown().await;
        let queued = waiting.await.unwrap();
        assert!(matches!(queued, Err(CoreError::ShuttingDown)));
        assert!(matches!(
            pool.submit("summary", Value::Null).await,
            Err(CoreError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_initialize_reports_spawn_failure() {
        let config = WorkerPoolConfig::new(WorkerCommand::new("/definitely/not/a/worker"))
            .with_pool_size(2);
        let pool = WorkerPool::new(config);
        let report = pool.initialize().await;

        assert!(report.ready.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].code, "SPAWN_FAILURE");
        assert_eq!(pool.stats().pool_size, 0);
    }

    #[tokio::test]
    async fn test_initialize_times_out_silent_worker() {
        let mut config = WorkerPoolConfig::new(WorkerCommand::new("cat")).with_pool_size(1);
        config.ready_timeout = Duration::from_millis(100);
        let pool = WorkerPool::new(config);
        let report = pool.initialize().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].code, "WORKER_INIT_TIMEOUT");
    }
}
