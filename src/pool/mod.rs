//! Worker subprocess pool for out-of-process computations.
//!
//! Analytics requests run in long-lived worker processes that load their
//! data once and then answer one request at a time over line-delimited JSON.
//! Predictions may instead run as a transient process per call.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Dispatcher    │
//!                     └────────┬────────┘
//!                              │ submit
//!                     ┌────────▼────────┐
//!                     │   WorkerPool    │──── FIFO queue
//!                     └────────┬────────┘
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │  Slot 0   │  │  Slot 1   │  │  Slot N   │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Bounded concurrency**: one request per worker, the rest wait in order
//! - **Crash recovery**: exited workers are respawned under the same slot id
//! - **Recycling**: workers that time out or emit garbage are killed and respawned
//! - **Exactly-once settlement**: every request gets one outcome

mod oneshot;
#[allow(clippy::module_inception)]
mod pool;
mod proc;
mod protocol;
mod signals;
mod spawn;
pub mod worker_main;

pub use oneshot::OneShotRunner;
pub use pool::{InitReport, PoolStats, SlotFailure, SlotState, SlotStats, WorkerPool, WorkerPoolConfig};
pub use protocol::{DEFAULT_READY_MARKER, PROTOCOL_VERSION, ReplyFrame, WorkRequest, WorkResponse};
pub use signals::TerminationReason;
pub use spawn::WorkerCommand;
