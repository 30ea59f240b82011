//! transit-core: the request-serving core of the transit analytics service.
//!
//! Expensive analytics and predictions run in external worker processes.
//! This crate keeps a bounded pool of them, fronts it with result caches
//! that drop their contents when the underlying data or model files change,
//! and tracks usage.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use transit_core::dispatcher::{Dispatcher, DispatcherConfig};
//! use transit_core::pool::{OneShotRunner, WorkerCommand, WorkerPool, WorkerPoolConfig};
//! use transit_core::predict::PredictBackend;
//!
//! # async fn demo() -> transit_core::error::Result<()> {
//! let pool = WorkerPool::new(WorkerPoolConfig::new(
//!     WorkerCommand::new("python3").arg("persistent_analytics_service.py"),
//! ));
//! let predictor = PredictBackend::Process(OneShotRunner::new(
//!     WorkerCommand::new("python3").arg("inference_wrapper.py"),
//!     std::time::Duration::from_secs(120),
//! ));
//! let dispatcher = Arc::new(Dispatcher::new(pool, predictor, DispatcherConfig::default()));
//! dispatcher.initialize().await;
//!
//! let served = dispatcher.execute("summary", json!({})).await?;
//! println!("cached={} data={}", served.cached, served.data);
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod pool;
pub mod predict;
pub mod prewarm;
pub mod server;
pub mod usage;
