//! Runtime configuration built from `serve` arguments.

use crate::cache::{STATIC_ANALYTICS_TYPES, TtlPolicy};
use crate::cli::{PredictMode, ServeArgs};
use crate::dispatcher::DispatcherConfig;
use crate::error::Result;
use crate::pool::{OneShotRunner, WorkerCommand, WorkerPool, WorkerPoolConfig};
use crate::predict::PredictBackend;
use crate::prewarm::default_battery;
use crate::server::ServerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Subcommand that runs the built-in reference worker.
pub const REFERENCE_WORKER_SUBCOMMAND: &str = "internal-worker";

/// Subcommand that runs the built-in reference predictor.
pub const REFERENCE_PREDICT_SUBCOMMAND: &str = "internal-predict";

impl ServeArgs {
    fn command(&self, program: &PathBuf, args: &[String]) -> WorkerCommand {
        let mut command = WorkerCommand::new(program.clone()).args(args.iter().cloned());
        if let Some(dir) = &self.worker_dir {
            command = command.current_dir(dir.clone());
        }
        command
    }

    fn reference_command(&self, subcommand: &str) -> Result<WorkerCommand> {
        let exe = std::env::current_exe()?;
        Ok(self.command(&exe, &[subcommand.to_string()]))
    }

    fn worker_command(&self) -> Result<WorkerCommand> {
        if self.reference_workers {
            self.reference_command(REFERENCE_WORKER_SUBCOMMAND)
        } else {
            Ok(self.command(&self.worker_program, &self.worker_args))
        }
    }

    fn predict_command(&self) -> Result<WorkerCommand> {
        match (self.reference_workers, self.predict_mode) {
            (true, PredictMode::Process) => self.reference_command(REFERENCE_PREDICT_SUBCOMMAND),
            // Pooled predictions speak the worker protocol.
            (true, PredictMode::Pool) => self.reference_command(REFERENCE_WORKER_SUBCOMMAND),
            (false, _) => Ok(self.command(&self.predict_program, &self.predict_args)),
        }
    }

    fn pool_config(&self, command: WorkerCommand, pool_size: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            ready_timeout: Duration::from_secs(self.ready_timeout),
            queue_timeout: Duration::from_secs(self.queue_timeout),
            call_timeout: Duration::from_secs(self.call_timeout),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            ..WorkerPoolConfig::new(command).with_pool_size(pool_size)
        }
    }

    /// Pool settings for the analytics workers.
    pub fn analytics_pool_config(&self) -> Result<WorkerPoolConfig> {
        Ok(self.pool_config(self.worker_command()?, self.workers))
    }

    /// The prediction backend selected by `--predict-mode`.
    ///
    /// Creating a pooled backend needs a Tokio runtime.
    pub fn predict_backend(&self) -> Result<PredictBackend> {
        let command = self.predict_command()?;
        Ok(match self.predict_mode {
            PredictMode::Process => PredictBackend::Process(OneShotRunner::new(
                command,
                Duration::from_secs(self.call_timeout),
            )),
            PredictMode::Pool => {
                PredictBackend::Pool(WorkerPool::new(self.pool_config(command, self.predict_workers)))
            }
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            data_files: self.data_files.clone(),
            model_files: self.model_files.clone(),
            analytics_ttl: TtlPolicy::tiered(
                STATIC_ANALYTICS_TYPES,
                Duration::from_secs(self.static_ttl),
                Duration::from_secs(self.default_ttl),
            ),
            prediction_ttl: TtlPolicy::uniform(Duration::from_secs(self.prediction_ttl)),
            prewarm: default_battery(),
            ..DispatcherConfig::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            cors: self.cors,
            prewarm_delay: (!self.no_prewarm).then(|| Duration::from_millis(self.prewarm_delay_ms)),
        }
    }
}
