//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Request-serving core for transit analytics and predictions.
#[derive(Parser, Debug)]
#[command(name = "transit-core")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format (pretty, compact, json).
    #[arg(long, value_enum, env = "TRANSIT_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output.
    #[arg(
        long,
        env = "NO_COLOR",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server.
    Serve(Box<ServeArgs>),

    /// Run a reference worker on stdin/stdout.
    #[command(hide = true)]
    InternalWorker(InternalWorkerArgs),

    /// Run the reference predictor on one JSON input.
    #[command(hide = true)]
    InternalPredict(InternalPredictArgs),
}

/// How predictions are executed.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredictMode {
    /// Spawn the predictor once per request.
    #[default]
    Process,
    /// Keep predictor workers running in their own pool.
    Pool,
}

/// Arguments for the serve command.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "TRANSIT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, env = "TRANSIT_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enable CORS for all origins.
    #[arg(long, env = "TRANSIT_CORS")]
    pub cors: bool,

    /// Number of analytics worker processes.
    #[arg(
        short,
        long,
        env = "TRANSIT_WORKERS",
        default_value_t = 4,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub workers: usize,

    /// Analytics worker program.
    #[arg(long, env = "TRANSIT_WORKER_PROGRAM", default_value = "python3")]
    pub worker_program: PathBuf,

    /// Arguments for the analytics worker (comma-separated).
    #[arg(
        long,
        env = "TRANSIT_WORKER_ARGS",
        value_delimiter = ',',
        default_value = "persistent_analytics_service.py"
    )]
    pub worker_args: Vec<String>,

    /// Working directory for worker and predictor processes.
    #[arg(long, env = "TRANSIT_WORKER_DIR")]
    pub worker_dir: Option<PathBuf>,

    /// Predictor program.
    #[arg(long, env = "TRANSIT_PREDICT_PROGRAM", default_value = "python3")]
    pub predict_program: PathBuf,

    /// Arguments for the predictor (comma-separated).
    #[arg(
        long,
        env = "TRANSIT_PREDICT_ARGS",
        value_delimiter = ',',
        default_value = "inference_wrapper.py"
    )]
    pub predict_args: Vec<String>,

    /// How predictions run.
    #[arg(long, value_enum, env = "TRANSIT_PREDICT_MODE", default_value_t = PredictMode::Process)]
    pub predict_mode: PredictMode,

    /// Predictor workers when `--predict-mode pool`.
    #[arg(
        long,
        env = "TRANSIT_PREDICT_WORKERS",
        default_value_t = 1,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub predict_workers: usize,

    /// Use this binary's built-in reference worker and predictor.
    #[arg(long, env = "TRANSIT_REFERENCE_WORKERS")]
    pub reference_workers: bool,

    /// Seconds a worker has to print its readiness marker.
    #[arg(long, env = "TRANSIT_READY_TIMEOUT", default_value_t = 10)]
    pub ready_timeout: u64,

    /// Seconds a request may wait for a free worker.
    #[arg(long, env = "TRANSIT_QUEUE_TIMEOUT", default_value_t = 30)]
    pub queue_timeout: u64,

    /// Seconds a running request may take.
    #[arg(long, env = "TRANSIT_CALL_TIMEOUT", default_value_t = 120)]
    pub call_timeout: u64,

    /// Seconds between SIGTERM and SIGKILL on shutdown.
    #[arg(long, env = "TRANSIT_SHUTDOWN_GRACE", default_value_t = 5)]
    pub shutdown_grace: u64,

    /// Data files that invalidate the analytics cache (comma-separated).
    #[arg(long, env = "TRANSIT_DATA_FILES", value_delimiter = ',')]
    pub data_files: Vec<PathBuf>,

    /// Model files that invalidate the prediction cache (comma-separated).
    #[arg(long, env = "TRANSIT_MODEL_FILES", value_delimiter = ',')]
    pub model_files: Vec<PathBuf>,

    /// TTL in seconds for static analytics summaries.
    #[arg(long, env = "TRANSIT_STATIC_TTL", default_value_t = 4 * 60 * 60)]
    pub static_ttl: u64,

    /// TTL in seconds for other analytics results.
    #[arg(long, env = "TRANSIT_DEFAULT_TTL", default_value_t = 30 * 60)]
    pub default_ttl: u64,

    /// TTL in seconds for predictions.
    #[arg(long, env = "TRANSIT_PREDICTION_TTL", default_value_t = 24 * 60 * 60)]
    pub prediction_ttl: u64,

    /// Milliseconds to wait after startup before pre-warming the cache.
    #[arg(long, env = "TRANSIT_PREWARM_DELAY_MS", default_value_t = 1000)]
    pub prewarm_delay_ms: u64,

    /// Skip cache pre-warming at startup.
    #[arg(long, env = "TRANSIT_NO_PREWARM")]
    pub no_prewarm: bool,
}

/// Arguments for the reference worker.
#[derive(Parser, Debug, Clone, Default)]
pub struct InternalWorkerArgs {
    /// Delay before announcing readiness, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub startup_delay_ms: u64,

    /// Never announce readiness.
    #[arg(long)]
    pub silent: bool,
}

/// Arguments for the reference predictor.
#[derive(Parser, Debug, Clone)]
pub struct InternalPredictArgs {
    /// Prediction input as a JSON object.
    pub input: String,
}
