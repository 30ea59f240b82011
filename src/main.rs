//! transit-core - request-serving core for transit analytics

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::Level;

use transit_core::cli::{Cli, Commands, InternalPredictArgs, InternalWorkerArgs, ServeArgs};
use transit_core::dispatcher::Dispatcher;
use transit_core::logging::{self, LogConfig};
use transit_core::pool::WorkerPool;
use transit_core::pool::worker_main::{self, WorkerOptions};
use transit_core::server::run_server;

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let result = match &cli.command {
        Commands::Serve(args) => cmd_serve(&cli, args),
        Commands::InternalWorker(args) => cmd_internal_worker(&cli, args),
        Commands::InternalPredict(args) => cmd_internal_predict(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Logging config from the base preset, `-v` flags and the environment.
fn log_config(cli: &Cli, base: LogConfig) -> LogConfig {
    let mut config = match cli.verbose {
        0 => base,
        1 => base.with_level(Level::DEBUG).with_filter("transit_core=debug,info".to_string()),
        _ => base.with_level(Level::TRACE).with_filter("trace".to_string()),
    };
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    config.with_env_overrides()
}

fn cmd_serve(cli: &Cli, args: &ServeArgs) -> Result<()> {
    logging::init(log_config(cli, LogConfig::for_server()));

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let pool = WorkerPool::new(args.analytics_pool_config()?);
        let predictor = args.predict_backend()?;
        let dispatcher = Arc::new(Dispatcher::new(pool, predictor, args.dispatcher_config()));
        run_server(dispatcher, args.server_config()).await
    })?;

    Ok(())
}

fn cmd_internal_worker(cli: &Cli, args: &InternalWorkerArgs) -> Result<()> {
    logging::init(log_config(cli, LogConfig::for_worker()));

    let options = WorkerOptions {
        startup_delay: Duration::from_millis(args.startup_delay_ms),
        silent: args.silent,
    };
    worker_main::run_worker_main(&options).context("Worker I/O failed")?;
    Ok(())
}

fn cmd_internal_predict(args: &InternalPredictArgs) -> Result<()> {
    let code = worker_main::run_predict_main(&args.input);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
