//! Worker subprocess spawning.

use crate::error::{CoreError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// How to launch an external worker program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments passed before anything the caller appends.
    pub args: Vec<String>,
    /// Working directory (inherits the parent's when `None`).
    pub current_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Display name for logs and errors.
    pub fn display_name(&self) -> String {
        self.program.display().to_string()
    }

    fn build(&self, extra_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(extra_args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        // Python workers buffer stdout when it is a pipe.
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Spawn a long-lived pool worker with all three standard streams piped.
pub fn spawn_worker(command: &WorkerCommand) -> Result<Child> {
    let mut cmd = command.build(&[]);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    cmd.spawn().map_err(|source| CoreError::SpawnFailure {
        program: command.display_name(),
        source,
    })
}

/// Spawn a transient process that receives its input as the last argument.
pub fn spawn_oneshot(command: &WorkerCommand, input: String) -> Result<Child> {
    let mut cmd = command.build(&[input]);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    cmd.spawn().map_err(|source| CoreError::SpawnFailure {
        program: command.display_name(),
        source,
    })
}
