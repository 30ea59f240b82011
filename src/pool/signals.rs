//! Exit analysis for worker subprocesses.
//!
//! Turns a raw exit status into something worth putting in a log line and
//! in the `WorkerExited` error the pending caller receives.

use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Likely out of memory (SIGKILL we did not send ourselves).
    OutOfMemory,
    /// SIGKILL sent by the pool when recycling or shutting down.
    Killed,
    /// Segmentation fault.
    Segfault,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Classify an exit status.
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal().map(Signal::try_from) {
            Some(Ok(Signal::SIGKILL)) => Self::OutOfMemory,
            Some(Ok(Signal::SIGSEGV)) => Self::Segfault,
            Some(Ok(sig)) => Self::Signaled(sig),
            _ => Self::Unknown,
        }
    }

    /// Classify an exit status, knowing whether we sent SIGKILL ourselves.
    pub fn from_status_after_kill(status: ExitStatus, kill_sent: bool) -> Self {
        match Self::from_status(status) {
            Self::OutOfMemory if kill_sent => Self::Killed,
            reason => reason,
        }
    }

    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::OutOfMemory => "killed by SIGKILL (possibly out of memory)".to_string(),
            Self::Killed => "killed by the pool (SIGKILL)".to_string(),
            Self::Segfault => "segmentation fault (SIGSEGV)".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let ok = ExitStatus::from_raw(0);
        assert_eq!(TerminationReason::from_status(ok), TerminationReason::Exited(0));
        assert!(TerminationReason::from_status(ok).is_success());

        // Wait status encodes the exit code in the high byte.
        let three = ExitStatus::from_raw(3 << 8);
        assert_eq!(
            TerminationReason::from_status(three),
            TerminationReason::Exited(3)
        );
        assert!(!TerminationReason::from_status(three).is_success());
    }

    #[test]
    fn test_signals() {
        assert_eq!(
            TerminationReason::from_status(ExitStatus::from_raw(Signal::SIGKILL as i32)),
            TerminationReason::OutOfMemory
        );
        assert_eq!(
            TerminationReason::from_status(ExitStatus::from_raw(Signal::SIGSEGV as i32)),
            TerminationReason::Segfault
        );
        assert_eq!(
            TerminationReason::from_status(ExitStatus::from_raw(Signal::SIGTERM as i32)),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
    }

    #[test]
    fn test_own_kill_is_not_out_of_memory() {
        let killed = ExitStatus::from_raw(Signal::SIGKILL as i32);
        assert_eq!(
            TerminationReason::from_status_after_kill(killed, true),
            TerminationReason::Killed
        );
        assert_eq!(
            TerminationReason::from_status_after_kill(killed, false),
            TerminationReason::OutOfMemory
        );
        assert_eq!(
            TerminationReason::from_status_after_kill(ExitStatus::from_raw(3 << 8), true),
            TerminationReason::Exited(3)
        );
        assert!(!TerminationReason::Killed.to_string().contains("memory"));
    }

    #[test]
    fn test_description() {
        assert!(TerminationReason::Exited(2).to_string().contains("code 2"));
        assert!(
            TerminationReason::Signaled(Signal::SIGTERM)
                .to_string()
                .contains("SIGTERM")
        );
    }
}
