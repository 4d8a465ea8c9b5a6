//! Error classification for harness sessions.
//!
//! [`IterationFailure`] covers everything that can go wrong with one
//! invocation of the external process; the session records it and moves on.
//! [`HarnessError`] covers resource-level failures that end the session.

use crate::report::ReportError;
use serde::Serialize;
use std::path::PathBuf;

/// Why one iteration contributed no records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationFailure {
    #[error("failed to start process: {message}")]
    Spawn { message: String },

    #[error("process exited with status {code}")]
    ExitCode { code: i32 },

    #[error("process killed by signal {signal}")]
    Signal { signal: i32 },

    #[error("process ended without an exit status")]
    NoExitStatus,

    #[error("process timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("waiting for process failed: {message}")]
    Wait { message: String },
}

impl IterationFailure {
    /// Short stable label, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::ExitCode { .. } => "exit_code",
            Self::Signal { .. } => "signal",
            Self::NoExitStatus => "no_exit_status",
            Self::TimedOut { .. } => "timeout",
            Self::Wait { .. } => "wait",
        }
    }

    /// Whether the process ran to completion on its own.
    pub fn process_completed(&self) -> bool {
        matches!(self, Self::ExitCode { .. })
    }
}

/// Fatal errors: the session cannot continue or cannot report.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("refusing to reset {path}: {reason}")]
    UnsafeReset { path: PathBuf, reason: String },

    #[error("cannot reset directory {path}: {source}")]
    Reset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read artifact directory {path}: {source}")]
    ArtifactDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build log grammar: {0}")]
    Grammar(#[from] regex::Error),

    #[error(transparent)]
    Report(#[from] ReportError),
}
