//! Performance-regression harness.
//!
//! Repeats an external test process N times, parses the per-run timing logs
//! it writes, and aggregates the results into text, CSV and JSON reports.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod parse;
pub mod record;
pub mod report;
pub mod runner;
pub mod session;
pub mod stats;

pub use config::{CliOverrides, ConfigError, FileConfig, HarnessConfig};
pub use error::{HarnessError, IterationFailure};
pub use parse::{ArtifactStatus, LogParser, ParseOutcome};
pub use prh_common::{LogConfig, LogFormat, init_logging};
pub use record::{GroupKey, RecordSet, TestCaseRecord};
pub use report::{ReportPaths, ReportWriter, RunAccounting};
pub use runner::{CommandRunner, ProcessRunner, RunSuccess};
pub use session::{IterationReport, IterationStatus, Session, SessionOutcome, SessionSettings};
pub use stats::StatSummary;
