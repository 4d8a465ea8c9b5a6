//! Run orchestration: N sequential iterations of "invoke, then parse".
//!
//! A session owns the [`RecordSet`] and appends to it only after an iteration
//! has finished. No iteration failure ends the session; only resource-level
//! errors (directories, final report) do.

use crate::error::{HarnessError, IterationFailure};
use crate::parse::{
    ARTIFACT_EXTENSION, ARTIFACT_PREFIX, ArtifactStatus, LogParser, artifact_file_name,
    iteration_from_path,
};
use crate::record::RecordSet;
use crate::report::{FailureLine, ReportPaths, ReportWriter, RunAccounting};
use crate::runner::CommandRunner;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a session needs to know beyond the command itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub iterations: u32,
    pub artifacts_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Write an intermediate report every this many iterations.
    pub checkpoint_every: Option<u32>,
}

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationStatus {
    /// At least one record was added.
    Recorded,
    /// The process succeeded but wrote no artifact.
    MissingArtifact,
    /// The process succeeded but the artifact gave no records.
    NoRecords(ArtifactStatus),
    /// The process failed; the iteration was skipped.
    Failed(IterationFailure),
}

impl IterationStatus {
    fn from_parse(added: usize, status: ArtifactStatus) -> Self {
        match status {
            _ if added > 0 => Self::Recorded,
            ArtifactStatus::Missing => Self::MissingArtifact,
            other => Self::NoRecords(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::MissingArtifact => "missing_artifact",
            Self::NoRecords(_) => "no_records",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: u32,
    pub status: IterationStatus,
    pub records: usize,
    pub rejected_blocks: usize,
    pub skipped_metrics: usize,
}

impl RunAccounting {
    /// Fold one finished iteration into the tally.
    pub fn record(&mut self, report: &IterationReport) {
        self.completed += 1;
        match &report.status {
            IterationStatus::Recorded => {}
            IterationStatus::MissingArtifact | IterationStatus::NoRecords(_) => {
                self.without_records += 1
            }
            IterationStatus::Failed(failure) => {
                self.failed += 1;
                self.failures.push(FailureLine {
                    iteration: report.iteration,
                    reason: failure.to_string(),
                });
            }
        }
    }
}

/// Result of a whole session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub records: RecordSet,
    pub accounting: RunAccounting,
    pub checkpoints: Vec<ReportPaths>,
    pub report: ReportPaths,
}

impl SessionOutcome {
    /// `false` when no iteration produced a record.
    pub fn has_results(&self) -> bool {
        !self.records.is_empty()
    }
}

pub struct Session<R> {
    settings: SessionSettings,
    runner: R,
    parser: LogParser,
    reporter: ReportWriter,
}

impl<R: CommandRunner> Session<R> {
    pub fn new(settings: SessionSettings, runner: R) -> Result<Self, HarnessError> {
        let reporter = ReportWriter::new(&settings.results_dir);
        Ok(Self {
            settings,
            runner,
            parser: LogParser::new()?,
            reporter,
        })
    }

    /// Artifact path for an iteration; unique per iteration.
    pub fn artifact_path(&self, iteration: u32) -> PathBuf {
        self.settings.artifacts_dir.join(artifact_file_name(iteration))
    }

    /// Clear and recreate the artifact and results directories.
    ///
    /// Destructive. Safe to call repeatedly.
    pub fn prepare(&self) -> Result<(), HarnessError> {
        check_disjoint(&self.settings.artifacts_dir, &self.settings.results_dir)?;
        reset_directory(&self.settings.artifacts_dir)?;
        reset_directory(&self.settings.results_dir)?;
        Ok(())
    }

    /// Run one iteration and append its records to `records`.
    pub async fn run_iteration(&self, iteration: u32, records: &mut RecordSet) -> IterationReport {
        let artifact = self.artifact_path(iteration);
        debug!(iteration, artifact = %artifact.display(), "Starting iteration");

        let success = match self.runner.run(&artifact).await {
            Ok(success) => success,
            Err(failure) => {
                warn!(
                    iteration,
                    kind = failure.kind(),
                    error = %failure,
                    "Iteration failed, skipping"
                );
                return IterationReport {
                    iteration,
                    status: IterationStatus::Failed(failure),
                    records: 0,
                    rejected_blocks: 0,
                    skipped_metrics: 0,
                };
            }
        };

        let parsed = self.parser.parse_artifact(&artifact);
        let rejected_blocks = parsed.outcome.rejected.len();
        let skipped_metrics = parsed.outcome.skipped_metrics;
        let added = records.extend(parsed.outcome.records);

        let status = IterationStatus::from_parse(added, parsed.status);
        if status == IterationStatus::MissingArtifact {
            warn!(
                iteration,
                artifact = %artifact.display(),
                "Process succeeded but wrote no artifact"
            );
        }

        info!(
            iteration,
            outcome = status.label(),
            records = added,
            rejected_blocks,
            total = records.len(),
            elapsed_ms = success.elapsed.as_millis() as u64,
            "Iteration complete"
        );

        IterationReport {
            iteration,
            status,
            records: added,
            rejected_blocks,
            skipped_metrics,
        }
    }

    /// Run every iteration, then write the final report.
    ///
    /// When `shutdown` resolves, the in-flight iteration is abandoned (its
    /// child process is killed) and the report covers the records gathered
    /// so far.
    pub async fn run<F>(&self, shutdown: F) -> Result<SessionOutcome, HarnessError>
    where
        F: Future<Output = ()>,
    {
        let planned = self.settings.iterations;
        info!(
            iterations = planned,
            command = %self.runner.describe(),
            artifacts = %self.settings.artifacts_dir.display(),
            results = %self.settings.results_dir.display(),
            "Starting session"
        );

        let mut records = RecordSet::new();
        let mut accounting = RunAccounting {
            planned,
            ..RunAccounting::default()
        };
        let mut checkpoints = Vec::new();

        tokio::pin!(shutdown);

        for iteration in 0..planned {
            let report = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(
                        iteration,
                        completed = accounting.completed,
                        "Interrupted, reporting on partial results"
                    );
                    accounting.interrupted = true;
                    break;
                }
                report = self.run_iteration(iteration, &mut records) => report,
            };
            accounting.record(&report);

            if self.checkpoint_due(accounting.completed) {
                match self.reporter.write(records.as_slice(), &accounting) {
                    Ok(paths) => {
                        info!(
                            completed = accounting.completed,
                            path = %paths.text.display(),
                            "Wrote checkpoint report"
                        );
                        checkpoints.push(paths);
                    }
                    Err(e) => warn!(error = %e, "Checkpoint report failed"),
                }
            }
        }

        let report = self.reporter.write(records.as_slice(), &accounting)?;

        if records.is_empty() {
            warn!(
                completed = accounting.completed,
                failed = accounting.failed,
                "No valid results"
            );
        } else {
            info!(
                records = records.len(),
                completed = accounting.completed,
                failed = accounting.failed,
                report = %report.text.display(),
                "Session complete"
            );
        }

        Ok(SessionOutcome {
            records,
            accounting,
            checkpoints,
            report,
        })
    }

    fn checkpoint_due(&self, completed: u32) -> bool {
        match self.settings.checkpoint_every {
            Some(every) if every > 0 => {
                completed % every == 0 && completed < self.settings.iterations
            }
            _ => false,
        }
    }
}

/// Collect records from artifacts already on disk, without running anything.
///
/// Only files named like `run_<n>.log` are considered, in iteration order.
pub fn collect_existing(
    parser: &LogParser,
    artifacts_dir: &Path,
) -> Result<(RecordSet, RunAccounting), HarnessError> {
    let read_err = |source| HarnessError::ArtifactDir {
        path: artifacts_dir.to_path_buf(),
        source,
    };

    let mut artifacts: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(artifacts_dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let is_artifact = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(ARTIFACT_PREFIX));
        match iteration_from_path(&path) {
            Some(iteration) if is_artifact => artifacts.push((iteration, path)),
            _ => warn!(path = %path.display(), "Skipping file that is not a run artifact"),
        }
    }
    artifacts.sort();

    let mut records = RecordSet::new();
    let mut accounting = RunAccounting::default();
    for (iteration, path) in &artifacts {
        let parsed = parser.parse_artifact_as(path, *iteration);
        let added = records.extend(parsed.outcome.records);
        let status = IterationStatus::from_parse(added, parsed.status);
        accounting.record(&IterationReport {
            iteration: *iteration,
            status,
            records: added,
            rejected_blocks: parsed.outcome.rejected.len(),
            skipped_metrics: parsed.outcome.skipped_metrics,
        });
    }
    accounting.planned = accounting.completed;

    info!(
        artifacts = artifacts.len(),
        records = records.len(),
        dir = %artifacts_dir.display(),
        "Collected existing artifacts"
    );
    Ok((records, accounting))
}

fn normalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn unsafe_reset(path: &Path, reason: &str) -> HarnessError {
    HarnessError::UnsafeReset {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Whether resetting one directory would touch the other.
pub fn directories_overlap(a: &Path, b: &Path) -> bool {
    let a = normalized(a);
    let b = normalized(b);
    a.starts_with(&b) || b.starts_with(&a)
}

/// Refuse directory pairs where resetting one would destroy the other.
pub fn check_disjoint(artifacts: &Path, results: &Path) -> Result<(), HarnessError> {
    if directories_overlap(artifacts, results) {
        return Err(unsafe_reset(
            artifacts,
            "artifact and results directories overlap",
        ));
    }
    Ok(())
}

/// Why `path` must never be reset, if it must not.
///
/// Refuses the filesystem root, the home directory, and any directory
/// containing the working directory.
pub fn reset_refusal(path: &Path) -> Option<&'static str> {
    if path.as_os_str().is_empty() {
        return Some("empty path");
    }
    let target = normalized(path);
    if target.parent().is_none() {
        return Some("filesystem root");
    }
    if let Some(home) = dirs::home_dir()
        && home.starts_with(&target)
    {
        return Some("contains the home directory");
    }
    if let Ok(cwd) = std::env::current_dir()
        && normalized(&cwd).starts_with(&target)
    {
        return Some("contains the working directory");
    }
    None
}

/// Remove `path` with everything in it, then create it empty.
pub fn reset_directory(path: &Path) -> Result<(), HarnessError> {
    if let Some(reason) = reset_refusal(path) {
        return Err(unsafe_reset(path, reason));
    }

    let io_err = |source| HarnessError::Reset {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path).map_err(io_err)?,
        Ok(_) => return Err(unsafe_reset(path, "not a directory")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    std::fs::create_dir_all(path).map_err(io_err)?;
    debug!(path = %path.display(), "Reset directory");
    Ok(())
}
