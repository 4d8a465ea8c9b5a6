//! Record parser: turns one log artifact into [`TestCaseRecord`]s.
//!
//! Parsing never fails on bad content. A malformed case block is dropped and
//! reported in [`ParseOutcome::rejected`]; a malformed metric line is dropped
//! and counted. A missing or unreadable artifact yields no records.

pub mod grammar;

pub use grammar::{BlockError, CASE_MARKER, CaseGrammar, Field, MetricLineError};

use crate::record::TestCaseRecord;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// File name prefix of per-iteration artifacts.
pub const ARTIFACT_PREFIX: &str = "run_";
/// File extension of per-iteration artifacts.
pub const ARTIFACT_EXTENSION: &str = "log";

/// Artifact file name for an iteration, e.g. `run_0007.log`.
pub fn artifact_file_name(iteration: u32) -> String {
    format!("{ARTIFACT_PREFIX}{iteration:04}.{ARTIFACT_EXTENSION}")
}

/// Iteration index embedded in an artifact's file name.
///
/// Uses the last run of ASCII digits in the file stem, so `run_0007.log`,
/// `run-7.log` and `perf_run7.log` all map to 7.
pub fn iteration_from_path(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let end = stem.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = stem[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    stem[start..end].parse().ok()
}

/// A case block that did not pass the grammar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedBlock {
    /// Zero-based position of the block in the document.
    pub index: usize,
    /// Case name when the header was readable.
    pub case: Option<String>,
    #[serde(serialize_with = "serialize_display")]
    pub reason: BlockError,
}

fn serialize_display<S: serde::Serializer>(err: &BlockError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Everything parsing one document produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub records: Vec<TestCaseRecord>,
    pub rejected: Vec<RejectedBlock>,
    pub skipped_metrics: usize,
}

impl ParseOutcome {
    pub fn block_count(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// What happened when an artifact was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Parsed,
    /// The file does not exist.
    Missing,
    /// The file exists but could not be read.
    Unreadable(String),
    /// The file name carries no iteration index.
    UnknownIteration,
}

/// Result of parsing one artifact on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactParse {
    pub status: ArtifactStatus,
    pub outcome: ParseOutcome,
}

impl ArtifactParse {
    fn empty(status: ArtifactStatus) -> Self {
        Self {
            status,
            outcome: ParseOutcome::default(),
        }
    }
}

/// Parser for the harness log format.
#[derive(Debug, Clone)]
pub struct LogParser {
    grammar: CaseGrammar,
}

impl LogParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            grammar: CaseGrammar::standard()?,
        })
    }

    /// Parse a whole document, attributing every record to `iteration`.
    ///
    /// Text before the first case marker is ignored.
    pub fn parse_document(&self, document: &str, iteration: u32) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for (index, block) in document.split(CASE_MARKER).skip(1).enumerate() {
            match self.grammar.parse_block(block) {
                Ok(fields) => {
                    for (line, reason) in &fields.skipped_metrics {
                        debug!(
                            iteration,
                            case = %fields.name,
                            line = %line,
                            reason = %reason,
                            "Skipping metric line"
                        );
                    }
                    outcome.skipped_metrics += fields.skipped_metrics.len();
                    outcome.records.push(TestCaseRecord {
                        iteration,
                        test_name: fields.name,
                        operation: fields.operation,
                        data_size: fields.data_size,
                        duration_us: fields.duration_us,
                        metrics: fields.metrics,
                    });
                }
                Err(reason) => {
                    let header = block.lines().next().unwrap_or_default();
                    let case = grammar::case_name(header).ok();
                    warn!(
                        iteration,
                        block = index,
                        case = case.as_deref().unwrap_or("<unnamed>"),
                        reason = %reason,
                        "Dropping malformed case block"
                    );
                    outcome.rejected.push(RejectedBlock {
                        index,
                        case,
                        reason,
                    });
                }
            }
        }

        outcome
    }

    /// Parse an artifact, taking the iteration from its file name.
    pub fn parse_artifact(&self, path: &Path) -> ArtifactParse {
        match iteration_from_path(path) {
            Some(iteration) => self.parse_artifact_as(path, iteration),
            None => {
                warn!(path = %path.display(), "Artifact name carries no iteration index");
                ArtifactParse::empty(ArtifactStatus::UnknownIteration)
            }
        }
    }

    /// Parse an artifact with an explicit iteration.
    ///
    /// A missing or unreadable file is not an error: it yields no records.
    pub fn parse_artifact_as(&self, path: &Path, iteration: u32) -> ArtifactParse {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(iteration, path = %path.display(), "Artifact missing");
                return ArtifactParse::empty(ArtifactStatus::Missing);
            }
            Err(e) => {
                warn!(iteration, path = %path.display(), error = %e, "Artifact unreadable");
                return ArtifactParse::empty(ArtifactStatus::Unreadable(e.to_string()));
            }
        };

        let document = String::from_utf8_lossy(&bytes);
        let outcome = self.parse_document(&document, iteration);
        debug!(
            iteration,
            path = %path.display(),
            records = outcome.records.len(),
            rejected = outcome.rejected.len(),
            skipped_metrics = outcome.skipped_metrics,
            "Parsed artifact"
        );

        ArtifactParse {
            status: ArtifactStatus::Parsed,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parser() -> LogParser {
        LogParser::new().expect("parser builds")
    }

    const DOC: &str = "\
flutter: starting profiling
=== Test Case: FFT small ===
Operation: fft
Data Size: 1024 points
Duration: 532µs
Performance Metrics:
throughput: 1.92
========================
=== Test Case: Filter ===
Operation: lowpass
Data Size: 2048 points
Performance Metrics:
ratio: 0.5
========================
=== Test Case: Decimate ===
Operation: decimate
Data Size: 4096 points
Duration: 77µs
";

    #[test]
    fn test_block_missing_duration_is_dropped_siblings_survive() {
        let outcome = parser().parse_document(DOC, 3);

        let names: Vec<_> = outcome.records.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["FFT small", "Decimate"]);
        assert!(outcome.records.iter().all(|r| r.iteration == 3));

        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 1);
        assert_eq!(outcome.rejected[0].case.as_deref(), Some("Filter"));
        assert_eq!(
            outcome.rejected[0].reason,
            BlockError::MissingField(Field::Duration)
        );
        assert_eq!(outcome.block_count(), 3);
    }

    #[test]
    fn test_record_without_metrics_section() {
        let outcome = parser().parse_document(DOC, 0);
        let decimate = &outcome.records[1];
        assert_eq!(decimate.duration_us, 77);
        assert_eq!(decimate.data_size, 4096);
        assert!(decimate.metrics.is_empty());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let p = parser();
        assert_eq!(p.parse_document(DOC, 1), p.parse_document(DOC, 1));
    }

    #[test]
    fn test_document_without_markers_yields_nothing() {
        let outcome = parser().parse_document("Operation: x\nDuration: 3µs\n", 0);
        assert!(outcome.records.is_empty());
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn test_artifact_file_name_round_trips_iteration() {
        assert_eq!(artifact_file_name(7), "run_0007.log");
        assert_eq!(artifact_file_name(12345), "run_12345.log");
        assert_eq!(
            iteration_from_path(&PathBuf::from("/tmp/x/run_0007.log")),
            Some(7)
        );
    }

    #[test]
    fn test_iteration_from_path_variants() {
        assert_eq!(iteration_from_path(Path::new("perf_run7.log")), Some(7));
        assert_eq!(iteration_from_path(Path::new("v2_run_12_retry.log")), Some(12));
        assert_eq!(iteration_from_path(Path::new("42")), Some(42));
        assert_eq!(iteration_from_path(Path::new("run.log")), None);
        assert_eq!(iteration_from_path(Path::new("run_99999999999.log")), None);
    }

    #[test]
    fn test_missing_artifact_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = parser().parse_artifact(&dir.path().join("run_0003.log"));
        assert_eq!(parsed.status, ArtifactStatus::Missing);
        assert!(parsed.outcome.records.is_empty());
    }

    #[test]
    fn test_artifact_iteration_comes_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(artifact_file_name(9));
        std::fs::write(&path, DOC).unwrap();

        let parsed = parser().parse_artifact(&path);
        assert_eq!(parsed.status, ArtifactStatus::Parsed);
        assert_eq!(parsed.outcome.records.len(), 2);
        assert!(parsed.outcome.records.iter().all(|r| r.iteration == 9));
    }

    #[test]
    fn test_artifact_without_index_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, DOC).unwrap();

        let parsed = parser().parse_artifact(&path);
        assert_eq!(parsed.status, ArtifactStatus::UnknownIteration);
        assert!(parsed.outcome.records.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0001.log");
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(DOC.as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let parsed = parser().parse_artifact(&path);
        assert_eq!(parsed.outcome.records.len(), 2);
    }
}
