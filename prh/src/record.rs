//! Parsed test-case records and the session-wide accumulator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One measured case from one iteration's log artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    /// Iteration that produced the artifact this record came from.
    pub iteration: u32,
    pub test_name: String,
    pub operation: String,
    /// Input size in points.
    pub data_size: u64,
    /// Measured duration in microseconds.
    pub duration_us: u64,
    /// Extra measurements in the order the log listed them.
    /// Keys differ between records.
    #[serde(default)]
    pub metrics: Vec<(String, f64)>,
}

impl TestCaseRecord {
    pub fn key(&self) -> GroupKey {
        GroupKey {
            test_name: self.test_name.clone(),
            operation: self.operation.clone(),
        }
    }

    pub fn has_key(&self, key: &GroupKey) -> bool {
        self.test_name == key.test_name && self.operation == key.operation
    }

    /// Value of the named metric, if this record reported it.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

/// Aggregation key: records sharing a test name and operation are summarized together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub test_name: String,
    pub operation: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.test_name, self.operation)
    }
}

/// Records accumulated across a session, in arrival order.
///
/// Owned by the session and appended to only after an iteration completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordSet {
    records: Vec<TestCaseRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = TestCaseRecord>) -> usize {
        let before = self.records.len();
        self.records.extend(records);
        self.records.len() - before
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_slice(&self) -> &[TestCaseRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TestCaseRecord> {
        self.records.iter()
    }

    /// Distinct iterations that contributed at least one record, ascending.
    pub fn iterations(&self) -> Vec<u32> {
        let mut seen: Vec<u32> = self.records.iter().map(|r| r.iteration).collect();
        seen.sort_unstable();
        seen.dedup();
        seen
    }

    /// Union of metric keys over all records, first-seen order.
    pub fn metric_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for record in &self.records {
            for (key, _) in &record.metrics {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}

impl From<Vec<TestCaseRecord>> for RecordSet {
    fn from(records: Vec<TestCaseRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a TestCaseRecord;
    type IntoIter = std::slice::Iter<'a, TestCaseRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
