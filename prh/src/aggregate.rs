//! Grouping of records by `(test_name, operation)` and per-group statistics.

use crate::record::{GroupKey, TestCaseRecord};
use crate::stats::StatSummary;
use serde::Serialize;
use std::collections::HashMap;

/// Records sharing one [`GroupKey`], in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateGroup<'a> {
    pub key: GroupKey,
    pub records: Vec<&'a TestCaseRecord>,
}

impl<'a> AggregateGroup<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Metric keys reported by at least one record, first-seen order.
    pub fn metric_keys(&self) -> Vec<&'a str> {
        let mut keys: Vec<&'a str> = Vec::new();
        for record in self.records.iter().copied() {
            for (key, _) in &record.metrics {
                if !keys.contains(&key.as_str()) {
                    keys.push(key.as_str());
                }
            }
        }
        keys
    }

    pub fn summarize(&self) -> GroupSummary {
        let durations: Vec<u64> = self.records.iter().map(|r| r.duration_us).collect();
        let sizes: Vec<u64> = self.records.iter().map(|r| r.data_size).collect();

        let metrics = self
            .metric_keys()
            .into_iter()
            .map(|name| {
                let values: Vec<f64> = self
                    .records
                    .iter()
                    .filter_map(|r| r.metric(name))
                    .collect();
                MetricSummary {
                    name: name.to_string(),
                    missing: self.records.len() - values.len(),
                    stats: StatSummary::from_samples(&values),
                }
            })
            .collect();

        GroupSummary {
            key: self.key.clone(),
            samples: self.records.len(),
            duration_us: StatSummary::from_counts(&durations),
            data_size: StatSummary::from_counts(&sizes),
            metrics,
        }
    }
}

/// Statistics of one metric within a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    /// Records of the group that did not report this metric.
    pub missing: usize,
    /// `None` only if no record had a usable value.
    pub stats: Option<StatSummary>,
}

/// Statistics of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub key: GroupKey,
    pub samples: usize,
    pub duration_us: Option<StatSummary>,
    pub data_size: Option<StatSummary>,
    pub metrics: Vec<MetricSummary>,
}

impl GroupSummary {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Partition `records` into groups, first-seen group order.
///
/// Every record lands in exactly one group.
pub fn group_records(records: &[TestCaseRecord]) -> Vec<AggregateGroup<'_>> {
    let mut groups: Vec<AggregateGroup<'_>> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for record in records {
        let key = record.key();
        match index.get(&key) {
            Some(&slot) => groups[slot].records.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(AggregateGroup {
                    key,
                    records: vec![record],
                });
            }
        }
    }

    groups
}

/// Group and summarize in one pass.
pub fn summarize(records: &[TestCaseRecord]) -> Vec<GroupSummary> {
    group_records(records)
        .iter()
        .map(AggregateGroup::summarize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(
        iteration: u32,
        name: &str,
        op: &str,
        duration_us: u64,
        metrics: &[(&str, f64)],
    ) -> TestCaseRecord {
        TestCaseRecord {
            iteration,
            test_name: name.to_string(),
            operation: op.to_string(),
            data_size: 1024,
            duration_us,
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_groups_keep_first_seen_order() {
        let records = vec![
            record(0, "B", "x", 10, &[]),
            record(0, "A", "x", 20, &[]),
            record(1, "B", "x", 30, &[]),
            record(1, "A", "y", 40, &[]),
        ];
        let groups = group_records(&records);
        let keys: Vec<String> = groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["B / x", "A / x", "A / y"]);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].records[1].iteration, 1);
    }

    #[test]
    fn test_same_name_different_operation_are_separate_groups() {
        let records = vec![record(0, "T", "read", 1, &[]), record(0, "T", "write", 2, &[])];
        assert_eq!(group_records(&records).len(), 2);
    }

    #[test]
    fn test_disjoint_metric_keys_counted_separately() {
        let records = vec![
            record(0, "T", "op", 10, &[("cpu", 1.0)]),
            record(1, "T", "op", 20, &[("mem", 100.0)]),
            record(2, "T", "op", 30, &[("cpu", 3.0)]),
        ];
        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 1);
        let group = &summaries[0];
        assert_eq!(group.samples, 3);
        assert_eq!(group.duration_us.unwrap().count, 3);

        let cpu = group.metric("cpu").unwrap();
        assert_eq!(cpu.missing, 1);
        let cpu_stats = cpu.stats.unwrap();
        assert_eq!(cpu_stats.count, 2);
        assert_eq!(cpu_stats.mean, 2.0);

        let mem = group.metric("mem").unwrap();
        assert_eq!(mem.missing, 2);
        let mem_stats = mem.stats.unwrap();
        assert_eq!(mem_stats.count, 1);
        assert_eq!(mem_stats.std_dev, 0.0);

        let names: Vec<_> = group.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["cpu", "mem"]);
    }

    #[test]
    fn test_single_record_group_summary() {
        let summaries = summarize(&[record(0, "Solo", "op", 77, &[("x", 2.0)])]);
        let duration = summaries[0].duration_us.unwrap();
        assert_eq!(duration.count, 1);
        assert_eq!(duration.std_dev, 0.0);
        assert_eq!(duration.p95, 77.0);
    }

    #[test]
    fn test_empty_input_has_no_groups() {
        assert!(summarize(&[]).is_empty());
    }

    fn arb_record() -> impl Strategy<Value = TestCaseRecord> {
        (0u32..5, "[ABC]", "[xy]", 0u64..10_000).prop_map(|(iteration, name, op, duration_us)| {
            record(iteration, &name, &op, duration_us, &[])
        })
    }

    proptest! {
        #[test]
        fn prop_grouping_is_a_partition(records in prop::collection::vec(arb_record(), 0..80)) {
            let groups = group_records(&records);

            let total: usize = groups.iter().map(AggregateGroup::len).sum();
            prop_assert_eq!(total, records.len());

            for group in &groups {
                prop_assert!(!group.is_empty());
                for r in &group.records {
                    prop_assert!(r.has_key(&group.key));
                }
            }

            let mut keys: Vec<&GroupKey> = groups.iter().map(|g| &g.key).collect();
            let before = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), before);
        }
    }
}
