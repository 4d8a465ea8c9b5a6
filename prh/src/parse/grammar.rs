//! Grammar for one case block of a performance log.
//!
//! A block is the text following a `=== Test Case:` marker:
//!
//! ```text
//!  FFT small ===
//! Operation: fft
//! Data Size: 1024 points
//! Duration: 532µs
//! Performance Metrics:
//! throughput: 1.92
//! ========================
//! ```
//!
//! The header line carries the case name up to the closing `===`. The three
//! [`Field`]s are required and matched in grammar order. The metrics section
//! is optional and runs until a line starting with `=` or the end of the block.

use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Marker that opens every case block.
pub const CASE_MARKER: &str = "=== Test Case:";
/// Marker closing the case name on the header line.
pub const HEADER_CLOSE: &str = "===";
/// Line that opens the optional metrics section.
pub const METRICS_HEADER: &str = "Performance Metrics:";
/// Lines starting with this character close the metrics section.
pub const SECTION_CLOSE: char = '=';

/// Required fields of a case block, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Operation,
    DataSize,
    Duration,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Self::Operation => "Operation",
            Self::DataSize => "Data Size",
            Self::Duration => "Duration",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a case block was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("header line has no closing '{HEADER_CLOSE}' marker")]
    UnterminatedHeader,

    #[error("case name is empty")]
    EmptyName,

    #[error("missing required field '{0}'")]
    MissingField(Field),

    #[error("invalid value for '{field}': '{value}'")]
    InvalidValue { field: Field, value: String },
}

/// Why a single metric line was ignored. The rest of the record is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricLineError {
    #[error("no ':' separator")]
    NoSeparator,

    #[error("empty metric name")]
    EmptyKey,

    #[error("value '{0}' is not a finite number")]
    NotANumber(String),
}

/// Typed value of one required field.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Count(u64),
}

/// Matches one `Label: value` line and validates its value.
#[derive(Debug, Clone)]
struct FieldMatcher {
    field: Field,
    line: Regex,
    value: Regex,
}

impl FieldMatcher {
    fn new(field: Field, value_pattern: &str) -> Result<Self, regex::Error> {
        let line = Regex::new(&format!(
            r"(?m)^[ \t]*{}:[ \t]*(.*?)[ \t\r]*$",
            regex::escape(field.label())
        ))?;
        let value = Regex::new(value_pattern)?;
        Ok(Self { field, line, value })
    }

    /// Extract this field from the block's field region.
    ///
    /// The first line carrying the label wins.
    fn extract(&self, region: &str) -> Result<FieldValue, BlockError> {
        let raw = self
            .line
            .captures(region)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or(BlockError::MissingField(self.field))?;

        let invalid = || BlockError::InvalidValue {
            field: self.field,
            value: raw.to_string(),
        };

        let caps = self.value.captures(raw).ok_or_else(invalid)?;
        let captured = caps.get(1).map(|m| m.as_str()).ok_or_else(invalid)?;

        match self.field {
            Field::Operation => Ok(FieldValue::Text(captured.trim().to_string())),
            Field::DataSize | Field::Duration => captured
                .parse::<u64>()
                .map(FieldValue::Count)
                .map_err(|_| invalid()),
        }
    }
}

/// Ordered required-field matchers plus the optional metrics section.
#[derive(Debug, Clone)]
pub struct CaseGrammar {
    matchers: Vec<FieldMatcher>,
}

/// Fields extracted from a block that passed the grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseFields {
    pub name: String,
    pub operation: String,
    pub data_size: u64,
    pub duration_us: u64,
    pub metrics: Vec<(String, f64)>,
    pub skipped_metrics: Vec<(String, MetricLineError)>,
}

impl CaseGrammar {
    /// The grammar of the harness's log format.
    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self {
            matchers: vec![
                FieldMatcher::new(Field::Operation, r"^(\S.*)$")?,
                FieldMatcher::new(Field::DataSize, r"^(\d+)[ \t]*points$")?,
                // Both MICRO SIGN (U+00B5) and GREEK SMALL LETTER MU (U+03BC).
                FieldMatcher::new(Field::Duration, r"^(\d+)[ \t]*[\x{00B5}\x{03BC}]s$")?,
            ],
        })
    }

    /// Apply the grammar to one block (the text after [`CASE_MARKER`]).
    pub fn parse_block(&self, block: &str) -> Result<CaseFields, BlockError> {
        let (header, body) = block.split_once('\n').unwrap_or((block, ""));
        let name = case_name(header)?;

        let (field_region, metrics_region) = split_metrics(body);

        let mut operation = None;
        let mut data_size = None;
        let mut duration_us = None;
        for matcher in &self.matchers {
            match (matcher.field, matcher.extract(field_region)?) {
                (Field::Operation, FieldValue::Text(v)) => operation = Some(v),
                (Field::DataSize, FieldValue::Count(v)) => data_size = Some(v),
                (Field::Duration, FieldValue::Count(v)) => duration_us = Some(v),
                (field, value) => {
                    return Err(BlockError::InvalidValue {
                        field,
                        value: format!("{value:?}"),
                    });
                }
            }
        }

        let (metrics, skipped_metrics) = match metrics_region {
            Some(region) => parse_metrics(region),
            None => (Vec::new(), Vec::new()),
        };

        Ok(CaseFields {
            name,
            operation: operation.ok_or(BlockError::MissingField(Field::Operation))?,
            data_size: data_size.ok_or(BlockError::MissingField(Field::DataSize))?,
            duration_us: duration_us.ok_or(BlockError::MissingField(Field::Duration))?,
            metrics,
            skipped_metrics,
        })
    }
}

/// Case name from the header line: the text before the closing marker.
pub fn case_name(header: &str) -> Result<String, BlockError> {
    let (name, _) = header
        .split_once(HEADER_CLOSE)
        .ok_or(BlockError::UnterminatedHeader)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(BlockError::EmptyName);
    }
    Ok(name.to_string())
}

/// Split a block body at the metrics header line.
///
/// Returns the field region and, if present, the lines after the header up to
/// the closing line.
fn split_metrics(body: &str) -> (&str, Option<&str>) {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.contains(METRICS_HEADER) {
            let fields = &body[..offset];
            let rest = &body[offset + line.len()..];
            return (fields, Some(metrics_until_close(rest)));
        }
        offset += line.len();
    }
    (body, None)
}

fn metrics_until_close(rest: &str) -> &str {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_start().starts_with(SECTION_CLOSE) {
            return &rest[..offset];
        }
        offset += line.len();
    }
    rest
}

/// Parse `key: value` lines. Bad lines are returned separately, not fatal.
pub fn parse_metrics(region: &str) -> (Vec<(String, f64)>, Vec<(String, MetricLineError)>) {
    let mut metrics: Vec<(String, f64)> = Vec::new();
    let mut skipped = Vec::new();

    for line in region.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_metric_line(line) {
            Ok((key, value)) => match metrics.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => metrics.push((key, value)),
            },
            Err(err) => skipped.push((line.to_string(), err)),
        }
    }

    (metrics, skipped)
}

fn parse_metric_line(line: &str) -> Result<(String, f64), MetricLineError> {
    let (key, value) = line.split_once(':').ok_or(MetricLineError::NoSeparator)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(MetricLineError::EmptyKey);
    }
    let value = value.trim();
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok((key.to_string(), v)),
        _ => Err(MetricLineError::NotANumber(value.to_string())),
    }
}
