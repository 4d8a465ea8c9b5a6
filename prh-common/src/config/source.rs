//! Source tracking for configuration values.

use serde::Serialize;
use std::fmt;

/// Where a configuration value came from.
///
/// Ordered by precedence: a later layer overrides an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Loaded from a TOML config file.
    File,
    /// Read from a `PRH_*` environment variable.
    Environment,
    /// Passed on the command line.
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Environment => write!(f, "env"),
            Self::CommandLine => write!(f, "cli"),
        }
    }
}

/// A value annotated with the layer that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable name, when `source` is `Environment`.
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(var.into()),
        }
    }

    pub fn from_file(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::File,
            env_var: None,
        }
    }

    pub fn from_cli(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::CommandLine,
            env_var: None,
        }
    }

    /// Replace the value if `other` comes from a layer at least as specific.
    ///
    /// Default-sourced values never override anything.
    pub fn merge(&mut self, other: Sourced<T>) {
        if other.source != ConfigSource::Default && other.source >= self.source {
            *self = other;
        }
    }

    /// Transform the value, keeping its provenance.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_respects_precedence() {
        let mut value = Sourced::default_value(100u32);
        value.merge(Sourced::from_file(20));
        assert_eq!(value.value, 20);
        assert_eq!(value.source, ConfigSource::File);

        value.merge(Sourced::from_env(30, "PRH_ITERATIONS"));
        assert_eq!(value.value, 30);

        value.merge(Sourced::from_file(40));
        assert_eq!(value.value, 30, "file must not override env");

        value.merge(Sourced::default_value(1));
        assert_eq!(value.value, 30, "defaults never override");

        value.merge(Sourced::from_cli(5));
        assert_eq!(value.value, 5);
        assert_eq!(value.source, ConfigSource::CommandLine);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ConfigSource::Default.to_string(), "default");
        assert_eq!(ConfigSource::Environment.to_string(), "env");
        assert_eq!(ConfigSource::CommandLine.to_string(), "cli");
    }
}
