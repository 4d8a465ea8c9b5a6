//! Harness configuration, resolved from layered sources.
//!
//! Precedence, lowest to highest: built-in defaults, an optional TOML file,
//! `PRH_*` environment variables, then command-line flags. Each value keeps
//! the [`ConfigSource`] it came from.

use crate::runner::ProcessRunner;
use crate::session::{SessionSettings, directories_overlap, reset_refusal};
use prh_common::{ConfigSource, EnvError, EnvParser, Sourced};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ITERATIONS: u32 = 100;
pub const MAX_ITERATIONS: u32 = 1_000_000;
pub const DEFAULT_ARTIFACTS_DIR: &str = "perf_logs";
pub const DEFAULT_RESULTS_DIR: &str = "perf_results";
/// Upper bound for `PRH_TIMEOUT_SECS`: one week.
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("iterations must be at least 1")]
    ZeroIterations,

    #[error("iterations must be at most {MAX_ITERATIONS}, got {0}")]
    TooManyIterations(u32),

    #[error("no command given to run")]
    EmptyCommand,

    #[error("{role} directory {path} cannot be reset: {reason}")]
    UnsafeDirectory {
        role: &'static str,
        path: PathBuf,
        reason: &'static str,
    },

    #[error("artifact directory {artifacts} and results directory {results} overlap")]
    OverlappingDirectories { artifacts: PathBuf, results: PathBuf },
}

/// Contents of a `--config` TOML file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub iterations: Option<u32>,
    pub command: Option<Vec<String>>,
    pub artifacts_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    /// Zero disables the timeout.
    pub timeout_secs: Option<u64>,
    /// Zero disables checkpoints.
    pub checkpoint_every: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub iterations: Option<u32>,
    pub command: Vec<String>,
    pub artifacts_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub checkpoint_every: Option<u32>,
}

/// Fully resolved configuration for `prh run`.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub iterations: Sourced<u32>,
    pub command: Sourced<Vec<String>>,
    pub artifacts_dir: Sourced<PathBuf>,
    pub results_dir: Sourced<PathBuf>,
    pub timeout: Sourced<Option<Duration>>,
    pub checkpoint_every: Sourced<Option<u32>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: Sourced::default_value(DEFAULT_ITERATIONS),
            command: Sourced::default_value(Vec::new()),
            artifacts_dir: Sourced::default_value(PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            results_dir: Sourced::default_value(PathBuf::from(DEFAULT_RESULTS_DIR)),
            timeout: Sourced::default_value(None),
            checkpoint_every: Sourced::default_value(None),
        }
    }
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn nonzero(n: u32) -> Option<u32> {
    (n > 0).then_some(n)
}

impl HarnessConfig {
    /// Resolve all layers. Invalid environment values are returned, not fatal.
    pub fn resolve(
        config_file: Option<&Path>,
        cli: CliOverrides,
    ) -> Result<(Self, Vec<EnvError>), ConfigError> {
        let mut config = Self::default();
        if let Some(path) = config_file {
            config.apply_file(FileConfig::load(path)?);
        }
        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        config.apply_cli(cli);
        Ok((config, parser.take_errors()))
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(n) = file.iterations {
            self.iterations.merge(Sourced::from_file(n));
        }
        if let Some(command) = file.command {
            self.command.merge(Sourced::from_file(command));
        }
        if let Some(dir) = file.artifacts_dir {
            self.artifacts_dir.merge(Sourced::from_file(dir));
        }
        if let Some(dir) = file.results_dir {
            self.results_dir.merge(Sourced::from_file(dir));
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout.merge(Sourced::from_file(nonzero_secs(secs)));
        }
        if let Some(every) = file.checkpoint_every {
            self.checkpoint_every.merge(Sourced::from_file(nonzero(every)));
        }
    }

    /// Apply `PRH_*` variables. A rejected value keeps the current one.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        self.iterations.merge(parser.get_u32_range(
            "ITERATIONS",
            self.iterations.value,
            1,
            MAX_ITERATIONS,
        ));
        self.artifacts_dir
            .merge(parser.get_path("ARTIFACTS_DIR", DEFAULT_ARTIFACTS_DIR));
        self.results_dir
            .merge(parser.get_path("RESULTS_DIR", DEFAULT_RESULTS_DIR));

        let current_timeout = self.timeout.value.map_or(0, |d| d.as_secs());
        self.timeout.merge(
            parser
                .get_u64_range("TIMEOUT_SECS", current_timeout, 0, MAX_TIMEOUT_SECS)
                .map(nonzero_secs),
        );

        let current_every = self.checkpoint_every.value.unwrap_or(0);
        self.checkpoint_every.merge(
            parser
                .get_u32_range("CHECKPOINT_EVERY", current_every, 0, MAX_ITERATIONS)
                .map(nonzero),
        );
    }

    pub fn apply_cli(&mut self, cli: CliOverrides) {
        if let Some(n) = cli.iterations {
            self.iterations.merge(Sourced::from_cli(n));
        }
        if !cli.command.is_empty() {
            self.command.merge(Sourced::from_cli(cli.command));
        }
        if let Some(dir) = cli.artifacts_dir {
            self.artifacts_dir.merge(Sourced::from_cli(dir));
        }
        if let Some(dir) = cli.results_dir {
            self.results_dir.merge(Sourced::from_cli(dir));
        }
        if let Some(timeout) = cli.timeout {
            self.timeout
                .merge(Sourced::from_cli((!timeout.is_zero()).then_some(timeout)));
        }
        if let Some(every) = cli.checkpoint_every {
            self.checkpoint_every.merge(Sourced::from_cli(nonzero(every)));
        }
    }

    /// Semantic checks. Runs before any directory is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.iterations.value {
            0 => return Err(ConfigError::ZeroIterations),
            n if n > MAX_ITERATIONS => return Err(ConfigError::TooManyIterations(n)),
            _ => {}
        }
        if ProcessRunner::from_command(&self.command.value).is_none() {
            return Err(ConfigError::EmptyCommand);
        }

        for (role, dir) in [
            ("artifact", &self.artifacts_dir.value),
            ("results", &self.results_dir.value),
        ] {
            if let Some(reason) = reset_refusal(dir) {
                return Err(ConfigError::UnsafeDirectory {
                    role,
                    path: dir.clone(),
                    reason,
                });
            }
        }

        if directories_overlap(&self.artifacts_dir.value, &self.results_dir.value) {
            return Err(ConfigError::OverlappingDirectories {
                artifacts: self.artifacts_dir.value.clone(),
                results: self.results_dir.value.clone(),
            });
        }
        Ok(())
    }

    pub fn runner(&self) -> Result<ProcessRunner, ConfigError> {
        ProcessRunner::from_command(&self.command.value)
            .map(|r| r.with_timeout(self.timeout.value))
            .ok_or(ConfigError::EmptyCommand)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            iterations: self.iterations.value,
            artifacts_dir: self.artifacts_dir.value.clone(),
            results_dir: self.results_dir.value.clone(),
            checkpoint_every: self.checkpoint_every.value,
        }
    }

    /// Log where every value came from.
    pub fn log_sources(&self) {
        fn origin<T>(s: &Sourced<T>) -> String {
            match (&s.source, &s.env_var) {
                (ConfigSource::Environment, Some(var)) => format!("env ({var})"),
                (source, _) => source.to_string(),
            }
        }
        debug!(
            value = self.iterations.value,
            source = %origin(&self.iterations),
            "Config: iterations"
        );
        debug!(
            value = %self.artifacts_dir.value.display(),
            source = %origin(&self.artifacts_dir),
            "Config: artifacts_dir"
        );
        debug!(
            value = %self.results_dir.value.display(),
            source = %origin(&self.results_dir),
            "Config: results_dir"
        );
        debug!(
            value = ?self.timeout.value,
            source = %origin(&self.timeout),
            "Config: timeout"
        );
        debug!(
            value = ?self.checkpoint_every.value,
            source = %origin(&self.checkpoint_every),
            "Config: checkpoint_every"
        );
        debug!(
            value = %self.command.value.join(" "),
            source = %origin(&self.command),
            "Config: command"
        );
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::runner::CommandRunner;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    const ENV_VARS: [&str; 5] = [
        "PRH_ITERATIONS",
        "PRH_ARTIFACTS_DIR",
        "PRH_RESULTS_DIR",
        "PRH_TIMEOUT_SECS",
        "PRH_CHECKPOINT_EVERY",
    ];

    fn env_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_env() {
        for var in ENV_VARS {
            // SAFETY: Tests touching PRH_* are serialized via env_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: Tests touching PRH_* are serialized via env_lock
        unsafe { std::env::set_var(key, value) };
    }

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn valid_in(dir: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.apply_cli(CliOverrides {
            command: command(&["flutter", "test"]),
            artifacts_dir: Some(dir.join("logs")),
            results_dir: Some(dir.join("results")),
            ..CliOverrides::default()
        });
        config
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.iterations.value, 100);
        assert_eq!(config.iterations.source, ConfigSource::Default);
        assert_eq!(config.artifacts_dir.value, PathBuf::from("perf_logs"));
        assert!(config.timeout.value.is_none());
        assert!(config.checkpoint_every.value.is_none());
    }

    #[test]
    fn test_file_config_parses() {
        let file = FileConfig::parse(
            r#"
iterations = 25
command = ["flutter", "test", "integration_test/perf_test.dart"]
results_dir = "out/results"
timeout_secs = 90
checkpoint_every = 0
"#,
            Path::new("prh.toml"),
        )
        .unwrap();

        let mut config = HarnessConfig::default();
        config.apply_file(file);
        assert_eq!(config.iterations.value, 25);
        assert_eq!(config.iterations.source, ConfigSource::File);
        assert_eq!(config.command.value.len(), 3);
        assert_eq!(config.results_dir.value, PathBuf::from("out/results"));
        assert_eq!(config.timeout.value, Some(Duration::from_secs(90)));
        assert_eq!(config.checkpoint_every.value, None);
        assert_eq!(config.checkpoint_every.source, ConfigSource::File);
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        let err = FileConfig::parse("iteratons = 5\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_config_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides_file_and_cli_overrides_env() {
        let _guard = env_lock();
        clear_env();
        set_env("PRH_ITERATIONS", "30");
        set_env("PRH_TIMEOUT_SECS", "45");

        let mut config = HarnessConfig::default();
        config.apply_file(FileConfig {
            iterations: Some(10),
            timeout_secs: Some(5),
            ..FileConfig::default()
        });
        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        assert!(!parser.has_errors());
        assert_eq!(config.iterations.value, 30);
        assert_eq!(
            config.iterations.env_var.as_deref(),
            Some("PRH_ITERATIONS")
        );
        assert_eq!(config.timeout.value, Some(Duration::from_secs(45)));

        config.apply_cli(CliOverrides {
            iterations: Some(3),
            ..CliOverrides::default()
        });
        assert_eq!(config.iterations.value, 3);
        assert_eq!(config.iterations.source, ConfigSource::CommandLine);
        assert_eq!(config.timeout.value, Some(Duration::from_secs(45)));

        clear_env();
    }

    #[test]
    fn test_invalid_env_keeps_file_value_and_reports() {
        let _guard = env_lock();
        clear_env();
        set_env("PRH_ITERATIONS", "0");
        set_env("PRH_CHECKPOINT_EVERY", "often");

        let mut config = HarnessConfig::default();
        config.apply_file(FileConfig {
            iterations: Some(12),
            ..FileConfig::default()
        });
        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);

        assert_eq!(config.iterations.value, 12);
        assert_eq!(config.iterations.source, ConfigSource::File);
        assert_eq!(config.iterations.env_var, None);
        assert_eq!(config.checkpoint_every.value, None);
        assert_eq!(config.checkpoint_every.source, ConfigSource::Default);
        assert_eq!(parser.errors().len(), 2);

        clear_env();
    }

    #[test]
    fn test_resolve_reads_file_and_env() {
        let _guard = env_lock();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prh.toml");
        std::fs::write(&path, "iterations = 7\ncommand = [\"true\"]\n").unwrap();
        set_env("PRH_CHECKPOINT_EVERY", "2");

        let (config, errors) =
            HarnessConfig::resolve(Some(&path), CliOverrides::default()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(config.iterations.value, 7);
        assert_eq!(config.command.value, command(&["true"]));
        assert_eq!(config.checkpoint_every.value, Some(2));
        assert_eq!(config.session_settings().checkpoint_every, Some(2));

        clear_env();
    }

    #[test]
    fn test_zero_cli_timeout_disables() {
        let mut config = HarnessConfig::default();
        config.apply_file(FileConfig {
            timeout_secs: Some(60),
            ..FileConfig::default()
        });
        config.apply_cli(CliOverrides {
            timeout: Some(Duration::ZERO),
            ..CliOverrides::default()
        });
        assert_eq!(config.timeout.value, None);
        assert_eq!(config.timeout.source, ConfigSource::CommandLine);
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_in(dir.path());
        config.validate().unwrap();
        assert_eq!(config.runner().unwrap().describe(), "flutter test");
    }

    #[test]
    fn test_validate_rejects_zero_iterations_and_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_in(dir.path());
        config.iterations = Sourced::from_file(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroIterations)));

        let mut config = valid_in(dir.path());
        config.command = Sourced::default_value(Vec::new());
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCommand)));
        assert!(config.runner().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_or_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_in(dir.path());
        config.results_dir = Sourced::from_cli(dir.path().join("logs"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlappingDirectories { .. })
        ));

        config.results_dir = Sourced::from_cli(dir.path().join("logs/results"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlappingDirectories { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_dangerous_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_in(dir.path());
        config.artifacts_dir = Sourced::from_cli(PathBuf::from("/"));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsafeDirectory {
                role: "artifact",
                ..
            }
        ));

        let mut config = valid_in(dir.path());
        config.results_dir = Sourced::from_cli(PathBuf::from("."));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsafeDirectory { role: "results", .. })
        ));
    }
}
