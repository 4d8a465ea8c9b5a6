//! Shared plumbing for the prh performance harness: logging setup and
//! layered configuration helpers.

#![deny(unsafe_code)]

pub mod config;
pub mod logging;

pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
