//! Structured logging built on `slog` + `sloggers`.
//!
//! The teacher's `flux::logging::init` only ever built a hard-coded terminal logger and threw
//! the result away (a TODO admitted as much). This version actually returns the logger and
//! accepts an overriding TOML document, so a binary can point at a syslog drain in production
//! without recompiling.

use sloggers::Config as SloggersConfig;
use sloggers::LoggerConfig;
use std::fmt;

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

const DEFAULT_CONFIG_TOML: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

#[derive(Debug)]
pub enum LoggingError {
    Config(serdeconv::Error),
    Build(sloggers::Error),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingError::Config(err) => write!(f, "invalid logging configuration: {}", err),
            LoggingError::Build(err) => write!(f, "failed to build logger: {}", err),
        }
    }
}

impl std::error::Error for LoggingError {}

impl From<serdeconv::Error> for LoggingError {
    fn from(err: serdeconv::Error) -> Self {
        LoggingError::Config(err)
    }
}

impl From<sloggers::Error> for LoggingError {
    fn from(err: sloggers::Error) -> Self {
        LoggingError::Build(err)
    }
}

/// Builds the root logger from the default terminal configuration (debug level, stderr).
pub fn init() -> Logger {
    from_toml(DEFAULT_CONFIG_TOML).expect("default logging configuration must be valid")
}

/// Builds the root logger from a TOML-encoded `sloggers::LoggerConfig` document, e.g.
///
/// ```toml
/// type = "terminal"
/// level = "info"
/// destination = "stdout"
/// ```
pub fn from_toml(toml: &str) -> Result<Logger, LoggingError> {
    let config: LoggerConfig = serdeconv::from_toml_str(toml)?;
    Ok(config.build_logger()?)
}

/// A logger that discards everything, for tests and embeddings that want silence.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
