//! Tracing Infrastructure
//!
//! Structured logging for the library and the CLI, built on `tracing` and
//! `tracing-subscriber`:
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Pretty, compact or JSON output
//!
//! # Example
//! ```no_run
//! use balance_logger::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! info!(port = "/dev/ttyUSB0", "Balance connected");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format (for unattended runs)
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
        }
    }
}

impl LogConfig {
    /// Create a config at `level` with default options.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Create a config from loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&settings.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from loaded settings.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(LogConfig::from_settings(settings)?)
}

/// Initialize tracing.
///
/// Idempotent: if a global subscriber is already set this returns `Ok(())`.
pub fn init(config: LogConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.application.log_level = "debug".into();
        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::new(Level::WARN).with_ansi(false);
        assert!(init(config.clone()).is_ok());
        assert!(init(config.with_format(OutputFormat::Json)).is_ok());
    }
}
