//! Logging setup shared by the Chanpost binaries
//!
//! Output format and level come from `CHANPOST_LOG_FORMAT` and
//! `CHANPOST_LOG_LEVEL`; a binary's `--verbose` flag takes precedence
//! over the configured level.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// Build from `CHANPOST_LOG_FORMAT` / `CHANPOST_LOG_LEVEL`, falling
    /// back to text at info level. `verbose` (a CLI flag) overrides the
    /// level with debug.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("CHANPOST_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("CHANPOST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            format,
            level,
            verbose,
        }
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose {
            "debug"
        } else {
            self.level.as_str()
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }

    /// Install the global subscriber. Call once at process start.
    ///
    /// # Panics
    ///
    /// Panics if a subscriber has already been installed.
    pub fn init(&self) {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        match self.format {
            LogFormat::Json => {
                // One JSON object per line, for log shippers
                builder
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .init();
            }
            LogFormat::Pretty => {
                builder
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .init();
            }
            LogFormat::Text => {
                builder.with_target(false).init();
            }
        }
    }
}

/// Environment-driven setup for binaries without a verbosity flag.
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        // Case insensitive
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "invalid".parse::<LogFormat>();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid log format: 'invalid'"));
    }

    #[test]
    fn test_log_format_display() {
        assert_eq!(LogFormat::Text.to_string(), "text");
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_format_and_level() {
        std::env::set_var("CHANPOST_LOG_FORMAT", "json");
        std::env::set_var("CHANPOST_LOG_LEVEL", "warn");
        let config = LoggingConfig::from_env(false);
        std::env::remove_var("CHANPOST_LOG_FORMAT");
        std::env::remove_var("CHANPOST_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");
        assert!(!config.verbose);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var("CHANPOST_LOG_FORMAT");
        std::env::remove_var("CHANPOST_LOG_LEVEL");
        let config = LoggingConfig::from_env(true);

        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
        assert!(config.verbose);
    }
}
