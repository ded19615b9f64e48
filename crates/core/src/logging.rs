//! Logging setup for murmur.
//!
//! # Environment Variables
//!
//! - `MURMUR_LOG`: Filter directive (like `RUST_LOG`), e.g., `murmur_core=debug`
//! - `MURMUR_LOG_FORMAT`: Output format for stderr: `pretty`, `json`, `compact`
//! - `MURMUR_LOG_DIR`: Directory for rolling file logs (default `~/.murmur/logs`)
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! level = "warn"
//! format = "pretty"
//! log_message_content = false
//! truncate_length = 200
//!
//! [logging.file]
//! enabled = false
//! level = "debug"
//! ```
//!
//! Message text is user content. Components pass it through
//! [`redact_content`] before it reaches a log event.

use crate::Error;
use crate::config::{FileLoggingConfig, LoggingConfig as ConfigLoggingConfig};
use std::env;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format for stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output with colors (default for TTY)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line output
    Compact,
}

impl LogFormat {
    pub const VALUES: &[LogFormat] = &[LogFormat::Pretty, LogFormat::Json, LogFormat::Compact];

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

/// Controls how message text appears in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentPolicy {
    pub log_message_content: bool,
    pub truncate_length: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self { log_message_content: false, truncate_length: 200 }
    }
}

/// Runtime logging settings resolved from `[logging]`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level for stderr output.
    pub level: String,
    pub format: LogFormat,
    /// File output; `None` when disabled.
    pub file: Option<FileLoggingConfig>,
    pub content: ContentPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: LogFormat::default(), file: None, content: ContentPolicy::default() }
    }
}

impl From<ConfigLoggingConfig> for LoggingConfig {
    fn from(config: ConfigLoggingConfig) -> Self {
        Self {
            level: config.level,
            format: LogFormat::parse_str(&config.format).unwrap_or_default(),
            file: if config.file.enabled { Some(config.file) } else { None },
            content: ContentPolicy {
                log_message_content: config.log_message_content,
                truncate_length: config.truncate_length,
            },
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_logging(mut self, config: FileLoggingConfig) -> Self {
        self.file = Some(config);
        self
    }

    pub fn with_content_policy(mut self, content: ContentPolicy) -> Self {
        self.content = content;
        self
    }

    /// Filter directive: `MURMUR_LOG`, then `RUST_LOG`, then the configured level.
    fn filter_directive(&self) -> String {
        env::var("MURMUR_LOG")
            .ok()
            .or_else(|| env::var("RUST_LOG").ok())
            .unwrap_or_else(|| self.level.clone())
    }

    fn is_tty() -> bool {
        atty::is(atty::Stream::Stderr)
    }

    /// `MURMUR_LOG_FORMAT` wins; otherwise pretty on a TTY, compact when piped,
    /// unless the config asked for JSON.
    fn detect_format(&self) -> LogFormat {
        if let Ok(fmt_str) = env::var("MURMUR_LOG_FORMAT")
            && let Some(fmt) = LogFormat::parse_str(&fmt_str)
        {
            return fmt;
        }

        match self.format {
            LogFormat::Json => LogFormat::Json,
            _ if Self::is_tty() => self.format,
            _ => LogFormat::Compact,
        }
    }

    fn log_dir() -> Result<PathBuf, Error> {
        if let Ok(custom_dir) = env::var("MURMUR_LOG_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;

        Ok(PathBuf::from(home).join(".murmur").join("logs"))
    }
}

/// Install the global tracing subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the life of the process so buffered events are flushed.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<Option<WorkerGuard>, Error> {
    let config = config.unwrap_or_default();
    let stderr_filter = EnvFilter::new(config.filter_directive());

    let stderr_layer = match config.detect_format() {
        LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(io::stderr).boxed(),
    }
    .with_filter(stderr_filter);

    let registry = Registry::default().with(stderr_layer);

    let Some(file_config) = &config.file else {
        registry
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
        return Ok(None);
    };

    let log_dir = LoggingConfig::log_dir()?;
    std::fs::create_dir_all(&log_dir).map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "murmur.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new(&file_config.level));

    registry
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;

    tracing::debug!(dir = %sanitize_path(&log_dir), "File logging enabled");
    Ok(Some(guard))
}

/// Render message text for a log event.
///
/// Without `log_message_content` only the length is logged.
pub fn redact_content(content: &str, policy: &ContentPolicy) -> String {
    let chars = content.chars().count();
    if !policy.log_message_content {
        return format!("[{} chars]", chars);
    }

    if chars <= policy.truncate_length {
        return content.to_string();
    }

    let mut truncated = content.chars().take(policy.truncate_length).collect::<String>();
    truncated.push_str("...");
    truncated.push_str(&format!(" ({} total chars)", chars));
    truncated
}

/// Replace the home directory prefix with `~`.
pub fn sanitize_path(path: &std::path::Path) -> String {
    if let Ok(home) = env::var("HOME")
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        return format!("~/{}", stripped.display());
    }

    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::parse_str("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse_str("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse_str("Compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse_str("xml"), None);
    }

    #[test]
    fn test_log_format_round_trips_names() {
        for format in LogFormat::VALUES {
            assert_eq!(LogFormat::parse_str(format.as_str()), Some(*format));
        }
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
        assert!(!config.content.log_message_content);
    }

    #[test]
    fn test_logging_config_from_config_section() {
        let section = ConfigLoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
            log_message_content: true,
            truncate_length: 50,
            file: FileLoggingConfig { enabled: true, level: "trace".to_string() },
        };

        let config = LoggingConfig::from(section);
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file.map(|f| f.level), Some("trace".to_string()));
        assert_eq!(config.content, ContentPolicy { log_message_content: true, truncate_length: 50 });
    }

    #[test]
    fn test_disabled_file_section_is_dropped() {
        let config = LoggingConfig::from(ConfigLoggingConfig::default());
        assert!(config.file.is_none());
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level("info")
            .with_format(LogFormat::Compact)
            .with_content_policy(ContentPolicy { log_message_content: true, truncate_length: 10 });

        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.content.truncate_length, 10);
    }

    #[test]
    fn test_redact_content_hides_text_by_default() {
        let redacted = redact_content("my address is 1 Main St", &ContentPolicy::default());
        assert_eq!(redacted, "[23 chars]");
    }

    #[test]
    fn test_redact_content_counts_chars_not_bytes() {
        assert_eq!(redact_content("héllo", &ContentPolicy::default()), "[5 chars]");
    }

    #[test]
    fn test_redact_content_truncates_when_enabled() {
        let policy = ContentPolicy { log_message_content: true, truncate_length: 10 };
        assert_eq!(redact_content("short", &policy), "short");

        let redacted = redact_content("abcdefghijklmnopqrstuvwxyz", &policy);
        assert!(redacted.starts_with("abcdefghij..."));
        assert!(redacted.contains("26 total chars"));
    }

    #[test]
    fn test_sanitize_path() {
        let abs_path = PathBuf::from("/var/log/murmur.log");
        assert_eq!(sanitize_path(&abs_path), "/var/log/murmur.log");

        if let Ok(home) = env::var("HOME")
            && !home.is_empty()
        {
            let path = PathBuf::from(&home).join("logs").join("murmur.log");
            assert_eq!(sanitize_path(&path), "~/logs/murmur.log");
        }
    }
}
