use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::fetcher::DEFAULT_PAGE_SIZE;
use crate::scope::ScopeFilter;

/// Pagination settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on a single page fetch in milliseconds; 0 disables
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

impl HistoryConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: default_page_size(), fetch_timeout_ms: default_fetch_timeout_ms() }
    }
}

/// Who the conversation log belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Authenticated principal; wins over the device when present
    #[serde(default)]
    pub principal_id: Option<String>,

    /// Anonymous device identifier
    #[serde(default)]
    pub device_id: Option<String>,
}

impl IdentityConfig {
    /// Resolve to exactly one scope, principal first
    pub fn scope_filter(&self) -> Result<ScopeFilter> {
        let principal = self.principal_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let device = self.device_id.as_deref().map(str::trim).filter(|id| !id.is_empty());

        match (principal, device) {
            (Some(principal), _) => Ok(ScopeFilter::Principal(principal.to_string())),
            (None, Some(device)) => Ok(ScopeFilter::Device(device.to_string())),
            (None, None) => Err(crate::Error::Config(ConfigError::MissingIdentity.to_string())),
        }
    }
}

/// Local history database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file (absolute path)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".murmur").join("history.db"))
        .unwrap_or_else(|_| std::env::temp_dir().join("murmur").join("history.db"))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// `[logging.file]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_file_level")]
    pub level: String,
}

fn default_file_level() -> String {
    "debug".to_string()
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: default_file_level() }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// pretty | json | compact
    #[serde(default = "default_format")]
    pub format: String,

    /// Include message text in log events
    #[serde(default)]
    pub log_message_content: bool,

    #[serde(default = "default_truncate_length")]
    pub truncate_length: usize,

    #[serde(default)]
    pub file: FileLoggingConfig,
}

fn default_level() -> String {
    "warn".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

fn default_truncate_length() -> usize {
    200
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            log_message_content: false,
            truncate_length: default_truncate_length(),
            file: FileLoggingConfig::default(),
        }
    }
}

/// Root configuration structure for murmur.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| crate::Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        use crate::Error;

        if self.history.page_size == 0 {
            return Err(Error::Config(ConfigError::InvalidPageSize.to_string()));
        }

        for (field, value) in [("principal_id", &self.identity.principal_id), ("device_id", &self.identity.device_id)] {
            if let Some(id) = value
                && id.trim().is_empty()
            {
                return Err(Error::Config(ConfigError::BlankIdentity(field.to_string()).to_string()));
            }
        }

        if !self.store.path.is_absolute() {
            return Err(Error::Config(
                ConfigError::AbsolutePathRequired(self.store.path.display().to_string()).to_string(),
            ));
        }

        if crate::logging::LogFormat::parse_str(&self.logging.format).is_none() {
            return Err(Error::Config(ConfigError::InvalidLogFormat(self.logging.format.clone()).to_string()));
        }

        Ok(())
    }

    /// Identity scope for history queries
    pub fn scope_filter(&self) -> Result<ScopeFilter> {
        self.identity.scope_filter()
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Murmur Configuration Example
# Copy this file to murmur.toml and customize as needed

[history]
# Records requested per scroll-back page
page_size = 15
# Abandon a page fetch after this many milliseconds (0 waits forever)
fetch_timeout_ms = 30000

[identity]
# Authenticated user; takes precedence over device_id when set
# principal_id = "user-123"
# Anonymous device identifier
device_id = "device-local"

[store]
# SQLite history database (must be an absolute path)
path = "/tmp/murmur/history.db"

[logging]
# Default level for stderr: trace, debug, info, warn, error
level = "warn"
# Output format: "pretty", "json", or "compact"
format = "pretty"
# Include message text in log events (otherwise only lengths are logged)
log_message_content = false
truncate_length = 200

[logging.file]
# Daily rolling JSON logs under ~/.murmur/logs
enabled = false
level = "debug"
"#
    }
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Zero-sized pages would never advance
    #[error("history.page_size must be greater than zero")]
    InvalidPageSize,

    /// Neither principal nor device configured
    #[error("identity requires principal_id or device_id")]
    MissingIdentity,

    /// Identity present but blank
    #[error("identity.{0} must not be blank")]
    BlankIdentity(String),

    /// Unknown log format
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    /// Absolute path required
    #[error("absolute path required: {0}")]
    AbsolutePathRequired(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}
