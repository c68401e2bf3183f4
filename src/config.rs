//! Configuration file parser for ~/.config/tumbleweed/config.toml.
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted by serde and reported with a warning so typos
//! do not go unnoticed.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// Every field has a default, so any subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Update title, link, description and icon of an existing feed on
    /// every ingestion. Off by default: metadata is captured once.
    pub refresh_metadata: bool,

    /// Maximum number of feeds ingested at once during OPML import.
    pub import_concurrency: usize,

    /// HTTP transport settings.
    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_metadata: false,
            import_concurrency: 10,
            fetch: FetchConfig::default(),
        }
    }
}

/// The `[fetch]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout, covering connect and response headers.
    pub timeout_secs: u64,

    /// Retries after a 429, a 5xx, or a truncated body.
    pub max_retries: u32,

    /// Backoff before retry `n` is `retry_base_delay_ms * 2^n`.
    pub retry_base_delay_ms: u64,

    /// Response bodies larger than this are rejected.
    pub max_feed_size: usize,

    /// Redirect hops followed before giving up.
    pub max_redirects: usize,

    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_feed_size: 10 * 1024 * 1024,
            max_redirects: 3,
            user_agent: format!("tumbleweed/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] =
        &["refresh_metadata", "import_concurrency", "fetch"];

    const KNOWN_FETCH_KEYS: &'static [&'static str] = &[
        "timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_size",
        "max_redirects",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            refresh_metadata = config.refresh_metadata,
            import_concurrency = config.import_concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, Self::KNOWN_KEYS, "");
            if let Some(toml::Value::Table(fetch)) = raw.get("fetch") {
                warn_unknown_keys(fetch, Self::KNOWN_FETCH_KEYS, "fetch.");
            }
        }

        let mut config: Config = toml::from_str(content)?;
        if config.import_concurrency == 0 {
            tracing::warn!("import_concurrency = 0 is invalid, using 1");
            config.import_concurrency = 1;
        }
        Ok(config)
    }
}

fn warn_unknown_keys(table: &toml::Table, known: &[&str], prefix: &str) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(key = %format!("{}{}", prefix, key), "Unknown key in config file, ignoring");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
