//! Configuration file parser for ~/.config/feedwatch/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Display settings (truncation lengths, batch size) are not configured here;
//! they live in the state document under `settings`.
use serde::Deserialize;
use std::path::{Path, PathBuf};
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

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the JSON state document. Defaults to `data.json` in
    /// the config directory.
    pub data_file: Option<PathBuf>,

    /// Whole-request timeout for one feed download, in seconds.
    pub request_timeout_secs: u64,

    /// Feed bodies larger than this are rejected.
    pub max_feed_bytes: usize,

    /// User-Agent header sent with every feed request.
    pub user_agent: String,

    /// Subscriber identity used by CLI commands without `--subscriber`.
    pub default_subscriber: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: None,
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            user_agent: concat!("feedwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            default_subscriber: "local".to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "data_file",
                "request_timeout_secs",
                "max_feed_bytes",
                "user_agent",
                "default_subscriber",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            timeout_secs = config.request_timeout_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Path of the state document, resolving the default against `config_dir`.
    pub fn data_path(&self, config_dir: &Path) -> PathBuf {
        self.data_file
            .clone()
            .unwrap_or_else(|| config_dir.join("data.json"))
    }
}

// ============================================================================
// Tests
// ============================================================================
