//! Configuration file parser for ~/.config/feedwatch/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable that overrides `access_token` from the config file.
pub const ACCESS_TOKEN_ENV: &str = "FEEDWATCH_ACCESS_TOKEN";

/// Default API root of the aggregation service.
pub const DEFAULT_API_BASE_URL: &str = "https://cloud.feedly.com/v3";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
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
///
/// Custom Debug impl masks `access_token` so it never reaches logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling interval in minutes.
    pub update_interval_minutes: u64,

    /// Mark an entry read when its notification is clicked.
    pub mark_read_on_click: bool,

    /// Raise desktop notifications for new entries.
    pub show_desktop_notifications: bool,

    /// Seconds before a notification batch is dismissed. 0 = never.
    pub hide_notification_delay_seconds: u64,

    /// Prefer full entry content over the summary.
    pub show_full_content: bool,

    /// Above this many new entries a single aggregate notification is shown.
    pub max_notifications_count: usize,

    /// Access credential for the aggregation service.
    /// `FEEDWATCH_ACCESS_TOKEN` takes precedence over this field.
    pub access_token: Option<String>,

    /// API root, e.g. `https://cloud.feedly.com/v3`.
    pub api_base_url: String,

    /// Number of entries requested per stream fetch.
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_minutes: 2,
            mark_read_on_click: true,
            show_desktop_notifications: true,
            hide_notification_delay_seconds: 60,
            show_full_content: false,
            max_notifications_count: 5,
            access_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: 20,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("update_interval_minutes", &self.update_interval_minutes)
            .field("mark_read_on_click", &self.mark_read_on_click)
            .field("show_desktop_notifications", &self.show_desktop_notifications)
            .field(
                "hide_notification_delay_seconds",
                &self.hide_notification_delay_seconds,
            )
            .field("show_full_content", &self.show_full_content)
            .field("max_notifications_count", &self.max_notifications_count)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_base_url", &self.api_base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "update_interval_minutes",
        "mark_read_on_click",
        "show_desktop_notifications",
        "hide_notification_delay_seconds",
        "show_full_content",
        "max_notifications_count",
        "access_token",
        "api_base_url",
        "page_size",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
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
                // Deleted between metadata and read
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
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            interval_minutes = config.update_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Credential to use: the env var wins over the config file.
    pub fn resolve_access_token(&self) -> Option<String> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.access_token.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
