//! Preference manager that merges config.toml defaults with DB overrides.
//!
//! Config values serve as defaults; DB values (user_preferences table) override them.
//! Writes always go to the DB, never to the config file.
use anyhow::Result;
use thiserror::Error;

use crate::config::Config;
use crate::storage::Database;

/// Keys that may be overridden through the preference table.
///
/// The access token is deliberately absent: credentials never enter the
/// unencrypted preference table.
pub const OVERRIDABLE_KEYS: [&str; 7] = [
    "update_interval_minutes",
    "mark_read_on_click",
    "show_desktop_notifications",
    "hide_notification_delay_seconds",
    "show_full_content",
    "max_notifications_count",
    "page_size",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("Unknown or read-only option: {0}")]
    UnknownKey(String),
    #[error("Invalid value {value:?} for option {key}")]
    InvalidValue { key: String, value: String },
}

// ============================================================================
// Options
// ============================================================================

/// Effective runtime options after merging config file, env and DB overrides.
#[derive(Clone, PartialEq, Eq)]
pub struct Options {
    pub update_interval_minutes: u64,
    pub mark_read_on_click: bool,
    pub show_desktop_notifications: bool,
    pub hide_notification_delay_seconds: u64,
    pub show_full_content: bool,
    pub max_notifications_count: usize,
    pub access_token: Option<String>,
    pub api_base_url: String,
    pub page_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
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

impl Options {
    /// Options straight from the config file (and the token env var).
    pub fn from_config(config: &Config) -> Self {
        Self {
            update_interval_minutes: config.update_interval_minutes,
            mark_read_on_click: config.mark_read_on_click,
            show_desktop_notifications: config.show_desktop_notifications,
            hide_notification_delay_seconds: config.hide_notification_delay_seconds,
            show_full_content: config.show_full_content,
            max_notifications_count: config.max_notifications_count,
            access_token: config.resolve_access_token(),
            api_base_url: config.api_base_url.clone(),
            page_size: config.page_size,
        }
    }

    /// True when moving from `self` to `next` requires re-initialization.
    ///
    /// `page_size` counts as critical: the client must fetch the same page
    /// the "many" label is computed against.
    pub fn is_critical_change(&self, next: &Options) -> bool {
        self.update_interval_minutes != next.update_interval_minutes
            || self.access_token != next.access_token
            || self.show_full_content != next.show_full_content
            || self.page_size != next.page_size
    }

    /// Apply a single `key = value` override.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let invalid = || PreferenceError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let value = value.trim();
        match key {
            "update_interval_minutes" => {
                self.update_interval_minutes = value.parse().map_err(|_| invalid())?
            }
            "mark_read_on_click" => self.mark_read_on_click = value.parse().map_err(|_| invalid())?,
            "show_desktop_notifications" => {
                self.show_desktop_notifications = value.parse().map_err(|_| invalid())?
            }
            "hide_notification_delay_seconds" => {
                self.hide_notification_delay_seconds = value.parse().map_err(|_| invalid())?
            }
            "show_full_content" => self.show_full_content = value.parse().map_err(|_| invalid())?,
            "max_notifications_count" => {
                self.max_notifications_count = value.parse().map_err(|_| invalid())?
            }
            "page_size" => {
                let size: usize = value.parse().map_err(|_| invalid())?;
                if size == 0 {
                    return Err(invalid());
                }
                self.page_size = size;
            }
            other => return Err(PreferenceError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

// ============================================================================
// PreferenceManager
// ============================================================================

/// Merged preference store: config.toml defaults + DB overrides.
pub struct PreferenceManager {
    options: Options,
}

impl PreferenceManager {
    /// Load options by layering DB overrides on top of the config file.
    ///
    /// Rows with an unknown key or an unparsable value are skipped with a
    /// warning so a bad override never prevents startup.
    pub async fn load(config: &Config, db: &Database) -> Result<Self> {
        let mut options = Options::from_config(config);

        for (key, value) in db.get_all_preferences().await? {
            if let Err(e) = options.apply_override(&key, &value) {
                tracing::warn!(key = %key, error = %e, "Ignoring stored preference");
            }
        }

        Ok(Self { options })
    }

    /// Create from config only (no DB). Fallback for when DB load fails.
    pub fn from_config(config: &Config) -> Self {
        Self {
            options: Options::from_config(config),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn into_options(self) -> Options {
        self.options
    }

    /// Validate and persist an override, updating the in-memory options.
    pub async fn set(&mut self, db: &Database, key: &str, value: &str) -> Result<()> {
        let mut next = self.options.clone();
        next.apply_override(key, value)?;
        db.set_preference(key, value.trim()).await?;
        self.options = next;
        Ok(())
    }

    /// Drop a stored override so the config file value applies again.
    ///
    /// Returns whether an override existed.
    pub async fn unset(&mut self, config: &Config, db: &Database, key: &str) -> Result<bool> {
        if !OVERRIDABLE_KEYS.contains(&key) {
            return Err(PreferenceError::UnknownKey(key.to_string()).into());
        }
        let removed = db.delete_preference(key).await?;
        *self = Self::load(config, db).await?;
        Ok(removed)
    }
}

// ============================================================================
// Tests
// ============================================================================
