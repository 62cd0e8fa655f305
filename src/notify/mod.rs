//! Desktop notifications for newly seen entries.
//!
//! [`NotificationDispatcher`] decides what to show for a batch of new
//! entries (one notification each, or a single summary when there are too
//! many) and dismisses each batch together once its expiry delay passes.
//! Rendering is behind the [`Notifier`] trait and opening a permalink is
//! behind [`UrlOpener`], so the daemon can log notifications while tests
//! record them.

mod dispatcher;

pub use dispatcher::{DispatchSettings, NotificationDispatcher};

use thiserror::Error;

use crate::sync::TextDirection;
use crate::util::{validate_url_for_open, UrlValidationError};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notification backend refused to show a notification
    #[error("Notification backend failed: {0}")]
    Backend(String),
    /// The permalink is not something we are willing to open
    #[error("Refusing to open permalink: {0}")]
    UnsafeUrl(#[from] UrlValidationError),
    /// The system opener failed
    #[error("Failed to open URL: {0}")]
    Open(#[from] std::io::Error),
}

/// One visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A single new entry; clicking it opens `permalink`.
    Entry {
        id: String,
        title: String,
        title_direction: TextDirection,
        permalink: String,
    },
    /// Too many new entries to list; `count_label` is a number or `many`.
    Summary { count_label: String },
}

impl Notification {
    pub fn heading(&self) -> &'static str {
        match self {
            Notification::Entry { .. } => "New entry",
            Notification::Summary { .. } => "New entries",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::Entry { title, .. } => title.clone(),
            Notification::Summary { count_label } => {
                format!("You have {count_label} new entries")
            }
        }
    }
}

/// Renders notifications. `key` identifies a notification until it is
/// dismissed.
pub trait Notifier: Send + Sync {
    fn show(&self, key: &str, notification: &Notification) -> Result<(), NotifyError>;
    fn dismiss(&self, key: &str);
}

/// Notifier that writes notifications to the log. Used by the daemon when
/// no desktop backend is wired in.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, key: &str, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            key = %key,
            heading = notification.heading(),
            message = %notification.message(),
            "Notification"
        );
        Ok(())
    }

    fn dismiss(&self, key: &str) {
        tracing::debug!(key = %key, "Notification dismissed");
    }
}

/// Opens a permalink for the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), NotifyError>;
}

/// Opens URLs with the platform's default handler.
#[derive(Debug, Default)]
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<(), NotifyError> {
        // Validate before open::that() so entry data cannot launch other handlers
        let url = validate_url_for_open(url)?;
        open::that(url.as_str())?;
        Ok(())
    }
}
