//! Incremental synchronization core.
//!
//! A sync asks the service for unread counts, fetches the unread page of
//! the busiest category, maps it into [`Entry`] values, replaces the
//! [`UnreadCache`] wholesale, advances the durable [`Watermark`] and hands
//! the strictly newer entries to the notification dispatcher.
//!
//! All shared state lives in one [`SyncContext`]; [`SyncEngine`] coalesces
//! concurrent sync requests into a single upstream round trip.

mod cache;
mod context;
mod engine;
mod entry;
mod watermark;

pub use cache::UnreadCache;
pub use context::{BadgeIcon, BadgeView, OptionsChange, SessionState, SyncContext};
pub use engine::{
    select_active_category, MarkReadResult, SyncEngine, SyncError, SyncOptions, SyncResult,
};
pub use entry::{map_items, Entry, TextDirection, PLACEHOLDER_SOURCE_URL};
pub use watermark::{filter_new, NewEntries, Watermark};
