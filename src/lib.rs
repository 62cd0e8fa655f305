//! Background poller for a feed-aggregation service.
//!
//! The [`scheduler`] periodically drives a [`sync::SyncEngine`], which
//! fetches the unread page from the [`upstream`] service, keeps an in-memory
//! unread cache, advances a durable watermark in [`storage`] and hands new
//! entries to the [`notify`] dispatcher.

pub mod config;
pub mod notify;
pub mod preferences;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod upstream;
pub mod util;
