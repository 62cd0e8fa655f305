use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use super::context::SyncContext;
use super::entry::{map_items, Entry};
use super::watermark::{filter_new, Watermark};
use crate::notify::{DispatchSettings, NotificationDispatcher, NotifyError};
use crate::upstream::{Authorized, UnreadCount, UpstreamError};

/// Errors that abort a sync or mark-read.
///
/// Cloneable so every caller joined onto one in-flight sync receives the
/// same outcome.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Upstream request failed: {0}")]
    Upstream(Arc<UpstreamError>),
    #[error("Storage error: {0}")]
    Storage(String),
    /// The sync task ended without producing a result (panic or runtime shutdown)
    #[error("Sync aborted: {0}")]
    Aborted(String),
}

impl From<UpstreamError> for SyncError {
    fn from(e: UpstreamError) -> Self {
        SyncError::Upstream(Arc::new(e))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Storage(format!("{e:#}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Update cache and watermark without showing notifications.
    pub silent: bool,
}

impl SyncOptions {
    pub const SILENT: SyncOptions = SyncOptions { silent: true };
    pub const NOTIFY: SyncOptions = SyncOptions { silent: false };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Synced {
        unread_count: i64,
        active_category_id: String,
        /// Entries newer than the watermark the sync started from.
        new_entries: Vec<Entry>,
    },
    /// The session expired; the cache was cleared and credentials are needed.
    Unauthenticated,
}

impl SyncResult {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SyncResult::Synced { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadResult {
    /// Upstream accepted the request; `removed` entries left the cache.
    Marked { removed: usize },
    /// Nothing changed locally; credentials are needed.
    Unauthenticated,
}

type SyncFuture = Shared<BoxFuture<'static, Result<SyncResult, SyncError>>>;
type InFlight = Arc<Mutex<Option<SyncFuture>>>;

fn lock(slot: &InFlight) -> MutexGuard<'_, Option<SyncFuture>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight slot when the sync task finishes, even by panic.
struct InFlightGuard(InFlight);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.0).take();
    }
}

/// Pick the category with the most unread entries. Ties keep the first one
/// reported.
pub fn select_active_category(counts: &[UnreadCount]) -> Option<&UnreadCount> {
    let mut best: Option<&UnreadCount> = None;
    for count in counts {
        if best.is_none_or(|b| count.count > b.count) {
            best = Some(count);
        }
    }
    best
}

/// Incremental synchronization against the upstream service.
///
/// Cheap to clone; clones share the context, dispatcher and the in-flight
/// sync slot.
#[derive(Clone)]
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    dispatcher: Arc<NotificationDispatcher>,
    in_flight: InFlight,
}

impl SyncEngine {
    pub fn new(ctx: Arc<SyncContext>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            ctx,
            dispatcher,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Run a sync, or join the one already in flight.
    ///
    /// The sync itself runs on its own task: dropping this future (or
    /// stopping the scheduler that awaited it) never cancels it, and its
    /// result is still applied. A caller that joins an in-flight sync gets
    /// that sync's result, including its `silent` choice.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult, SyncError> {
        let shared = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("Sync already in flight, joining it");
                    running.clone()
                }
                None => {
                    let engine = self.clone();
                    let guard = InFlightGuard(Arc::clone(&self.in_flight));
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        engine.run_sync(options).await
                    });
                    let shared = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(SyncError::Aborted(e.to_string())),
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    async fn run_sync(&self, options: SyncOptions) -> Result<SyncResult, SyncError> {
        let opts = self.ctx.options();
        tracing::debug!(silent = options.silent, "Sync started");

        let counts = match self.ctx.upstream().unread_counts().await? {
            Authorized::Granted(counts) => counts,
            Authorized::Required => return Ok(self.unauthenticated()),
        };

        let Some(active) = select_active_category(&counts) else {
            tracing::info!("No categories reported, nothing unread");
            self.ctx.set_authenticated(0, String::new());
            self.ctx.cache().replace(Vec::new());
            return Ok(SyncResult::Synced {
                unread_count: 0,
                active_category_id: String::new(),
                new_entries: Vec::new(),
            });
        };
        let unread_count = active.count;
        let active_category_id = active.category_id.clone();
        self.ctx
            .set_authenticated(unread_count, active_category_id.clone());

        let items = match self
            .ctx
            .upstream()
            .unread_entries(&active_category_id)
            .await?
        {
            Authorized::Granted(items) => items,
            Authorized::Required => return Ok(self.unauthenticated()),
        };

        let entries = map_items(items, opts.show_full_content);
        let watermark = Watermark::from_stored(self.ctx.watermark_store().load().await?);
        let diff = filter_new(&entries, watermark);

        // Reads of the fetched page are done; now publish cache and watermark.
        self.ctx.cache().replace(entries);
        let stored = if diff.max_seen.is_beginning() {
            // First sync with an empty page: nothing to record yet.
            None
        } else {
            Some(
                self.ctx
                    .watermark_store()
                    .advance(diff.max_seen.as_millis())
                    .await?,
            )
        };

        tracing::info!(
            category = %active_category_id,
            unread = unread_count,
            new = diff.entries.len(),
            watermark = ?stored,
            "Sync complete"
        );

        if !options.silent && opts.show_desktop_notifications {
            self.dispatcher
                .dispatch(&diff.entries, &DispatchSettings::from_options(&opts));
        }

        Ok(SyncResult::Synced {
            unread_count,
            active_category_id,
            new_entries: diff.entries,
        })
    }

    fn unauthenticated(&self) -> SyncResult {
        tracing::warn!("Upstream session requires authentication");
        self.ctx.set_unauthenticated();
        SyncResult::Unauthenticated
    }

    /// Mark `ids` read upstream, then drop them from the cache and lower
    /// the badge by `ids.len()`.
    ///
    /// The upstream request is issued once. If it fails or reports an
    /// expired session, cache and badge are left as they were.
    pub async fn mark_as_read(&self, ids: &HashSet<String>) -> Result<MarkReadResult, SyncError> {
        if ids.is_empty() {
            return Ok(MarkReadResult::Marked { removed: 0 });
        }
        let mut request: Vec<String> = ids.iter().cloned().collect();
        request.sort();

        match self.ctx.upstream().mark_entries_read(&request).await? {
            Authorized::Granted(()) => {
                let removed = self.ctx.cache().remove(ids);
                self.ctx.decrement_badge(ids.len());
                tracing::debug!(requested = ids.len(), removed, "Entries marked read");
                Ok(MarkReadResult::Marked { removed })
            }
            Authorized::Required => {
                tracing::warn!("Mark-read rejected: authentication required");
                Ok(MarkReadResult::Unauthenticated)
            }
        }
    }

    /// Cached unread entries. Runs a silent sync first when the cache is
    /// empty or `force` is set.
    ///
    /// An expired session yields an empty list, since the sync clears the
    /// cache.
    pub async fn entries(&self, force: bool) -> Result<Vec<Entry>, SyncError> {
        if force || self.ctx.cache().is_empty() {
            self.sync(SyncOptions::SILENT).await?;
        }
        Ok(self.ctx.cache().snapshot())
    }

    /// A notification was clicked: dismiss it, open its permalink and, if
    /// enabled, mark its entry read.
    pub async fn notification_clicked(
        &self,
        key: &str,
    ) -> Result<Option<MarkReadResult>, NotifyError> {
        let Some(id) = self.dispatcher.clicked(key)? else {
            return Ok(None);
        };
        if !self.ctx.options().mark_read_on_click {
            return Ok(None);
        }

        let ids = HashSet::from([id]);
        match self.mark_as_read(&ids).await {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to mark clicked entry read");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, i64)]) -> Vec<UnreadCount> {
        pairs
            .iter()
            .map(|(id, count)| UnreadCount::new(*id, *count))
            .collect()
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let counts = counts(&[("global", 5), ("uncategorized", 5)]);
        assert_eq!(select_active_category(&counts).unwrap().category_id, "global");
    }

    #[test]
    fn test_max_count_wins() {
        let counts = counts(&[("a", 1), ("b", 9), ("c", 3), ("d", 9)]);
        assert_eq!(select_active_category(&counts).unwrap().category_id, "b");
    }

    #[test]
    fn test_no_categories() {
        assert!(select_active_category(&[]).is_none());
    }

    #[test]
    fn test_zero_counts_still_select_first() {
        let counts = counts(&[("global", 0), ("other", 0)]);
        assert_eq!(select_active_category(&counts).unwrap().category_id, "global");
    }

    #[test]
    fn test_sync_error_from_storage() {
        let err: SyncError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "Storage error: disk full");
    }
}
