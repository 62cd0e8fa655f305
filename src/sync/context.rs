use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;

use super::cache::UnreadCache;
use crate::preferences::Options;
use crate::storage::WatermarkStore;
use crate::upstream::UpstreamClient;

/// Session as last observed by a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    /// Count of the category with the most unread entries.
    pub unread_count: i64,
    pub active_category_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BadgeIcon {
    Active,
    #[default]
    Inactive,
}

/// What a host surface shows: an unread counter and an icon state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeView {
    pub count: i64,
    pub icon: BadgeIcon,
}

impl BadgeView {
    /// Counter text; empty when there is nothing unread.
    pub fn text(&self) -> String {
        if self.count > 0 {
            self.count.to_string()
        } else {
            String::new()
        }
    }
}

/// How an options swap relates to the previous options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsChange {
    Unchanged,
    /// Re-read is enough.
    Minor,
    /// Credential must be re-derived and the scheduler rescheduled.
    Critical,
}

/// Process-wide state shared by the sync engine, scheduler and dispatcher.
///
/// Constructed once at startup and handed around behind an `Arc`. Every
/// mutation goes through a method here; nothing is reachable as a global.
pub struct SyncContext {
    store: Arc<dyn WatermarkStore>,
    upstream: Arc<dyn UpstreamClient>,
    options: RwLock<Arc<Options>>,
    cache: UnreadCache,
    session: watch::Sender<SessionState>,
    badge: watch::Sender<BadgeView>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn WatermarkStore>,
        upstream: Arc<dyn UpstreamClient>,
        options: Options,
    ) -> Self {
        let (session, _) = watch::channel(SessionState::default());
        let (badge, _) = watch::channel(BadgeView::default());
        Self {
            store,
            upstream,
            options: RwLock::new(Arc::new(options)),
            cache: UnreadCache::new(),
            session,
            badge,
        }
    }

    pub fn watermark_store(&self) -> &dyn WatermarkStore {
        self.store.as_ref()
    }

    pub fn upstream(&self) -> &dyn UpstreamClient {
        self.upstream.as_ref()
    }

    pub fn cache(&self) -> &UnreadCache {
        &self.cache
    }

    /// Current options. The returned `Arc` stays valid across a swap.
    pub fn options(&self) -> Arc<Options> {
        Arc::clone(&self.options.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in new options and report what kind of change it was.
    ///
    /// A critical change also pushes the new credential and page size to
    /// the upstream client; rescheduling is left to the owner of the
    /// scheduler. The API base URL is fixed when the client is built.
    pub fn replace_options(&self, next: Options) -> OptionsChange {
        let previous = {
            let mut slot = self.options.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, Arc::new(next.clone()))
        };

        if previous.api_base_url != next.api_base_url {
            tracing::warn!(
                api_base_url = %next.api_base_url,
                "api_base_url changes take effect on restart"
            );
        }

        if *previous == next {
            OptionsChange::Unchanged
        } else if previous.is_critical_change(&next) {
            if previous.access_token != next.access_token {
                self.upstream.set_credential(next.access_token.clone());
            }
            if previous.page_size != next.page_size {
                self.upstream.set_page_size(next.page_size);
            }
            tracing::info!("Critical option change applied");
            OptionsChange::Critical
        } else {
            tracing::debug!("Options updated");
            OptionsChange::Minor
        }
    }

    pub fn session(&self) -> SessionState {
        self.session.borrow().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn badge(&self) -> BadgeView {
        self.badge.borrow().clone()
    }

    pub fn subscribe_badge(&self) -> watch::Receiver<BadgeView> {
        self.badge.subscribe()
    }

    /// Record a successful unread-count query.
    pub(crate) fn set_authenticated(&self, unread_count: i64, active_category_id: String) {
        self.session.send_replace(SessionState {
            is_authenticated: true,
            unread_count,
            active_category_id,
        });
        self.badge.send_replace(BadgeView {
            count: unread_count,
            icon: BadgeIcon::Active,
        });
    }

    /// The session expired: drop the cache and show the inactive surface.
    pub(crate) fn set_unauthenticated(&self) {
        self.cache.clear();
        self.session.send_replace(SessionState::default());
        self.badge.send_replace(BadgeView::default());
    }

    /// Lower the badge counter after a confirmed mark-read. Never goes
    /// below zero and never moves a counter that is already empty.
    pub(crate) fn decrement_badge(&self, by: usize) {
        let by = i64::try_from(by).unwrap_or(i64::MAX);
        self.badge.send_if_modified(|badge| {
            if badge.count <= 0 {
                return false;
            }
            badge.count = badge.count.saturating_sub(by).max(0);
            true
        });
    }
}
