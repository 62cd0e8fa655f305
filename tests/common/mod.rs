//! Scripted upstream, in-memory watermark store and recording notifier
//! shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use feedwatch::notify::{Notification, NotificationDispatcher, Notifier, NotifyError, UrlOpener};
use feedwatch::preferences::Options;
use feedwatch::storage::{Database, WatermarkStore};
use feedwatch::sync::{SyncContext, SyncEngine};
use feedwatch::upstream::{
    Alternate, Authorized, Origin, RawItem, UnreadCount, UpstreamClient, UpstreamError,
};

// ============================================================================
// Scripted upstream
// ============================================================================

/// Upstream whose replies are set by the test.
///
/// With a gate installed, `unread_entries` blocks until the test releases
/// it, which keeps a sync in flight for as long as the test needs.
#[derive(Default)]
pub struct MockUpstream {
    counts: Mutex<Option<Authorized<Vec<UnreadCount>>>>,
    entries: Mutex<Option<Authorized<Vec<RawItem>>>>,
    mark_reply: Mutex<Option<Authorized<()>>>,
    fail_entries: Mutex<bool>,
    fail_mark: Mutex<bool>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    requested_categories: Mutex<Vec<String>>,
    marked: Mutex<Vec<Vec<String>>>,
    credentials: Mutex<Vec<Option<String>>>,
    page_sizes: Mutex<Vec<usize>>,
    counts_calls: AtomicUsize,
    entries_calls: AtomicUsize,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_counts(&self, counts: &[(&str, i64)]) {
        let counts = counts
            .iter()
            .map(|(id, count)| UnreadCount::new(*id, *count))
            .collect();
        *self.counts.lock().unwrap() = Some(Authorized::Granted(counts));
    }

    pub fn set_entries(&self, items: Vec<RawItem>) {
        *self.entries.lock().unwrap() = Some(Authorized::Granted(items));
    }

    /// Every endpoint answers "authorization required" from now on.
    pub fn expire_session(&self) {
        *self.counts.lock().unwrap() = Some(Authorized::Required);
        *self.entries.lock().unwrap() = Some(Authorized::Required);
        *self.mark_reply.lock().unwrap() = Some(Authorized::Required);
    }

    /// Only the entries endpoint answers "authorization required".
    pub fn expire_session_on_entries(&self) {
        *self.entries.lock().unwrap() = Some(Authorized::Required);
    }

    pub fn fail_entries(&self, fail: bool) {
        *self.fail_entries.lock().unwrap() = fail;
    }

    pub fn fail_mark(&self, fail: bool) {
        *self.fail_mark.lock().unwrap() = fail;
    }

    /// Block entry fetches until permits are added to the returned gate.
    pub fn install_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn counts_calls(&self) -> usize {
        self.counts_calls.load(Ordering::SeqCst)
    }

    pub fn entries_calls(&self) -> usize {
        self.entries_calls.load(Ordering::SeqCst)
    }

    pub fn requested_categories(&self) -> Vec<String> {
        self.requested_categories.lock().unwrap().clone()
    }

    pub fn marked(&self) -> Vec<Vec<String>> {
        self.marked.lock().unwrap().clone()
    }

    pub fn credentials(&self) -> Vec<Option<String>> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn page_sizes(&self) -> Vec<usize> {
        self.page_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn unread_counts(&self) -> Result<Authorized<Vec<UnreadCount>>, UpstreamError> {
        self.counts_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .counts
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Authorized::Granted(Vec::new())))
    }

    async fn unread_entries(
        &self,
        category_id: &str,
    ) -> Result<Authorized<Vec<RawItem>>, UpstreamError> {
        self.entries_calls.fetch_add(1, Ordering::SeqCst);
        self.requested_categories
            .lock()
            .unwrap()
            .push(category_id.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        if *self.fail_entries.lock().unwrap() {
            return Err(UpstreamError::HttpStatus(503));
        }
        let reply = self
            .entries
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Authorized::Granted(Vec::new()));
        // Once a page size is pushed, serve at most that many items.
        let limit = self.page_sizes.lock().unwrap().last().copied();
        Ok(reply.map(|mut items| {
            if let Some(limit) = limit {
                items.truncate(limit);
            }
            items
        }))
    }

    async fn mark_entries_read(&self, ids: &[String]) -> Result<Authorized<()>, UpstreamError> {
        if *self.fail_mark.lock().unwrap() {
            return Err(UpstreamError::Timeout);
        }
        let reply = self
            .mark_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Authorized::Granted(()));
        if reply.is_granted() {
            self.marked.lock().unwrap().push(ids.to_vec());
        }
        Ok(reply)
    }

    fn set_credential(&self, token: Option<String>) {
        self.credentials.lock().unwrap().push(token);
    }

    fn set_page_size(&self, page_size: usize) {
        self.page_sizes.lock().unwrap().push(page_size);
    }
}

// ============================================================================
// In-memory watermark store
// ============================================================================

/// Keeps the watermark in memory. Used where the tokio clock is paused,
/// since SQLite's worker thread lets a paused clock run ahead.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<i64>>,
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self) -> anyhow::Result<Option<i64>> {
        Ok(*self.value.lock().unwrap())
    }

    async fn advance(&self, candidate_ms: i64) -> anyhow::Result<i64> {
        let mut value = self.value.lock().unwrap();
        let next = value.map_or(candidate_ms, |current| current.max(candidate_ms));
        *value = Some(next);
        Ok(next)
    }
}

// ============================================================================
// Recording notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, Notification)>>,
    dismissed: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, Notification)> {
        self.shown.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> Vec<String> {
        self.dismissed.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, key: &str, notification: &Notification) -> Result<(), NotifyError> {
        self.shown
            .lock()
            .unwrap()
            .push((key.to_string(), notification.clone()));
        Ok(())
    }

    fn dismiss(&self, key: &str) {
        self.dismissed.lock().unwrap().push(key.to_string());
    }
}

impl UrlOpener for RecordingNotifier {
    fn open(&self, url: &str) -> Result<(), NotifyError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: SyncEngine,
    pub upstream: Arc<MockUpstream>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<dyn WatermarkStore>,
}

/// Options with a fixed credential, independent of the environment.
pub fn test_options() -> Options {
    Options {
        access_token: Some("test-token".to_string()),
        ..Options::default()
    }
}

fn build(store: Arc<dyn WatermarkStore>, options: Options) -> Harness {
    let upstream = MockUpstream::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = Arc::new(SyncContext::new(
        Arc::clone(&store),
        upstream.clone(),
        options,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifier.clone(),
        notifier.clone(),
    ));
    Harness {
        engine: SyncEngine::new(ctx, dispatcher),
        upstream,
        notifier,
        store,
    }
}

/// Engine backed by an in-memory SQLite database.
pub async fn harness(options: Options) -> Harness {
    let db = Database::open(":memory:").await.unwrap();
    build(Arc::new(db), options)
}

/// Engine backed by [`MemoryWatermarkStore`], for paused-clock tests.
pub fn memory_harness(options: Options) -> Harness {
    build(Arc::new(MemoryWatermarkStore::default()), options)
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn item(id: &str, crawled_ms: i64) -> RawItem {
    RawItem {
        id: Some(id.to_string()),
        title: Some(format!("Title {id}")),
        crawled: Some(crawled_ms),
        origin: Some(Origin {
            title: Some("Example Blog".to_string()),
            html_url: Some("https://blog.example.com/".to_string()),
        }),
        alternate: Some(vec![Alternate {
            href: Some(format!("https://blog.example.com/{id}")),
        }]),
        ..RawItem::default()
    }
}

/// `n` items with ids `e0..` and timestamps `base + i`.
pub fn items(n: usize, base_ms: i64) -> Vec<RawItem> {
    (0..n)
        .map(|i| item(&format!("e{i}"), base_ms + i as i64))
        .collect()
}
