use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Notification, Notifier, NotifyError, UrlOpener};
use crate::preferences::Options;
use crate::sync::Entry;
use crate::util::{notification_text, MAX_NOTIFICATION_TITLE_WIDTH};

/// Label shown instead of a number when the fetch hit the page limit and
/// the real count is unknown.
const MANY_LABEL: &str = "many";

/// Most notifications tracked at once. Past this, the oldest batches are
/// dismissed so that unclicked, non-expiring notifications stay bounded.
pub const MAX_LIVE_NOTIFICATIONS: usize = 50;

/// The subset of options that shapes a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub max_notifications: usize,
    pub page_size: usize,
    /// `None` keeps notifications until they are clicked.
    pub hide_after: Option<Duration>,
}

impl DispatchSettings {
    pub fn from_options(options: &Options) -> Self {
        let hide_after = match options.hide_notification_delay_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            max_notifications: options.max_notifications_count,
            page_size: options.page_size,
            hide_after,
        }
    }
}

struct Live {
    batch: u64,
    notification: Notification,
}

type LiveNotifications = Arc<Mutex<HashMap<String, Live>>>;

fn lock(live: &LiveNotifications) -> MutexGuard<'_, HashMap<String, Live>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turns batches of new entries into notifications and expires them.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    opener: Arc<dyn UrlOpener>,
    live: LiveNotifications,
    next_batch: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            notifier,
            opener,
            live: Arc::new(Mutex::new(HashMap::new())),
            next_batch: AtomicU64::new(0),
        }
    }

    /// Show notifications for `entries` and return the keys shown.
    ///
    /// More than `max_notifications` entries collapse into one summary.
    /// Everything shown by one call shares a single expiry timer, so the
    /// batch disappears together. Must be called inside a tokio runtime
    /// when `hide_after` is set.
    pub fn dispatch(&self, entries: &[Entry], settings: &DispatchSettings) -> Vec<String> {
        if entries.is_empty() {
            return Vec::new();
        }
        let batch = self.next_batch.fetch_add(1, Ordering::Relaxed);

        let pending: Vec<(String, Notification)> = if entries.len() > settings.max_notifications {
            let count_label = if entries.len() == settings.page_size {
                MANY_LABEL.to_string()
            } else {
                entries.len().to_string()
            };
            vec![(
                format!("summary-{batch}"),
                Notification::Summary { count_label },
            )]
        } else {
            entries
                .iter()
                .map(|entry| {
                    let notification = Notification::Entry {
                        id: entry.id.clone(),
                        title: notification_text(&entry.title, MAX_NOTIFICATION_TITLE_WIDTH),
                        title_direction: entry.title_direction,
                        permalink: entry.permalink.clone(),
                    };
                    (entry.id.clone(), notification)
                })
                .collect()
        };

        let mut shown = Vec::with_capacity(pending.len());
        for (key, notification) in pending {
            if let Err(e) = self.notifier.show(&key, &notification) {
                tracing::warn!(key = %key, error = %e, "Failed to show notification");
                continue;
            }
            lock(&self.live).insert(key.clone(), Live { batch, notification });
            shown.push(key);
        }
        self.evict_oldest(batch);
        tracing::debug!(batch, shown = shown.len(), new = entries.len(), "Dispatched notifications");

        if let Some(delay) = settings.hide_after {
            if !shown.is_empty() {
                self.schedule_expiry(batch, shown.clone(), delay);
            }
        }
        shown
    }

    /// Dismiss whole batches, oldest first, until the live set fits under
    /// [`MAX_LIVE_NOTIFICATIONS`]. The batch just shown is never evicted.
    fn evict_oldest(&self, current: u64) {
        let evicted: Vec<String> = {
            let mut live = lock(&self.live);
            let mut evicted = Vec::new();
            while live.len() > MAX_LIVE_NOTIFICATIONS {
                let Some(oldest) = live.values().map(|l| l.batch).min() else {
                    break;
                };
                if oldest == current {
                    break;
                }
                live.retain(|key, l| {
                    if l.batch == oldest {
                        evicted.push(key.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            evicted
        };
        for key in &evicted {
            self.notifier.dismiss(key);
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Oldest notifications dismissed");
        }
    }

    fn schedule_expiry(&self, batch: u64, keys: Vec<String>, delay: Duration) {
        let notifier = Arc::clone(&self.notifier);
        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clicked or evicted notifications are already gone, and a key
            // shown again by a later batch belongs to that batch's timer.
            let expired: Vec<String> = {
                let mut live = lock(&live);
                keys.into_iter()
                    .filter(|key| {
                        let current = live.get(key).is_some_and(|l| l.batch == batch);
                        if current {
                            live.remove(key);
                        }
                        current
                    })
                    .collect()
            };
            for key in &expired {
                notifier.dismiss(key);
            }
            tracing::debug!(expired = expired.len(), "Notification batch expired");
        });
    }

    /// Handle a click: dismiss the notification and open its permalink.
    ///
    /// Returns the entry id for entry notifications so the caller can mark
    /// it read. Summaries and unknown keys yield `Ok(None)`.
    pub fn clicked(&self, key: &str) -> Result<Option<String>, NotifyError> {
        let Some(Live { notification, .. }) = lock(&self.live).remove(key) else {
            return Ok(None);
        };
        self.notifier.dismiss(key);

        match notification {
            Notification::Entry { id, permalink, .. } => {
                self.opener.open(&permalink)?;
                Ok(Some(id))
            }
            Notification::Summary { .. } => Ok(None),
        }
    }

    /// Keys of notifications currently on screen.
    pub fn live_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.live).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TextDirection;

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<(String, Notification)>>,
        dismissed: Mutex<Vec<String>>,
        opened: Mutex<Vec<String>>,
    }

    impl Notifier for Recorder {
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

    impl UrlOpener for Recorder {
        fn open(&self, url: &str) -> Result<(), NotifyError> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn dispatcher() -> (NotificationDispatcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone(), recorder.clone());
        (dispatcher, recorder)
    }

    fn entries(n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| Entry {
                id: format!("e{i}"),
                published_at: None,
                title: format!("Title\n{i}"),
                title_direction: TextDirection::Ltr,
                body: String::new(),
                body_direction: TextDirection::Ltr,
                source_name: String::new(),
                source_url: "#".to_string(),
                permalink: format!("https://example.com/{i}"),
            })
            .collect()
    }

    fn settings(max: usize, hide_after: Option<Duration>) -> DispatchSettings {
        DispatchSettings {
            max_notifications: max,
            page_size: 20,
            hide_after,
        }
    }

    #[tokio::test]
    async fn test_small_batch_one_notification_each() {
        let (dispatcher, recorder) = dispatcher();
        let keys = dispatcher.dispatch(&entries(3), &settings(5, None));
        assert_eq!(keys, vec!["e0", "e1", "e2"]);

        let shown = recorder.shown.lock().unwrap();
        assert_eq!(shown.len(), 3);
        match &shown[1].1 {
            Notification::Entry { title, permalink, .. } => {
                assert_eq!(title, "Title 1");
                assert_eq!(permalink, "https://example.com/1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_batch_is_aggregated() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher.dispatch(&entries(25), &settings(5, None));

        let shown = recorder.shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(
            shown[0].1,
            Notification::Summary {
                count_label: "25".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_full_page_reads_many() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher.dispatch(&entries(20), &settings(5, None));
        assert_eq!(
            recorder.shown.lock().unwrap()[0].1,
            Notification::Summary {
                count_label: "many".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exactly_max_is_not_aggregated() {
        let (dispatcher, _) = dispatcher();
        let keys = dispatcher.dispatch(&entries(5), &settings(5, None));
        assert_eq!(keys.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_expires_together() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher.dispatch(&entries(3), &settings(5, Some(Duration::from_secs(60))));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(recorder.dismissed.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut dismissed = recorder.dismissed.lock().unwrap().clone();
        dismissed.sort();
        assert_eq!(dismissed, vec!["e0", "e1", "e2"]);
        assert!(dispatcher.live_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_never_expires() {
        let (dispatcher, recorder) = dispatcher();
        let options = Options {
            hide_notification_delay_seconds: 0,
            ..Options::default()
        };
        dispatcher.dispatch(&entries(2), &DispatchSettings::from_options(&options));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(recorder.dismissed.lock().unwrap().is_empty());
        assert_eq!(dispatcher.live_keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_opens_and_is_not_dismissed_twice() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher.dispatch(&entries(2), &settings(5, Some(Duration::from_secs(10))));

        assert_eq!(dispatcher.clicked("e1").unwrap(), Some("e1".to_string()));
        assert_eq!(
            *recorder.opened.lock().unwrap(),
            vec!["https://example.com/1".to_string()]
        );
        assert_eq!(dispatcher.clicked("e1").unwrap(), None);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(*recorder.dismissed.lock().unwrap(), vec!["e1", "e0"]);
    }

    fn batch(round: usize, n: usize) -> Vec<Entry> {
        entries(n)
            .into_iter()
            .map(|mut entry| {
                entry.id = format!("r{round}-{}", entry.id);
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn test_non_expiring_notifications_stay_bounded() {
        let (dispatcher, recorder) = dispatcher();
        for round in 0..200 {
            dispatcher.dispatch(&batch(round, 3), &settings(5, None));
        }

        let live = dispatcher.live_keys();
        assert!(live.len() <= MAX_LIVE_NOTIFICATIONS);
        assert!(live.contains(&"r199-e2".to_string()));
        assert!(!live.contains(&"r0-e0".to_string()));
        assert_eq!(
            recorder.dismissed.lock().unwrap().len() + live.len(),
            600
        );
    }

    #[tokio::test]
    async fn test_eviction_drops_whole_batches() {
        let (dispatcher, recorder) = dispatcher();
        for round in 0..17 {
            dispatcher.dispatch(&batch(round, 3), &settings(5, None));
        }

        // 51 live after the last batch: round 0 goes as a unit.
        assert_eq!(dispatcher.live_keys().len(), 48);
        let mut dismissed = recorder.dismissed.lock().unwrap().clone();
        dismissed.sort();
        assert_eq!(dismissed, vec!["r0-e0", "r0-e1", "r0-e2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshown_key_follows_newest_timer() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher.dispatch(&entries(1), &settings(5, Some(Duration::from_secs(10))));
        tokio::time::sleep(Duration::from_secs(5)).await;
        dispatcher.dispatch(&entries(1), &settings(5, Some(Duration::from_secs(10))));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(recorder.dismissed.lock().unwrap().is_empty());
        assert_eq!(dispatcher.live_keys(), vec!["e0"]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*recorder.dismissed.lock().unwrap(), vec!["e0"]);
    }
}
