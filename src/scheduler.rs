//! Periodic sync driver.
//!
//! [`Scheduler::start`] runs one sync right away and then arms a timer that
//! syncs every `interval` minutes. The timer disarms itself as soon as the
//! session is seen unauthenticated, whichever trigger ran the sync that
//! found out. Stopping only aborts the timer task; a sync it was awaiting
//! keeps running on its own task and still applies its result.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::sync::{SessionState, SyncEngine, SyncError, SyncOptions, SyncResult};

/// Shortest accepted polling interval.
pub const MIN_INTERVAL_MINUTES: u64 = 1;

/// Longest accepted polling interval (one week).
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running { interval_minutes: u64 },
}

struct Timer {
    interval_minutes: u64,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    engine: SyncEngine,
    timer: Mutex<Option<Timer>>,
}

impl Scheduler {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            timer: Mutex::new(None),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SchedulerState {
        match self.timer().as_ref() {
            Some(timer) if !timer.handle.is_finished() => SchedulerState::Running {
                interval_minutes: timer.interval_minutes,
            },
            _ => SchedulerState::Stopped,
        }
    }

    /// Cancel any existing timer, sync once, then poll every
    /// `interval_minutes`, clamped to [`MIN_INTERVAL_MINUTES`]..=[`MAX_INTERVAL_MINUTES`].
    ///
    /// The timer is not armed when the immediate sync reports an expired
    /// session. A failed sync still arms it so polling recovers on its own.
    pub async fn start(&self, interval_minutes: u64) -> Result<SyncResult, SyncError> {
        self.stop();
        let interval_minutes = clamp_interval(interval_minutes);

        let result = self.engine.sync(SyncOptions::NOTIFY).await;
        match &result {
            Ok(SyncResult::Unauthenticated) => {
                tracing::warn!("Not authenticated, polling not started");
            }
            Ok(SyncResult::Synced { .. }) => self.arm(interval_minutes),
            Err(e) => {
                tracing::warn!(error = %e, "Initial sync failed, polling anyway");
                self.arm(interval_minutes);
            }
        }
        result
    }

    /// Cancel the timer. An in-flight sync is left to finish.
    pub fn stop(&self) {
        if let Some(timer) = self.timer().take() {
            timer.handle.abort();
            tracing::info!("Scheduler stopped");
        }
    }

    pub async fn reschedule(&self, interval_minutes: u64) -> Result<SyncResult, SyncError> {
        self.stop();
        self.start(interval_minutes).await
    }

    fn arm(&self, interval_minutes: u64) {
        let period = Duration::from_secs(interval_minutes.saturating_mul(60));
        let session = self.engine.context().subscribe_session();
        let handle = tokio::spawn(poll(self.engine.clone(), period, session));

        // A concurrent start may have armed first; keep only the newest timer.
        if let Some(previous) = self.timer().replace(Timer {
            interval_minutes,
            handle,
        }) {
            previous.handle.abort();
        }
        tracing::info!(interval_minutes, "Scheduler running");
    }
}

fn clamp_interval(requested: u64) -> u64 {
    let clamped = requested.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES);
    if clamped != requested {
        tracing::warn!(
            requested,
            interval_minutes = clamped,
            "Polling interval out of range, clamped"
        );
    }
    clamped
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(engine: SyncEngine, period: Duration, mut session: watch::Receiver<SessionState>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.sync(SyncOptions::NOTIFY).await {
                    Ok(SyncResult::Unauthenticated) => break,
                    Ok(SyncResult::Synced { .. }) => {}
                    Err(e) => tracing::warn!(error = %e, "Scheduled sync failed"),
                }
            }
            changed = session.changed() => {
                if changed.is_err() || !session.borrow_and_update().is_authenticated {
                    break;
                }
            }
        }
    }
    tracing::info!("Session expired, polling stopped");
}
