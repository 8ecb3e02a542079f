//! Periodic snapshot fetching.
//!
//! A poller runs as its own task and publishes every result into a
//! `watch` channel. Consumers only ever see the latest state; a failed poll
//! keeps the previous snapshot and the next tick proceeds as usual.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiResult;
use crate::logging::LogThrottle;

/// How often a persisting poll failure is logged.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// What a poller has published so far.
#[derive(Debug)]
pub struct PollState<T> {
    /// Last successfully loaded snapshot.
    pub latest: Option<Arc<T>>,
    /// Error of the most recent poll, cleared by the next success.
    pub error: Option<String>,
    /// Number of successful loads.
    pub loads: u64,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            latest: None,
            error: None,
            loads: 0,
        }
    }
}

impl<T> Clone for PollState<T> {
    fn clone(&self) -> Self {
        Self {
            latest: self.latest.clone(),
            error: self.error.clone(),
            loads: self.loads,
        }
    }
}

/// Control handle of a running poller. Dropping it stops the poller.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    reload: Arc<Notify>,
    active: Arc<AtomicBool>,
}

impl PollerHandle {
    /// Fetch now, whether or not the timer is active.
    pub fn reload(&self) {
        self.reload.notify_one();
    }

    /// Enable or disable fetching on timer ticks.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a poller publishing into `tx`.
///
/// An active poller fetches immediately and then on every tick of
/// `interval`; an inactive one only fetches on [`PollerHandle::reload`].
pub fn spawn<T, F, Fut>(
    name: &'static str,
    interval: Duration,
    active: bool,
    tx: Arc<watch::Sender<PollState<T>>>,
    fetch: F,
) -> PollerHandle
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
{
    let handle = PollerHandle {
        cancel: CancellationToken::new(),
        reload: Arc::new(Notify::new()),
        active: Arc::new(AtomicBool::new(active)),
    };

    let cancel = handle.cancel.clone();
    let reload = handle.reload.clone();
    let active = handle.active.clone();

    tokio::spawn(async move {
        let throttle = LogThrottle::new(FAILURE_LOG_INTERVAL);
        let mut fetch_now = active.load(Ordering::Relaxed);
        debug!(poller = name, ?interval, "Poller started");

        loop {
            if fetch_now {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = fetch() => result,
                };
                match result {
                    Ok(value) => {
                        throttle.reset();
                        tx.send_modify(|state| {
                            state.latest = Some(Arc::new(value));
                            state.error = None;
                            state.loads += 1;
                        });
                    }
                    Err(e) => {
                        if throttle.should_log() {
                            warn!(poller = name, error = %e, "Poll failed");
                        }
                        tx.send_modify(|state| state.error = Some(e.to_string()));
                    }
                }
            }

            fetch_now = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = reload.notified() => true,
                _ = tokio::time::sleep(interval) => active.load(Ordering::Relaxed),
            };
        }

        debug!(poller = name, "Poller stopped");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::AtomicU32;

    fn counting_fetch(
        calls: Arc<AtomicU32>,
        fail_on: u32,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ApiResult<u32>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == fail_on {
                    Err(ApiError::Unreachable)
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn active_poller_fetches_immediately_and_on_ticks() {
        let (tx, mut rx) = watch::channel(PollState::default());
        let calls = Arc::new(AtomicU32::new(0));
        let _handle = spawn(
            "test",
            Duration::from_secs(1),
            true,
            Arc::new(tx),
            counting_fetch(calls.clone(), 0),
        );

        rx.wait_for(|s| s.loads == 3).await.unwrap();
        assert_eq!(rx.borrow().latest.as_deref(), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_snapshot_and_polling_continues() {
        let (tx, mut rx) = watch::channel(PollState::default());
        let calls = Arc::new(AtomicU32::new(0));
        let _handle = spawn(
            "test",
            Duration::from_secs(1),
            true,
            Arc::new(tx),
            counting_fetch(calls.clone(), 2),
        );

        let state = rx.wait_for(|s| s.error.is_some()).await.unwrap().clone();
        assert_eq!(state.latest.as_deref(), Some(&1));

        let state = rx.wait_for(|s| s.loads == 2).await.unwrap().clone();
        assert_eq!(state.latest.as_deref(), Some(&3));
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_poller_only_fetches_on_reload() {
        let (tx, mut rx) = watch::channel(PollState::default());
        let calls = Arc::new(AtomicU32::new(0));
        let handle = spawn(
            "test",
            Duration::from_millis(100),
            false,
            Arc::new(tx),
            counting_fetch(calls.clone(), 0),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handle.reload();
        rx.wait_for(|s| s.loads == 1).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_polling() {
        let (tx, mut rx) = watch::channel(PollState::default());
        let calls = Arc::new(AtomicU32::new(0));
        let handle = spawn(
            "test",
            Duration::from_secs(1),
            true,
            Arc::new(tx),
            counting_fetch(calls.clone(), 0),
        );
        rx.wait_for(|s| s.loads == 1).await.unwrap();

        drop(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }
}
