//! Shared drive list.
//!
//! One poller feeds every open view. The poll task is started by the first
//! subscription and stopped when the last one is dropped; subscriptions only
//! hold a weak reference, so they never keep the registry alive.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::{Backend, Device};
use crate::core::poller::{self, PollState, PollerHandle};

pub type DeviceSnapshot = Arc<Vec<Device>>;

#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn Backend>,
    interval: Duration,
    tx: Arc<watch::Sender<PollState<Vec<Device>>>>,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    subscribers: usize,
    poller: Option<PollerHandle>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // The guarded section never panics; recover the data if it ever did.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(poller) = state.poller.take() {
                poller.stop();
                info!("Last drive list subscriber gone, polling stopped");
            }
        }
    }
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn Backend>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(PollState::default());
        Self {
            shared: Arc::new(Shared {
                backend,
                interval,
                tx: Arc::new(tx),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Subscribe to drive list updates, starting the poller if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> DeviceSubscription {
        let mut state = self.shared.lock();
        state.subscribers += 1;

        if state.poller.is_none() {
            let backend = self.shared.backend.clone();
            let handle = poller::spawn(
                "drive-list",
                self.shared.interval,
                true,
                self.shared.tx.clone(),
                move || {
                    let backend = backend.clone();
                    async move { backend.list_drives().await }
                },
            );
            state.poller = Some(handle);
            info!(interval = ?self.shared.interval, "Drive list polling started");
        }
        debug!(subscribers = state.subscribers, "Drive list subscription added");

        DeviceSubscription {
            rx: self.shared.tx.subscribe(),
            seen: None,
            registry: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers
    }

    pub fn is_polling(&self) -> bool {
        self.shared.lock().poller.is_some()
    }

    /// Most recent drive list, if one was ever loaded.
    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.shared.tx.borrow().latest.clone()
    }

    /// Ask the running poller for an immediate refresh.
    pub fn reload(&self) {
        if let Some(poller) = &self.shared.lock().poller {
            poller.reload();
        }
    }
}

/// A view's interest in the drive list.
pub struct DeviceSubscription {
    rx: watch::Receiver<PollState<Vec<Device>>>,
    seen: Option<u64>,
    registry: Weak<Shared>,
}

impl DeviceSubscription {
    /// The current snapshot if it has not been returned yet.
    pub fn take_current(&mut self) -> Option<DeviceSnapshot> {
        let state = self.rx.borrow_and_update();
        if self.seen == Some(state.loads) {
            return None;
        }
        let latest = state.latest.clone()?;
        self.seen = Some(state.loads);
        Some(latest)
    }

    /// Wait for the next loaded snapshot. Failed polls are skipped.
    ///
    /// Returns `None` once the registry is gone.
    pub async fn changed(&mut self) -> Option<DeviceSnapshot> {
        loop {
            if let Some(snapshot) = self.take_current() {
                return Some(snapshot);
            }
            self.rx.changed().await.ok()?;
        }
    }
}

impl Drop for DeviceSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.release();
        }
    }
}
