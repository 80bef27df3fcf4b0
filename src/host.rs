//! Contracts for the collaborators the core consumes from the host app.
//!
//! The core never talks to the OS or the run database directly; it goes
//! through these traits so the host can adapt them to its platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::warn;

use crate::background::{BackgroundTaskHandler, BackgroundTaskStatus};
use crate::error::Result;
use crate::registry::{isolate, HandlerId, Registry};
use crate::{AppState, RunStatus};

/// External run-record store. The core only reads which run is active and
/// issues status transitions.
pub trait RunStore: Send + Sync {
    fn update_status(&self, run_id: &str, status: RunStatus) -> Result<()>;
    fn active_run(&self) -> Result<Option<String>>;
}

/// OS background-execution facility.
pub trait BackgroundScheduler: Send + Sync {
    fn is_task_registered(&self, task_name: &str) -> Result<bool>;
    fn register_periodic_task(
        &self,
        task_name: &str,
        interval_ms: u64,
        handler: BackgroundTaskHandler,
    ) -> Result<()>;
    fn status(&self) -> Result<BackgroundTaskStatus>;
}

/// Callback receiving app foreground/background transitions.
pub type AppStateHandler = Arc<dyn Fn(AppState) + Send + Sync>;

/// Handle for a live app-state subscription.
pub trait AppStateSubscription: Send {
    /// Detach the listener. Consumes the handle so it cannot run twice.
    fn remove(self: Box<Self>);
}

/// OS app-lifecycle notifier.
pub trait AppStateNotifier: Send + Sync {
    fn subscribe(&self, handler: AppStateHandler) -> Box<dyn AppStateSubscription>;
}

// ============================================================================
// Push Notifier
// ============================================================================

type StateHandler = dyn Fn(AppState) + Send + Sync;

#[derive(Default)]
struct PushNotifierInner {
    handlers: Mutex<Registry<StateHandler>>,
    removals: AtomicUsize,
}

impl PushNotifierInner {
    fn handlers(&self) -> MutexGuard<'_, Registry<StateHandler>> {
        self.handlers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Notifier for hosts that deliver lifecycle events by calling into the
/// library (FFI, tests) instead of exposing a native subscription API.
#[derive(Clone, Default)]
pub struct PushNotifier {
    inner: Arc<PushNotifierInner>,
}

impl PushNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `state` to every subscriber in registration order.
    pub fn emit(&self, state: AppState) {
        let handlers = self.inner.handlers().handlers();
        for (id, handler) in handlers {
            if let Err(message) = isolate(|| {
                handler(state);
                Ok::<(), String>(())
            }) {
                warn!("[PushNotifier] App-state listener {} failed: {}", id, message);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.handlers().len()
    }

    /// Number of `remove()` calls that detached a listener.
    pub fn removal_count(&self) -> usize {
        self.inner.removals.load(Ordering::SeqCst)
    }
}

struct PushSubscription {
    inner: Weak<PushNotifierInner>,
    id: HandlerId,
}

impl AppStateSubscription for PushSubscription {
    fn remove(self: Box<Self>) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.handlers().remove(self.id) {
                inner.removals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl AppStateNotifier for PushNotifier {
    fn subscribe(&self, handler: AppStateHandler) -> Box<dyn AppStateSubscription> {
        let id = self.inner.handlers().add(handler);
        Box::new(PushSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        })
    }
}
