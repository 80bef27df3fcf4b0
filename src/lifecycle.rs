//! # Lifecycle & Recovery Coordinator
//!
//! Keeps an in-progress run alive across the app being backgrounded,
//! suspended or killed:
//! - writes an [`AppStateSnapshot`] on every transition to background
//! - runs the registered restore callbacks on return to foreground
//! - detects a stale snapshot left behind by a killed process and marks the
//!   run `interrupted` in the external run store
//! - registers one periodic OS background task and, while backgrounded with
//!   an active run, drives the same handler from an in-process timer
//!
//! Every failure here is handled locally: storage errors skip the write or
//! read as absent, corrupted snapshots read as absent, failing callbacks are
//! logged and skipped, registration errors yield empty introspection. Only
//! [`LifecycleCoordinator::perform_app_killed_recovery`] and
//! [`LifecycleCoordinator::force_app_state_restore`] report success upward.
//!
//! ## Serialization
//!
//! Snapshot writes read run state while holding the engine lock, the same
//! lock every ingest takes, so a snapshot never observes a half-applied
//! update. Transitions are additionally serialized among themselves, which
//! gives the background write happens-before the next foreground restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::background::{
    BackgroundTaskDescriptor, BackgroundTaskHandler, BackgroundTaskResult, PeriodicTimer,
    EXECUTION_COUNT_KEY, LAST_EXECUTION_KEY,
};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::context::Collaborators;
use crate::error::{Result, RunError};
use crate::host::{AppStateSubscription, BackgroundScheduler, RunStore};
use crate::motion::SharedEngine;
use crate::registry::{isolate, HandlerId, Registry};
use crate::snapshot::{AppStateSnapshot, APP_STATE_KEY};
use crate::storage::{self, KeyValueStore};
use crate::{AppState, RunStatus};

/// Return type of a restore callback.
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Re-hydration hook run when the app returns to foreground.
pub type RestoreCallback = dyn Fn() -> CallbackResult + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LifecycleCoordinator {
    engine: SharedEngine,
    store: Arc<dyn KeyValueStore>,
    runs: Arc<dyn RunStore>,
    scheduler: Arc<dyn BackgroundScheduler>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,

    callbacks: Mutex<Registry<RestoreCallback>>,
    app_state: Mutex<AppState>,
    transition: Mutex<()>,
    timer: Mutex<Option<PeriodicTimer>>,
    subscription: Mutex<Option<Box<dyn AppStateSubscription>>>,
    /// Set once this process has written a snapshot on its way to background.
    clean_background_save: AtomicBool,
    destroyed: AtomicBool,
}

impl LifecycleCoordinator {
    // ========================================================================
    // Initialization & Teardown
    // ========================================================================

    /// Create a coordinator, register the periodic background task and
    /// subscribe to app-state transitions.
    pub fn new(
        engine: SharedEngine,
        collaborators: &Collaborators,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            engine,
            store: collaborators.store.clone(),
            runs: collaborators.runs.clone(),
            scheduler: collaborators.scheduler.clone(),
            clock: collaborators.clock.clone(),
            config,
            callbacks: Mutex::new(Registry::new()),
            app_state: Mutex::new(AppState::Active),
            transition: Mutex::new(()),
            timer: Mutex::new(None),
            subscription: Mutex::new(None),
            clean_background_save: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });

        coordinator.register_background_task();

        let weak = Arc::downgrade(&coordinator);
        let subscription = collaborators.notifier.subscribe(Arc::new(move |state: AppState| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.on_app_state_change(state);
            }
        }));
        *lock(&coordinator.subscription) = Some(subscription);

        info!(
            "[Lifecycle] Initialized (task '{}', staleness {}ms)",
            coordinator.config.background_task_name, coordinator.config.staleness_threshold_ms
        );
        coordinator
    }

    /// Detach the app-state listener and cancel the heartbeat timer.
    ///
    /// Idempotent. When this returns no timer tick is running or will run;
    /// an OS-scheduled invocation arriving later is a no-op.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.remove();
        }
        self.stop_timer();
        lock(&self.callbacks).clear();
        info!("[Lifecycle] Destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ========================================================================
    // App-State Transitions
    // ========================================================================

    pub fn app_state(&self) -> AppState {
        *lock(&self.app_state)
    }

    /// Handle a foreground/background transition from the host.
    pub fn on_app_state_change(self: &Arc<Self>, next: AppState) {
        if self.is_destroyed() {
            return;
        }
        let _transition = lock(&self.transition);
        let previous = std::mem::replace(&mut *lock(&self.app_state), next);
        debug!("[Lifecycle] {:?} -> {:?}", previous, next);

        match next {
            AppState::Background => {
                if self.save_app_state() {
                    self.clean_background_save.store(true, Ordering::SeqCst);
                }
                if self.engine.active_run().is_some() {
                    self.start_timer();
                }
            }
            AppState::Active if previous != AppState::Active => {
                self.stop_timer();
                self.restore_on_foreground();
                // A long suspension leaves lastSaveTime old; the process is alive
                if self.engine.active_run().is_some() {
                    self.save_app_state();
                }
            }
            _ => {}
        }
    }

    fn restore_on_foreground(&self) {
        match self.load_snapshot() {
            Ok(Some(snapshot)) => {
                debug!(
                    "[Lifecycle] Restoring from snapshot saved at {} (run {:?})",
                    snapshot.last_save_time, snapshot.active_run_id
                );
                let failures = self.invoke_restore_callbacks();
                if failures > 0 {
                    warn!("[Lifecycle] {} restore callback(s) failed", failures);
                }
            }
            Ok(None) => debug!("[Lifecycle] No snapshot to restore from"),
            Err(e) => warn!("[Lifecycle] Snapshot unreadable, skipping restore: {}", e),
        }
    }

    /// Invoke every restore callback in registration order. Returns how many
    /// failed; a failure never stops the remaining callbacks.
    fn invoke_restore_callbacks(&self) -> usize {
        let callbacks = lock(&self.callbacks).handlers();
        let mut failures = 0;
        for (id, callback) in callbacks {
            if let Err(message) = isolate(|| callback()) {
                let err = RunError::CallbackFailure {
                    callback_id: id,
                    message,
                };
                warn!("[Lifecycle] {}", err);
                failures += 1;
            }
        }
        failures
    }

    // ========================================================================
    // Restore Callback Registry
    // ========================================================================

    pub fn add_foreground_restore_callback(&self, callback: Arc<RestoreCallback>) -> HandlerId {
        lock(&self.callbacks).add(callback)
    }

    /// Remove a callback. Removing an unknown id is a no-op.
    pub fn remove_foreground_restore_callback(&self, id: HandlerId) -> bool {
        lock(&self.callbacks).remove(id)
    }

    pub fn restore_callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    fn load_snapshot(&self) -> Result<Option<AppStateSnapshot>> {
        match self.store.get(APP_STATE_KEY)? {
            Some(bytes) => AppStateSnapshot::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Current snapshot, or None when absent, unreadable or corrupted.
    pub fn get_app_state_data(&self) -> Option<AppStateSnapshot> {
        match self.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[Lifecycle] Treating snapshot as absent: {}", e);
                None
            }
        }
    }

    /// Write a fresh snapshot of the engine's run state. Best effort.
    pub fn save_app_state(&self) -> bool {
        let now = self.clock.now_millis();
        let result = self.engine.with(|engine| {
            let run = engine.active_run();
            let snapshot = AppStateSnapshot {
                active_run_id: run.map(|r| r.run_id.clone()),
                run_start_time: run.map(|r| r.start_time),
                is_paused: engine.is_paused(),
                last_save_time: now,
                app_version: self.config.app_version.clone(),
            };
            let bytes = snapshot.encode()?;
            self.store.set(APP_STATE_KEY, &bytes)
        });

        match result {
            Ok(()) => {
                debug!("[Lifecycle] Saved app state at {}", now);
                true
            }
            Err(e) => {
                warn!("[Lifecycle] Failed to save app state: {}", e);
                false
            }
        }
    }

    pub fn clear_app_state(&self) {
        self.clean_background_save.store(false, Ordering::SeqCst);
        if let Err(e) = self.store.delete(APP_STATE_KEY) {
            warn!("[Lifecycle] Failed to clear app state: {}", e);
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Run id of a snapshot that was left stale by a killed process.
    ///
    /// A snapshot this process wrote on its way to background, or one whose
    /// run the engine is still recording, belongs to a suspended process
    /// however old it is.
    fn stale_run(&self) -> Option<String> {
        let snapshot = self.get_app_state_data()?;
        let run_id = snapshot.active_run_id.clone()?;

        let age = snapshot.age_ms(self.clock.now_millis());
        if age <= self.config.staleness_threshold_ms {
            return None;
        }
        if self.clean_background_save.load(Ordering::SeqCst) {
            debug!("[Lifecycle] Snapshot of run {} is {}ms old but ours", run_id, age);
            return None;
        }
        if self.engine.active_run().is_some_and(|r| r.run_id == run_id) {
            debug!("[Lifecycle] Run {} is still being recorded", run_id);
            return None;
        }
        Some(run_id)
    }

    pub fn is_app_killed_recovery_needed(&self) -> bool {
        self.stale_run().is_some()
    }

    /// Mark the abandoned run `interrupted` and clear the snapshot.
    ///
    /// Returns false when no recovery applies or the run store update fails;
    /// in the latter case the snapshot is kept for a later attempt.
    pub fn perform_app_killed_recovery(&self) -> bool {
        let Some(run_id) = self.stale_run() else {
            return false;
        };

        if let Err(e) = self.runs.update_status(&run_id, RunStatus::Interrupted) {
            error!("[Lifecycle] Failed to mark run {} interrupted: {}", run_id, e);
            return false;
        }

        self.clear_app_state();
        info!("[Lifecycle] Recovered killed run {} as interrupted", run_id);
        true
    }

    /// Re-hydrate the engine directly from the stored snapshot.
    pub fn force_app_state_restore(&self) -> bool {
        match self.get_app_state_data() {
            Some(snapshot) if snapshot.has_active_run() => {
                let restored = self.engine.with(|engine| engine.restore_run(&snapshot));
                info!(
                    "[Lifecycle] Forced restore of run {:?}: {}",
                    snapshot.active_run_id, restored
                );
                restored
            }
            _ => false,
        }
    }

    // ========================================================================
    // Background Task
    // ========================================================================

    fn register_background_task(self: &Arc<Self>) {
        let name = &self.config.background_task_name;
        match self.scheduler.is_task_registered(name) {
            Ok(true) => debug!("[Lifecycle] Background task '{}' already registered", name),
            Ok(false) => {
                let weak: Weak<Self> = Arc::downgrade(self);
                let handler: BackgroundTaskHandler = Arc::new(move || {
                    weak.upgrade()
                        .map(|coordinator| coordinator.run_background_task())
                        .unwrap_or(BackgroundTaskResult::NoData)
                });
                match self
                    .scheduler
                    .register_periodic_task(name, self.config.background_interval_ms, handler)
                {
                    Ok(()) => info!("[Lifecycle] Registered background task '{}'", name),
                    Err(e) => warn!("[Lifecycle] {}", e),
                }
            }
            Err(e) => warn!("[Lifecycle] Could not query background task state: {}", e),
        }
    }

    /// Periodic heartbeat.
    ///
    /// Counts the execution, then, if the snapshot references a run that the
    /// run store still reports active and this process is recording, refreshes
    /// the snapshot's save time. A snapshot whose run is no longer active is
    /// cleared.
    pub fn run_background_task(self: &Arc<Self>) -> BackgroundTaskResult {
        if self.is_destroyed() {
            return BackgroundTaskResult::NoData;
        }
        let now = self.clock.now_millis();

        let counted = storage::increment_counter(self.store.as_ref(), EXECUTION_COUNT_KEY)
            .and_then(|_| self.store.set(LAST_EXECUTION_KEY, &now.to_le_bytes()));
        if let Err(e) = counted {
            warn!("[Lifecycle] Failed to record background execution: {}", e);
        }

        let snapshot = match self.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[Lifecycle] Background task could not read snapshot: {}", e);
                return BackgroundTaskResult::Failed;
            }
        };
        let Some(run_id) = snapshot.and_then(|s| s.active_run_id) else {
            return BackgroundTaskResult::NoData;
        };

        match self.runs.active_run() {
            Ok(active) if active.as_deref() != Some(run_id.as_str()) => {
                info!("[Lifecycle] Run {} no longer active, clearing snapshot", run_id);
                self.clear_app_state();
                self.stop_timer();
                return BackgroundTaskResult::NoData;
            }
            Ok(_) => {}
            Err(e) => warn!("[Lifecycle] Run store unavailable in background: {}", e),
        }

        let recording = self
            .engine
            .active_run()
            .is_some_and(|r| r.run_id == run_id);
        if !recording {
            // Leave the snapshot stale so the next launch recovers it
            return BackgroundTaskResult::NoData;
        }

        if self.save_app_state() {
            BackgroundTaskResult::NewData
        } else {
            BackgroundTaskResult::Failed
        }
    }

    fn start_timer(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.is_some() || self.is_destroyed() {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.background_interval_ms);
        match PeriodicTimer::start(&self.config.background_task_name, interval, move || {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.run_background_task();
            }
        }) {
            Ok(started) => *timer = Some(started),
            Err(e) => warn!("[Lifecycle] Failed to start heartbeat timer: {}", e),
        }
    }

    fn stop_timer(&self) {
        // Take first: cancel joins the timer thread, which may need this lock
        let timer = lock(&self.timer).take();
        if let Some(mut timer) = timer {
            timer.cancel();
        }
    }

    pub fn is_timer_running(&self) -> bool {
        lock(&self.timer).as_ref().is_some_and(|t| t.is_running())
    }

    /// Introspection of the registered background task.
    ///
    /// Empty when the OS registration state cannot be queried.
    pub fn get_background_task_info(&self) -> Vec<BackgroundTaskDescriptor> {
        let task_name = self.config.background_task_name.clone();

        let is_registered = match self.scheduler.is_task_registered(&task_name) {
            Ok(registered) => registered,
            Err(e) => {
                warn!("[Lifecycle] Background task info unavailable: {}", e);
                return Vec::new();
            }
        };
        let status = match self.scheduler.status() {
            Ok(status) => status,
            Err(e) => {
                warn!("[Lifecycle] Background task status unavailable: {}", e);
                return Vec::new();
            }
        };

        let execution_count = storage::read_counter(self.store.as_ref(), EXECUTION_COUNT_KEY)
            .unwrap_or_else(|e| {
                warn!("[Lifecycle] Execution counter unavailable: {}", e);
                0
            });
        let last_execution_time = self
            .store
            .get(LAST_EXECUTION_KEY)
            .ok()
            .flatten()
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(i64::from_le_bytes);

        vec![BackgroundTaskDescriptor {
            task_name,
            is_registered,
            execution_count,
            status,
            last_execution_time,
        }]
    }

    // ========================================================================
    // Location Cadence
    // ========================================================================

    /// Location update interval (ms) the location collaborator should use.
    pub fn requested_location_interval(&self) -> u64 {
        let policy = &self.config.location_intervals;
        if self.engine.with(|engine| engine.is_paused()) {
            policy.paused_interval_ms
        } else if self.app_state().is_foreground() {
            policy.foreground_interval_ms
        } else {
            policy.background_interval_ms
        }
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        self.destroy();
    }
}
