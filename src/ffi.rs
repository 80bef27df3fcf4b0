//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host owns exactly one runtime, created by [`run_init`] and torn down
//! by [`run_destroy`]. Host collaborators (run database, OS background task
//! API, restore hooks) are supplied as callback interfaces; app-state
//! transitions and OS background wakeups are pushed in by the host.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::background::{BackgroundTaskHandler, BackgroundTaskStatus};
use crate::context::{Collaborators, RunContext};
use crate::error::{Result, RunError};
use crate::host::{BackgroundScheduler, PushNotifier, RunStore};
use crate::lifecycle::CallbackResult;
use crate::storage::SqliteStore;
use crate::{
    init_logging, AppState, AppStateSnapshot, BackgroundTaskDescriptor, BackgroundTaskResult,
    LocationSample, MotionEngine, MotionEvent, MotionState, RunConfig, RunStatus,
};

// ============================================================================
// Host Callback Interfaces
// ============================================================================

/// The host's run database.
#[uniffi::export(callback_interface)]
pub trait HostRunStore: Send + Sync {
    /// Persist a status change. Return false if the write failed.
    fn update_status(&self, run_id: String, status: RunStatus) -> bool;
    /// Id of the run the database considers in progress.
    fn active_run_id(&self) -> Option<String>;
}

/// The host's OS background task API.
///
/// When the OS wakes the app for the task, the host calls
/// [`run_background_task`].
#[uniffi::export(callback_interface)]
pub trait HostBackgroundScheduler: Send + Sync {
    /// None if the registration state cannot be queried.
    fn is_task_registered(&self, task_name: String) -> Option<bool>;
    /// Register (or re-register) the periodic task. Return false on failure.
    fn register_periodic_task(&self, task_name: String, interval_ms: u64) -> bool;
    /// None if the status cannot be queried.
    fn status(&self) -> Option<BackgroundTaskStatus>;
}

/// Re-hydration hook invoked when the app returns to foreground.
#[uniffi::export(callback_interface)]
pub trait ForegroundRestoreCallback: Send + Sync {
    /// Return false to report a failed restore.
    fn on_foreground_restore(&self) -> bool;
}

/// Receives auto-pause and auto-resume events.
#[uniffi::export(callback_interface)]
pub trait MotionEventListener: Send + Sync {
    fn on_motion_event(&self, event: MotionEvent);
}

struct HostRunStoreAdapter(Box<dyn HostRunStore>);

impl RunStore for HostRunStoreAdapter {
    fn update_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        if self.0.update_status(run_id.to_string(), status) {
            Ok(())
        } else {
            Err(RunError::RunStore {
                run_id: Some(run_id.to_string()),
                message: format!("host rejected status '{}'", status),
            })
        }
    }

    fn active_run(&self) -> Result<Option<String>> {
        Ok(self.0.active_run_id())
    }
}

struct HostSchedulerAdapter {
    host: Box<dyn HostBackgroundScheduler>,
    handler: Mutex<Option<BackgroundTaskHandler>>,
}

impl HostSchedulerAdapter {
    fn handler(&self) -> MutexGuard<'_, Option<BackgroundTaskHandler>> {
        self.handler.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn dispatch(&self) -> BackgroundTaskResult {
        let handler = self.handler().clone();
        match handler {
            Some(handler) => handler(),
            None => {
                debug!("[RunContinuityFfi] Background wakeup with no handler bound");
                BackgroundTaskResult::NoData
            }
        }
    }
}

impl BackgroundScheduler for HostSchedulerAdapter {
    fn is_task_registered(&self, task_name: &str) -> Result<bool> {
        let registered = self.host.is_task_registered(task_name.to_string()).ok_or_else(|| {
            RunError::RegistrationFailure {
                task_name: task_name.to_string(),
                message: "registration state unavailable".to_string(),
            }
        })?;
        // A task registered by a previous process still needs its handler bound here
        Ok(registered && self.handler().is_some())
    }

    fn register_periodic_task(
        &self,
        task_name: &str,
        interval_ms: u64,
        handler: BackgroundTaskHandler,
    ) -> Result<()> {
        if !self.host.register_periodic_task(task_name.to_string(), interval_ms) {
            return Err(RunError::RegistrationFailure {
                task_name: task_name.to_string(),
                message: "host refused registration".to_string(),
            });
        }
        *self.handler() = Some(handler);
        Ok(())
    }

    fn status(&self) -> Result<BackgroundTaskStatus> {
        self.host.status().ok_or_else(|| RunError::RegistrationFailure {
            task_name: String::new(),
            message: "background status unavailable".to_string(),
        })
    }
}

// ============================================================================
// Runtime Slot
// ============================================================================

struct FfiRuntime {
    context: RunContext,
    notifier: PushNotifier,
    scheduler: Arc<HostSchedulerAdapter>,
}

static RUNTIME: Lazy<Mutex<Option<Arc<FfiRuntime>>>> = Lazy::new(|| Mutex::new(None));

fn slot() -> MutexGuard<'static, Option<Arc<FfiRuntime>>> {
    RUNTIME.lock().unwrap_or_else(|p| p.into_inner())
}

/// Run `f` against the live runtime without holding the slot lock, so host
/// callbacks may re-enter the FFI.
fn with_runtime<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&FfiRuntime) -> R,
{
    let runtime = slot().clone();
    match runtime {
        Some(runtime) => Some(f(&runtime)),
        None => {
            warn!("[RunContinuityFfi] Called before run_init");
            None
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Default configuration, for hosts that want to tweak a few fields.
#[uniffi::export]
pub fn default_run_config() -> RunConfig {
    RunConfig::default()
}

/// Parse a partial JSON configuration. None if it is malformed or invalid.
#[uniffi::export]
pub fn run_config_from_json(json: String) -> Option<RunConfig> {
    init_logging();
    RunConfig::from_json(&json)
        .map_err(|e| warn!("[RunContinuityFfi] Rejected config: {}", e))
        .ok()
}

/// Create the runtime. Replaces (and destroys) any existing one.
///
/// Returns false if the snapshot database cannot be opened or the config is
/// invalid.
#[uniffi::export]
pub fn run_init(
    db_path: String,
    config: RunConfig,
    run_store: Box<dyn HostRunStore>,
    scheduler: Box<dyn HostBackgroundScheduler>,
) -> bool {
    init_logging();
    info!("[RunContinuityFfi] run_init with database {}", db_path);

    if let Err(e) = config.validate() {
        warn!("[RunContinuityFfi] Invalid config: {}", e);
        return false;
    }
    let store = match SqliteStore::new(&db_path) {
        Ok(store) => store,
        Err(e) => {
            warn!("[RunContinuityFfi] Cannot open snapshot store: {}", e);
            return false;
        }
    };

    run_destroy();

    let notifier = PushNotifier::new();
    let scheduler = Arc::new(HostSchedulerAdapter {
        host: scheduler,
        handler: Mutex::new(None),
    });
    let collaborators = Collaborators::new(
        Arc::new(store),
        Arc::new(HostRunStoreAdapter(run_store)),
        scheduler.clone(),
        Arc::new(notifier.clone()),
    );
    let context = RunContext::new(collaborators, config);

    *slot() = Some(Arc::new(FfiRuntime {
        context,
        notifier,
        scheduler,
    }));
    true
}

/// Tear down the runtime. Safe to call repeatedly.
#[uniffi::export]
pub fn run_destroy() {
    let runtime = slot().take();
    if let Some(runtime) = runtime {
        runtime.context.destroy();
        info!("[RunContinuityFfi] Runtime destroyed");
    }
}

// ============================================================================
// Run Tracking & Motion
// ============================================================================

#[uniffi::export]
pub fn run_start(run_id: String) {
    with_runtime(|rt| rt.context.start_run(&run_id));
}

/// Stop tracking and clear the recovery snapshot. Returns the finished run id.
#[uniffi::export]
pub fn run_finish() -> Option<String> {
    with_runtime(|rt| rt.context.finish_run().map(|run| run.run_id)).flatten()
}

#[uniffi::export]
pub fn run_set_paused(paused: bool) -> bool {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.set_paused(paused))).unwrap_or(false)
}

#[uniffi::export]
pub fn run_is_paused() -> bool {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.is_paused())).unwrap_or(false)
}

/// Ingest a fix and return the resulting motion state.
#[uniffi::export]
pub fn run_on_location(sample: LocationSample) -> MotionState {
    with_runtime(|rt| {
        let (outcome, state) = rt.context.on_location(sample);
        if !outcome.is_accepted() {
            debug!("[RunContinuityFfi] Fix at {} {:?}", sample.timestamp, outcome);
        }
        state
    })
    .unwrap_or(MotionState::Stationary)
}

#[uniffi::export]
pub fn run_motion_state() -> MotionState {
    with_runtime(|rt| rt.context.engine().motion_state()).unwrap_or(MotionState::Stationary)
}

#[uniffi::export]
pub fn run_total_distance() -> f64 {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.total_distance())).unwrap_or(0.0)
}

#[uniffi::export]
pub fn run_elapsed_seconds() -> f64 {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.elapsed_seconds())).unwrap_or(0.0)
}

/// Pace (min/km) over the trailing `window_seconds`; 0 when unknown.
#[uniffi::export]
pub fn run_current_pace(window_seconds: f64) -> f64 {
    with_runtime(|rt| {
        rt.context
            .engine()
            .with(|engine| engine.current_pace(window_seconds))
    })
    .unwrap_or(0.0)
}

#[uniffi::export]
pub fn run_average_pace() -> f64 {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.average_pace())).unwrap_or(0.0)
}

#[uniffi::export]
pub fn run_smoothed_pace(sample_count: u32) -> f64 {
    with_runtime(|rt| {
        rt.context
            .engine()
            .with(|engine| engine.smoothed_pace(sample_count as usize))
    })
    .unwrap_or(0.0)
}

/// Path length of an arbitrary sample list, in meters.
#[uniffi::export]
pub fn ffi_path_distance(samples: Vec<LocationSample>) -> f64 {
    MotionEngine::distance(&samples)
}

/// Subscribe to auto-pause/resume events. Returns a subscription id.
#[uniffi::export]
pub fn run_add_motion_listener(listener: Box<dyn MotionEventListener>) -> Option<u64> {
    let listener: Arc<dyn MotionEventListener> = Arc::from(listener);
    with_runtime(|rt| {
        rt.context.engine().with(|engine| {
            engine.subscribe(Arc::new(move |event: &MotionEvent| {
                listener.on_motion_event(*event)
            }))
        })
    })
}

#[uniffi::export]
pub fn run_remove_motion_listener(id: u64) -> bool {
    with_runtime(|rt| rt.context.engine().with(|engine| engine.unsubscribe(id))).unwrap_or(false)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Forward an app-state transition from the host's lifecycle observer.
#[uniffi::export]
pub fn run_on_app_state(state: AppState) {
    with_runtime(|rt| {
        debug!("[RunContinuityFfi] App state -> {:?}", state);
        rt.notifier.emit(state);
    });
}

#[uniffi::export]
pub fn run_add_restore_callback(callback: Box<dyn ForegroundRestoreCallback>) -> Option<u64> {
    let callback: Arc<dyn ForegroundRestoreCallback> = Arc::from(callback);
    with_runtime(|rt| {
        rt.context
            .coordinator()
            .add_foreground_restore_callback(Arc::new(move || -> CallbackResult {
                if callback.on_foreground_restore() {
                    Ok(())
                } else {
                    Err("host restore hook reported failure".into())
                }
            }))
    })
}

#[uniffi::export]
pub fn run_remove_restore_callback(id: u64) -> bool {
    with_runtime(|rt| {
        rt.context
            .coordinator()
            .remove_foreground_restore_callback(id)
    })
    .unwrap_or(false)
}

#[uniffi::export]
pub fn run_get_app_state_data() -> Option<AppStateSnapshot> {
    with_runtime(|rt| rt.context.coordinator().get_app_state_data()).flatten()
}

/// Delete the recovery snapshot.
#[uniffi::export]
pub fn run_clear_app_state() {
    with_runtime(|rt| rt.context.coordinator().clear_app_state());
}

#[uniffi::export]
pub fn run_is_recovery_needed() -> bool {
    with_runtime(|rt| rt.context.coordinator().is_app_killed_recovery_needed()).unwrap_or(false)
}

#[uniffi::export]
pub fn run_perform_recovery() -> bool {
    with_runtime(|rt| rt.context.coordinator().perform_app_killed_recovery()).unwrap_or(false)
}

#[uniffi::export]
pub fn run_force_restore() -> bool {
    with_runtime(|rt| rt.context.coordinator().force_app_state_restore()).unwrap_or(false)
}

/// Entry point for the OS background task wakeup.
#[uniffi::export]
pub fn run_background_task() -> BackgroundTaskResult {
    init_logging();
    with_runtime(|rt| rt.scheduler.dispatch()).unwrap_or(BackgroundTaskResult::NoData)
}

#[uniffi::export]
pub fn run_background_task_info() -> Vec<BackgroundTaskDescriptor> {
    with_runtime(|rt| rt.context.coordinator().get_background_task_info()).unwrap_or_default()
}

/// Location update interval (ms) the host should request from the OS.
#[uniffi::export]
pub fn run_location_interval() -> u64 {
    with_runtime(|rt| rt.context.coordinator().requested_location_interval())
        .unwrap_or_else(|| crate::LocationIntervalPolicy::default().foreground_interval_ms)
}
