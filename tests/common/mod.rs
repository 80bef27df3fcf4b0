//! Fake host collaborators shared by the scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use run_continuity::{
    AppStateSnapshot, BackgroundScheduler, BackgroundTaskHandler, BackgroundTaskResult,
    BackgroundTaskStatus, Collaborators, KeyValueStore, ManualClock, MemoryStore, PushNotifier,
    Result, RunConfig, RunContext, RunError, RunStatus, RunStore,
};

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;
pub const MINUTE: i64 = 60_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct FakeRunStore {
    pub updates: Mutex<Vec<(String, RunStatus)>>,
    pub active: Mutex<Option<String>>,
    pub fail_updates: AtomicBool,
    pub fail_queries: AtomicBool,
}

impl FakeRunStore {
    pub fn set_active(&self, run_id: Option<&str>) {
        *self.active.lock().unwrap() = run_id.map(str::to_string);
    }

    pub fn updates(&self) -> Vec<(String, RunStatus)> {
        self.updates.lock().unwrap().clone()
    }
}

impl RunStore for FakeRunStore {
    fn update_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RunError::RunStore {
                run_id: Some(run_id.to_string()),
                message: "database locked".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((run_id.to_string(), status));
        Ok(())
    }

    fn active_run(&self) -> Result<Option<String>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RunError::RunStore {
                run_id: None,
                message: "database locked".to_string(),
            });
        }
        Ok(self.active.lock().unwrap().clone())
    }
}

pub struct FakeScheduler {
    pub tasks: Mutex<HashMap<String, BackgroundTaskHandler>>,
    pub register_calls: AtomicUsize,
    pub fail_queries: AtomicBool,
    pub status: Mutex<BackgroundTaskStatus>,
}

impl Default for FakeScheduler {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            register_calls: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            status: Mutex::new(BackgroundTaskStatus::Available),
        }
    }
}

impl FakeScheduler {
    /// Simulate the OS waking the app for `task_name`.
    pub fn trigger(&self, task_name: &str) -> Option<BackgroundTaskResult> {
        let handler = self.tasks.lock().unwrap().get(task_name).cloned();
        handler.map(|h| h())
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }
}

impl BackgroundScheduler for FakeScheduler {
    fn is_task_registered(&self, task_name: &str) -> Result<bool> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RunError::RegistrationFailure {
                task_name: task_name.to_string(),
                message: "task manager unavailable".to_string(),
            });
        }
        Ok(self.tasks.lock().unwrap().contains_key(task_name))
    }

    fn register_periodic_task(
        &self,
        task_name: &str,
        _interval_ms: u64,
        handler: BackgroundTaskHandler,
    ) -> Result<()> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .unwrap()
            .insert(task_name.to_string(), handler);
        Ok(())
    }

    fn status(&self) -> Result<BackgroundTaskStatus> {
        Ok(*self.status.lock().unwrap())
    }
}

/// Store whose every operation fails.
pub struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(RunError::storage("disk full"))
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
        Err(RunError::storage("disk full"))
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Err(RunError::storage("disk full"))
    }
}

/// Everything a scenario needs to observe the core from the host side.
pub struct Host {
    pub store: Arc<MemoryStore>,
    pub runs: Arc<FakeRunStore>,
    pub scheduler: Arc<FakeScheduler>,
    pub notifier: PushNotifier,
    pub clock: Arc<ManualClock>,
}

impl Host {
    pub fn new() -> Self {
        init_logging();
        Self {
            store: Arc::new(MemoryStore::new()),
            runs: Arc::new(FakeRunStore::default()),
            scheduler: Arc::new(FakeScheduler::default()),
            notifier: PushNotifier::new(),
            clock: Arc::new(ManualClock::new(T0)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.store.clone(),
            self.runs.clone(),
            self.scheduler.clone(),
            Arc::new(self.notifier.clone()),
        )
        .with_clock(self.clock.clone())
    }

    pub fn context(&self) -> RunContext {
        self.context_with(RunConfig::default())
    }

    pub fn context_with(&self, config: RunConfig) -> RunContext {
        RunContext::new(self.collaborators(), config)
    }

    /// Write a snapshot directly, as a previous process would have.
    pub fn seed_snapshot(&self, run_id: Option<&str>, last_save_time: i64) {
        let snapshot = AppStateSnapshot {
            active_run_id: run_id.map(str::to_string),
            run_start_time: Some(last_save_time - 30 * MINUTE),
            is_paused: false,
            last_save_time,
            app_version: "1.0.0".to_string(),
        };
        self.store
            .set(
                run_continuity::snapshot::APP_STATE_KEY,
                &snapshot.encode().unwrap(),
            )
            .unwrap();
    }
}
