//! Explicitly owned run context.
//!
//! A `RunContext` owns one motion engine and one lifecycle coordinator wired
//! to the same collaborators. Whoever constructs it owns its lifecycle and
//! hands it (or clones of its handles) to dependent subsystems.

use std::sync::Arc;

use log::info;

use crate::clock::{Clock, SystemClock};
use crate::config::RunConfig;
use crate::host::{AppStateNotifier, BackgroundScheduler, RunStore};
use crate::lifecycle::LifecycleCoordinator;
use crate::motion::{ActiveRun, IngestOutcome, MotionEngine, SharedEngine};
use crate::storage::KeyValueStore;
use crate::{LocationSample, MotionState};

/// Host-provided collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub runs: Arc<dyn RunStore>,
    pub scheduler: Arc<dyn BackgroundScheduler>,
    pub notifier: Arc<dyn AppStateNotifier>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators using the system clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        runs: Arc<dyn RunStore>,
        scheduler: Arc<dyn BackgroundScheduler>,
        notifier: Arc<dyn AppStateNotifier>,
    ) -> Self {
        Self {
            store,
            runs,
            scheduler,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct RunContext {
    engine: SharedEngine,
    coordinator: Arc<LifecycleCoordinator>,
    clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn new(collaborators: Collaborators, config: RunConfig) -> Self {
        let engine = SharedEngine::new(
            MotionEngine::with_config(config.motion, config.auto_pause)
                .with_clock(collaborators.clock.clone()),
        );
        let coordinator = LifecycleCoordinator::new(engine.clone(), &collaborators, config.lifecycle);
        Self {
            engine,
            coordinator,
            clock: collaborators.clock,
        }
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    /// Begin tracking `run_id` starting now.
    pub fn start_run(&self, run_id: &str) {
        let now = self.clock.now_millis();
        self.engine.with(|engine| engine.start_run(run_id, now));
    }

    /// Stop tracking the active run and delete its recovery snapshot.
    pub fn finish_run(&self) -> Option<ActiveRun> {
        let run = self.engine.with(|engine| engine.end_run());
        self.coordinator.clear_app_state();
        run
    }

    /// Ingest a fix and, if accepted, reclassify motion.
    pub fn on_location(&self, sample: LocationSample) -> (IngestOutcome, MotionState) {
        let outcome = self.engine.ingest(sample);
        let state = if outcome.is_accepted() {
            self.engine.motion_state()
        } else {
            self.engine.with(|engine| engine.classify())
        };
        (outcome, state)
    }

    /// Startup check: repair a run abandoned by a killed process.
    pub fn recover_if_needed(&self) -> bool {
        if !self.coordinator.is_app_killed_recovery_needed() {
            return false;
        }
        info!("[RunContext] Stale snapshot found, recovering");
        self.coordinator.perform_app_killed_recovery()
    }

    pub fn destroy(&self) {
        self.coordinator.destroy();
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
