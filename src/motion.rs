//! # Motion & Distance Engine
//!
//! Stateful engine that owns the location history for the current run and
//! derives everything downstream from it:
//! - cumulative distance (Haversine, cached on ingest)
//! - motion classification over a short lookback window
//! - current, average and smoothed pace
//! - the auto-pause / auto-resume state machine and its subscribers
//!
//! Nothing here returns an error for ordinary GPS noise. Bad fixes are
//! dropped at ingest and degenerate inputs fall back to 0 / `Stationary`.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::auto_pause::{AutoPauseDetector, AutoPausePhase, MotionEvent};
use crate::clock::{Clock, SystemClock};
use crate::config::{AutoPauseConfig, MotionConfig};
use crate::history::{LocationHistory, MotionHistory};
use crate::registry::{isolate, HandlerId, Registry};
use crate::snapshot::AppStateSnapshot;
use crate::{geo_utils, pace, LocationSample, MotionState, MotionStateRecord};

/// Subscriber for auto-pause / auto-resume notifications.
pub type MotionListener = dyn Fn(&MotionEvent) + Send + Sync;

/// Why a fix was dropped at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    InvalidCoordinates,
    OutOfOrder,
    PoorAccuracy,
}

/// Result of [`MotionEngine::ingest`]. Rejections are informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl IngestOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, IngestOutcome::Accepted)
    }
}

/// The run currently being recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: String,
    /// Unix millis
    pub start_time: i64,
    pub is_paused: bool,
}

pub struct MotionEngine {
    config: MotionConfig,
    locations: LocationHistory,
    motion: MotionHistory,
    detector: AutoPauseDetector,
    listeners: Registry<MotionListener>,
    active_run: Option<ActiveRun>,
    clock: Arc<dyn Clock>,
}

impl Default for MotionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionEngine {
    /// Create a new engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(MotionConfig::default(), AutoPauseConfig::default())
    }

    /// Create a new engine with custom configuration.
    pub fn with_config(config: MotionConfig, auto_pause: AutoPauseConfig) -> Self {
        let motion = MotionHistory::new(
            (config.record_retention_seconds * 1000.0) as i64,
            config.max_motion_records as usize,
        );
        Self {
            config,
            locations: LocationHistory::new(),
            motion,
            detector: AutoPauseDetector::new(auto_pause),
            listeners: Registry::new(),
            active_run: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for classification and pace windows.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Replace classification and pace thresholds. History is kept.
    pub fn set_config(&mut self, config: MotionConfig) {
        self.motion.set_retention(
            (config.record_retention_seconds * 1000.0) as i64,
            config.max_motion_records as usize,
        );
        self.config = config;
    }

    pub fn auto_pause_config(&self) -> &AutoPauseConfig {
        self.detector.config()
    }

    pub fn set_auto_pause_config(&mut self, config: AutoPauseConfig) {
        self.detector.set_config(config);
    }

    // ========================================================================
    // Ingest & Distance
    // ========================================================================

    /// Append a fix to the history.
    ///
    /// Fixes with out-of-range coordinates, a timestamp not after the last
    /// accepted fix, or (when the gate is configured) poor accuracy are
    /// dropped without touching distance.
    pub fn ingest(&mut self, sample: LocationSample) -> IngestOutcome {
        if !sample.is_valid() {
            debug!(
                "[MotionEngine] Dropped fix with invalid coordinates ({}, {})",
                sample.latitude, sample.longitude
            );
            return IngestOutcome::Rejected(RejectReason::InvalidCoordinates);
        }

        if let (Some(limit), Some(accuracy)) = (self.config.max_accuracy_meters, sample.accuracy) {
            if !(accuracy <= limit) {
                debug!(
                    "[MotionEngine] Dropped fix at {} with accuracy {:.1}m (limit {:.1}m)",
                    sample.timestamp, accuracy, limit
                );
                return IngestOutcome::Rejected(RejectReason::PoorAccuracy);
            }
        }

        if !self.locations.push(sample) {
            debug!(
                "[MotionEngine] Dropped out-of-order fix at {} (last {:?})",
                sample.timestamp,
                self.locations.last().map(|s| s.timestamp)
            );
            return IngestOutcome::Rejected(RejectReason::OutOfOrder);
        }

        IngestOutcome::Accepted
    }

    /// Total path length of `samples` in meters. Independent of engine state.
    pub fn distance(samples: &[LocationSample]) -> f64 {
        geo_utils::path_distance(samples)
    }

    /// Distance accumulated over all accepted fixes (meters).
    pub fn total_distance(&self) -> f64 {
        self.locations.total_distance()
    }

    /// Seconds between the first and last accepted fix.
    pub fn elapsed_seconds(&self) -> f64 {
        self.locations.elapsed_ms() as f64 / 1000.0
    }

    pub fn samples(&self) -> &[LocationSample] {
        self.locations.samples()
    }

    pub fn sample_count(&self) -> usize {
        self.locations.len()
    }

    // ========================================================================
    // Motion State
    // ========================================================================

    /// Evaluation time for classification and pace windows.
    ///
    /// Always the clock, so a device that stops delivering fixes drains its
    /// window and reads as stationary. Replays drive a [`crate::ManualClock`]
    /// to each fix's timestamp.
    fn evaluation_time(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Average speed (m/s) across the fixes in the last
    /// `state_window_seconds`. Zero with fewer than two such fixes.
    pub fn window_speed(&self) -> f64 {
        let window_ms = (self.config.state_window_seconds * 1000.0) as i64;
        let window = self
            .locations
            .trailing_window(self.evaluation_time(), window_ms);
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return 0.0;
        };
        let elapsed = (last.timestamp - first.timestamp) as f64 / 1000.0;
        if window.len() < 2 || elapsed <= 0.0 {
            return 0.0;
        }
        geo_utils::path_distance(window) / elapsed
    }

    /// Classify the current window without recording anything.
    pub fn classify(&self) -> MotionState {
        let speed = self.window_speed();
        if speed <= self.config.stationary_max_speed {
            MotionState::Stationary
        } else if speed <= self.config.walking_max_speed {
            MotionState::Walking
        } else {
            MotionState::Running
        }
    }

    /// Classify, append a [`MotionStateRecord`] and advance auto-pause.
    ///
    /// Subscribers are invoked synchronously before this returns; they must
    /// not call back into the engine through a [`SharedEngine`] lock. Use
    /// [`SharedEngine::motion_state`] when they need to.
    pub fn motion_state(&mut self) -> MotionState {
        let (state, event) = self.record_motion_state();
        if let Some(event) = event {
            Self::dispatch(&self.listeners.handlers(), &event);
        }
        state
    }

    fn record_motion_state(&mut self) -> (MotionState, Option<MotionEvent>) {
        let state = self.classify();
        let record = MotionStateRecord {
            state,
            timestamp: self.evaluation_time(),
        };
        self.motion.push(record);

        let event = self.detector.evaluate(&record, &self.motion);
        if let Some(event) = &event {
            self.apply_event(event);
        }
        (state, event)
    }

    fn apply_event(&mut self, event: &MotionEvent) {
        let paused = matches!(event, MotionEvent::AutoPaused { .. });
        match &mut self.active_run {
            Some(run) => {
                run.is_paused = paused;
                info!(
                    "[MotionEngine] Auto-{} run {} at {}",
                    if paused { "paused" } else { "resumed" },
                    run.run_id,
                    event.timestamp()
                );
            }
            None => debug!("[MotionEngine] {:?} with no active run", event),
        }
    }

    fn dispatch(listeners: &[(HandlerId, Arc<MotionListener>)], event: &MotionEvent) {
        for (id, listener) in listeners {
            if let Err(message) = isolate(|| {
                listener(event);
                Ok::<(), String>(())
            }) {
                warn!("[MotionEngine] Motion listener {} failed: {}", id, message);
            }
        }
    }

    /// Span (ms) ending at `now` over which recorded states were all `state`.
    pub fn consecutive_duration(&self, state: MotionState, now: i64) -> i64 {
        self.motion.consecutive_duration(state, now)
    }

    pub fn motion_records(&self) -> Vec<MotionStateRecord> {
        self.motion.records().copied().collect()
    }

    pub fn auto_pause_phase(&self) -> AutoPausePhase {
        self.detector.phase()
    }

    // ========================================================================
    // Pace
    // ========================================================================

    /// Minutes per km over the trailing `window_seconds` ending now.
    pub fn current_pace(&self, window_seconds: f64) -> f64 {
        let window_ms = (window_seconds.max(0.0) * 1000.0) as i64;
        pace::window_pace(
            self.locations
                .trailing_window(self.evaluation_time(), window_ms),
            self.config.min_pace_elapsed_seconds,
            self.config.min_pace_distance_meters,
        )
    }

    /// [`Self::current_pace`] over the configured default window.
    pub fn recent_pace(&self) -> f64 {
        self.current_pace(self.config.pace_window_seconds)
    }

    /// Minutes per km over the whole history.
    pub fn average_pace(&self) -> f64 {
        pace::average_pace(
            self.locations.total_distance(),
            self.locations.elapsed_ms(),
            self.config.min_pace_distance_meters,
        )
    }

    /// Mean of the last `sample_count` per-segment paces.
    pub fn smoothed_pace(&self, sample_count: usize) -> f64 {
        pace::smoothed_pace(self.locations.samples(), sample_count)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to auto-pause / auto-resume events.
    pub fn subscribe(&mut self, listener: Arc<MotionListener>) -> HandlerId {
        self.listeners.add(listener)
    }

    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ========================================================================
    // Run Tracking
    // ========================================================================

    /// Begin recording a new run. Previous histories are discarded.
    pub fn start_run(&mut self, run_id: impl Into<String>, start_time: i64) {
        let run_id = run_id.into();
        info!("[MotionEngine] Starting run {} at {}", run_id, start_time);
        self.reset_histories();
        self.active_run = Some(ActiveRun {
            run_id,
            start_time,
            is_paused: false,
        });
    }

    /// Stop tracking the active run. Histories stay readable until the next start.
    pub fn end_run(&mut self) -> Option<ActiveRun> {
        let run = self.active_run.take();
        if let Some(run) = &run {
            info!(
                "[MotionEngine] Ended run {} ({:.0}m)",
                run.run_id,
                self.total_distance()
            );
        }
        self.detector.reset();
        run
    }

    /// Manual pause/resume. Returns false when no run is active.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        match &mut self.active_run {
            Some(run) => {
                run.is_paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn active_run(&self) -> Option<&ActiveRun> {
        self.active_run.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.active_run.as_ref().is_some_and(|r| r.is_paused)
    }

    /// Re-hydrate run tracking from a recovery snapshot.
    ///
    /// Returns false when the snapshot references no run. Restoring the run
    /// that is already active only refreshes its paused flag; restoring a
    /// different run discards the current histories.
    pub fn restore_run(&mut self, snapshot: &AppStateSnapshot) -> bool {
        let Some(run_id) = snapshot.active_run_id.as_deref() else {
            return false;
        };

        if let Some(run) = self.active_run.as_mut().filter(|r| r.run_id == run_id) {
            run.is_paused = snapshot.is_paused;
            debug!("[MotionEngine] Run {} already active, refreshed pause state", run_id);
            return true;
        }

        self.reset_histories();
        self.active_run = Some(ActiveRun {
            run_id: run_id.to_string(),
            start_time: snapshot.run_start_time.unwrap_or(snapshot.last_save_time),
            is_paused: snapshot.is_paused,
        });
        info!(
            "[MotionEngine] Restored run {} (paused: {})",
            run_id, snapshot.is_paused
        );
        true
    }

    fn reset_histories(&mut self) {
        self.locations.clear();
        self.motion.clear();
        self.detector.reset();
    }
}

// ============================================================================
// Shared Handle
// ============================================================================

/// Mutex-guarded handle giving every collaborator single-writer access to
/// one engine.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<MotionEngine>>,
}

impl SharedEngine {
    pub fn new(engine: MotionEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MotionEngine> {
        // A panicking listener must not take the engine down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut MotionEngine) -> R,
    {
        let mut engine = self.lock();
        f(&mut engine)
    }

    pub fn ingest(&self, sample: LocationSample) -> IngestOutcome {
        self.lock().ingest(sample)
    }

    /// Like [`MotionEngine::motion_state`], but subscribers run after the
    /// lock is released so they may use this handle.
    pub fn motion_state(&self) -> MotionState {
        let (state, event, listeners) = {
            let mut engine = self.lock();
            let (state, event) = engine.record_motion_state();
            let listeners = event.map(|_| engine.listeners.handlers()).unwrap_or_default();
            (state, event, listeners)
        };
        if let Some(event) = event {
            MotionEngine::dispatch(&listeners, &event);
        }
        state
    }

    pub fn active_run(&self) -> Option<ActiveRun> {
        self.lock().active_run().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clocked_with(auto_pause: AutoPauseConfig) -> (MotionEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let engine =
            MotionEngine::with_config(MotionConfig::default(), auto_pause).with_clock(clock.clone());
        (engine, clock)
    }

    fn clocked() -> (MotionEngine, Arc<ManualClock>) {
        clocked_with(AutoPauseConfig::default())
    }

    /// One fix per second due north at `speed_mps`, starting at `start_ms`.
    /// The clock follows the fixes, as it does for a live stream.
    fn feed(engine: &mut MotionEngine, clock: &ManualClock, speed_mps: f64, seconds: i64, start_ms: i64) {
        let step = geo_utils::meters_to_degrees(speed_mps);
        let (base_lat, base_index) = engine
            .samples()
            .last()
            .map(|s| (s.latitude, 1))
            .unwrap_or((51.5, 0));
        for i in 0..seconds {
            let lat = base_lat + (i + base_index) as f64 * step;
            let timestamp = start_ms + i * 1_000;
            clock.set(timestamp);
            engine.ingest(LocationSample::new(lat, -0.12, timestamp));
        }
    }

    fn count_pauses(engine: &mut MotionEngine) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        engine.subscribe(Arc::new(move |event: &MotionEvent| {
            if matches!(event, MotionEvent::AutoPaused { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        fired
    }

    #[test]
    fn test_no_history_is_stationary() {
        let mut engine = MotionEngine::new();
        assert_eq!(engine.motion_state(), MotionState::Stationary);
        assert_eq!(engine.motion_records().len(), 1);
    }

    #[test]
    fn test_walking_speed() {
        let (mut engine, clock) = clocked();
        feed(&mut engine, &clock, 1.4, 15, 0);
        assert_eq!(engine.motion_state(), MotionState::Walking);
    }

    #[test]
    fn test_running_speed() {
        let (mut engine, clock) = clocked();
        feed(&mut engine, &clock, 22.0, 15, 0);
        assert_eq!(engine.motion_state(), MotionState::Running);
    }

    #[test]
    fn test_near_zero_speed_is_stationary() {
        let (mut engine, clock) = clocked();
        feed(&mut engine, &clock, 0.05, 15, 0);
        assert_eq!(engine.motion_state(), MotionState::Stationary);
    }

    #[test]
    fn test_sparse_fixes_are_stationary() {
        let (mut engine, clock) = clocked();
        // One fix every 20s never puts two fixes in the 10s window
        for i in 0..5 {
            clock.set(i * 20_000);
            engine.ingest(LocationSample::new(51.5 + i as f64 * 0.0005, -0.12, i * 20_000));
        }
        assert_eq!(engine.motion_state(), MotionState::Stationary);
        assert!(engine.total_distance() > 200.0);
    }

    #[test]
    fn test_every_call_appends_record() {
        let (mut engine, clock) = clocked();
        feed(&mut engine, &clock, 3.0, 5, 0);
        engine.motion_state();
        engine.motion_state();
        engine.motion_state();
        let records = engine.motion_records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.state == MotionState::Running));
    }

    #[test]
    fn test_records_follow_clock_without_fixes() {
        let (mut engine, clock) = clocked();
        engine.start_run("run-1", 0);
        let fired = count_pauses(&mut engine);
        feed(&mut engine, &clock, 3.0, 10, 0);
        assert_eq!(engine.motion_state(), MotionState::Running);

        // Location updates stop while the runner stands still
        for _ in 0..119 {
            clock.advance(1_000);
            engine.motion_state();
        }
        clock.advance(1_000);

        assert_eq!(engine.motion_state(), MotionState::Stationary);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(engine.is_paused());
        let records = engine.motion_records();
        assert_eq!(records.last().map(|r| r.timestamp), Some(clock.now_millis()));
    }

    #[test]
    fn test_ingest_rejections() {
        let mut engine = MotionEngine::with_config(
            MotionConfig {
                max_accuracy_meters: Some(30.0),
                ..MotionConfig::default()
            },
            AutoPauseConfig::default(),
        );

        assert!(engine.ingest(LocationSample::new(51.0, 0.0, 1_000)).is_accepted());
        assert_eq!(
            engine.ingest(LocationSample::new(91.0, 0.0, 2_000)),
            IngestOutcome::Rejected(RejectReason::InvalidCoordinates)
        );
        assert_eq!(
            engine.ingest(LocationSample::new(51.001, 0.0, 500)),
            IngestOutcome::Rejected(RejectReason::OutOfOrder)
        );
        assert_eq!(
            engine.ingest(LocationSample::new(51.001, 0.0, 3_000).with_accuracy(80.0)),
            IngestOutcome::Rejected(RejectReason::PoorAccuracy)
        );
        assert_eq!(engine.sample_count(), 1);
        assert_eq!(engine.total_distance(), 0.0);
    }

    #[test]
    fn test_paces_zero_when_degenerate() {
        let (mut engine, clock) = clocked();
        assert_eq!(engine.current_pace(120.0), 0.0);
        assert_eq!(engine.average_pace(), 0.0);
        assert_eq!(engine.smoothed_pace(5), 0.0);

        engine.ingest(LocationSample::new(51.0, 0.0, 0));
        assert_eq!(engine.current_pace(120.0), 0.0);
        assert_eq!(engine.average_pace(), 0.0);

        feed(&mut engine, &clock, 0.0, 30, 1_000);
        assert_eq!(engine.current_pace(120.0), 0.0);
        assert_eq!(engine.average_pace(), 0.0);
        assert_eq!(engine.smoothed_pace(5), 0.0);
    }

    #[test]
    fn test_paces_steady_run() {
        let (mut engine, clock) = clocked();
        // 3.333 m/s is 5:00 min/km
        feed(&mut engine, &clock, 1000.0 / 300.0, 300, 0);

        for pace in [engine.recent_pace(), engine.average_pace(), engine.smoothed_pace(5)] {
            assert!(pace.is_finite());
            assert!((pace - 5.0).abs() < 0.05, "got {pace}");
        }

        // Current pace is unknown once the window has no fixes left
        clock.advance(10 * 60_000);
        assert_eq!(engine.recent_pace(), 0.0);
    }

    #[test]
    fn test_auto_pause_fires_once_and_pauses_run() {
        let (mut engine, clock) = clocked();
        engine.start_run("run-1", 0);
        let fired = count_pauses(&mut engine);

        feed(&mut engine, &clock, 3.0, 10, 0);
        engine.motion_state();
        // Standing still for 60s, evaluated every second
        for i in 0..60 {
            feed(&mut engine, &clock, 0.0, 1, 10_000 + i * 1_000);
            engine.motion_state();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(engine.is_paused());
        assert_eq!(engine.auto_pause_phase(), AutoPausePhase::Paused);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (mut engine, _clock) = clocked_with(AutoPauseConfig {
            pause_threshold_ms: 0,
            ..AutoPauseConfig::default()
        });
        let reached = Arc::new(AtomicUsize::new(0));
        let counter = reached.clone();
        engine.subscribe(Arc::new(|_: &MotionEvent| panic!("listener bug")));
        engine.subscribe(Arc::new(move |_: &MotionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        engine.motion_state();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_run() {
        let mut engine = MotionEngine::new();
        let snapshot = AppStateSnapshot {
            active_run_id: Some("run-9".to_string()),
            run_start_time: Some(1_000),
            is_paused: true,
            last_save_time: 5_000,
            app_version: "1.0.0".to_string(),
        };
        assert!(engine.restore_run(&snapshot));
        let run = engine.active_run().unwrap();
        assert_eq!(run.run_id, "run-9");
        assert_eq!(run.start_time, 1_000);
        assert!(engine.is_paused());

        let empty = AppStateSnapshot {
            active_run_id: None,
            ..snapshot
        };
        let mut fresh = MotionEngine::new();
        assert!(!fresh.restore_run(&empty));
        assert!(fresh.active_run().is_none());
    }

    #[test]
    fn test_restore_same_run_keeps_history() {
        let (mut engine, clock) = clocked();
        engine.start_run("run-1", 0);
        feed(&mut engine, &clock, 3.0, 10, 0);
        let distance = engine.total_distance();

        let snapshot = AppStateSnapshot {
            active_run_id: Some("run-1".to_string()),
            run_start_time: Some(0),
            is_paused: false,
            last_save_time: 10_000,
            app_version: "1.0.0".to_string(),
        };
        assert!(engine.restore_run(&snapshot));
        assert_eq!(engine.total_distance(), distance);
    }

    #[test]
    fn test_shared_engine_listener_can_reenter() {
        let (engine, _clock) = clocked_with(AutoPauseConfig {
            pause_threshold_ms: 0,
            ..AutoPauseConfig::default()
        });
        let shared = SharedEngine::new(engine);
        let observed = Arc::new(AtomicUsize::new(0));
        let handle = shared.clone();
        let counter = observed.clone();
        shared.with(|e| {
            e.subscribe(Arc::new(move |_: &MotionEvent| {
                counter.store(handle.with(|e| e.motion_records().len()), Ordering::SeqCst);
            }))
        });

        assert_eq!(shared.motion_state(), MotionState::Stationary);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
