//! # Run Continuity
//!
//! The core of an in-progress outdoor run tracker for runners who cannot rely
//! on visual feedback.
//!
//! This library provides:
//! - Distance accumulation over noisy GPS fixes (Haversine)
//! - Motion classification (stationary / walking / running) and pace
//! - Debounced auto-pause / auto-resume
//! - Crash-consistent snapshotting and recovery across app background/kill
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed durable key-value store (default)
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use run_continuity::{LocationSample, ManualClock, MotionEngine, MotionState};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let mut engine = MotionEngine::new().with_clock(clock.clone());
//! for i in 0..12 {
//!     // ~1.4 m/s due north
//!     let lat = 51.5 + i as f64 * 0.0000126;
//!     clock.set(i * 1000);
//!     engine.ingest(LocationSample::new(lat, -0.12, i * 1000));
//! }
//!
//! assert_eq!(engine.motion_state(), MotionState::Walking);
//! println!("{:.0} m so far", engine.total_distance());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, RunError};

// Geographic utilities (Haversine, path length)
pub mod geo_utils;
pub use geo_utils::path_distance;

// Runtime configuration
pub mod config;
pub use config::{AutoPauseConfig, LifecycleConfig, LocationIntervalPolicy, MotionConfig, RunConfig};

// Time source
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Ordered location and motion-state histories
pub mod history;
pub use history::{LocationHistory, MotionHistory};

// Pace math
pub mod pace;

// Ordered subscriber registry with failure isolation
pub mod registry;
pub use registry::{HandlerId, Registry};

// Auto-pause / auto-resume state machine
pub mod auto_pause;
pub use auto_pause::{AutoPauseDetector, AutoPausePhase, MotionEvent};

// Motion & distance engine
pub mod motion;
pub use motion::{ActiveRun, IngestOutcome, MotionEngine, RejectReason, SharedEngine};

// Recovery snapshot
pub mod snapshot;
pub use snapshot::AppStateSnapshot;

// Durable key-value storage
pub mod storage;
#[cfg(feature = "persistence")]
pub use storage::SqliteStore;
pub use storage::{KeyValueStore, MemoryStore};

// External collaborator contracts
pub mod host;
pub use host::{AppStateNotifier, AppStateSubscription, BackgroundScheduler, PushNotifier, RunStore};

// Background task plumbing
pub mod background;
pub use background::{
    BackgroundTaskDescriptor, BackgroundTaskHandler, BackgroundTaskResult, BackgroundTaskStatus,
    PeriodicTimer,
};

// Lifecycle & recovery coordinator
pub mod lifecycle;
pub use lifecycle::{CallbackResult, LifecycleCoordinator, RestoreCallback};

// Explicitly owned context (engine + coordinator)
pub mod context;
pub use context::{Collaborators, RunContext};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunContinuityRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A timestamped GPS fix.
///
/// Timestamps are milliseconds since the Unix epoch. Accuracy, when the
/// location provider reports it, is the horizontal error radius in meters.
///
/// # Example
/// ```
/// use run_continuity::LocationSample;
/// let fix = LocationSample::new(51.5074, -0.1278, 1_700_000_000_000).with_accuracy(5.0);
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub accuracy: Option<f64>,
}

impl LocationSample {
    /// Create a new sample without accuracy information.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy: None,
        }
    }

    /// Attach a reported horizontal accuracy in meters.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        geo_utils::is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Classification of recent movement speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    Stationary,
    Walking,
    Running,
}

impl MotionState {
    /// Walking or running.
    pub fn is_moving(self) -> bool {
        !matches!(self, MotionState::Stationary)
    }
}

impl std::fmt::Display for MotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionState::Stationary => write!(f, "stationary"),
            MotionState::Walking => write!(f, "walking"),
            MotionState::Running => write!(f, "running"),
        }
    }
}

/// One classification result, appended every time motion state is computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MotionStateRecord {
    pub state: MotionState,
    pub timestamp: i64,
}

/// Status taxonomy of an externally stored run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Paused,
    Completed,
    Interrupted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Active => write!(f, "active"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Foreground/background status reported by the host app-lifecycle notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn is_foreground(self) -> bool {
        matches!(self, AppState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validity() {
        assert!(LocationSample::new(45.0, 90.0, 0).is_valid());
        assert!(!LocationSample::new(95.0, 0.0, 0).is_valid());
        assert!(!LocationSample::new(0.0, 181.0, 0).is_valid());
    }

    #[test]
    fn test_motion_state_serde() {
        let json = serde_json::to_string(&MotionState::Walking).unwrap();
        assert_eq!(json, "\"walking\"");
        assert!(MotionState::Running.is_moving());
        assert!(!MotionState::Stationary.is_moving());
    }

    #[test]
    fn test_app_state_foreground() {
        assert!(AppState::Active.is_foreground());
        assert!(!AppState::Background.is_foreground());
        assert!(!AppState::Inactive.is_foreground());
    }
}
