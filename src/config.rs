//! Runtime configuration for the motion engine and lifecycle coordinator.
//!
//! All structs deserialize with per-field defaults so a host can send a
//! partial JSON document and only override what it cares about.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunError};

/// Thresholds for motion classification and pace estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct MotionConfig {
    /// Lookback window for motion classification (seconds). Default: 10
    pub state_window_seconds: f64,
    /// Average speed at or below which the runner is stationary (m/s). Default: 0.5
    pub stationary_max_speed: f64,
    /// Average speed at or below which the runner is walking (m/s). Default: 2.0
    pub walking_max_speed: f64,
    /// Default trailing window for `current_pace` (seconds). Default: 120
    pub pace_window_seconds: f64,
    /// Minimum elapsed time for a stable pace estimate (seconds). Default: 5
    pub min_pace_elapsed_seconds: f64,
    /// Minimum distance for a stable pace estimate (meters). Default: 10
    pub min_pace_distance_meters: f64,
    /// Default number of segments averaged by `smoothed_pace`. Default: 5
    pub smoothing_sample_count: u32,
    /// Reject fixes whose reported accuracy is worse than this (meters).
    /// None disables the gate. Default: None
    pub max_accuracy_meters: Option<f64>,
    /// How long motion-state records are kept (seconds). Default: 600
    pub record_retention_seconds: f64,
    /// Hard cap on retained motion-state records. Default: 2048
    pub max_motion_records: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            state_window_seconds: 10.0,
            stationary_max_speed: 0.5,
            walking_max_speed: 2.0,
            pace_window_seconds: 120.0,
            min_pace_elapsed_seconds: 5.0,
            min_pace_distance_meters: 10.0,
            smoothing_sample_count: 5,
            max_accuracy_meters: None,
            record_retention_seconds: 600.0,
            max_motion_records: 2048,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.state_window_seconds > 0.0) {
            return Err(RunError::config("state_window_seconds must be positive"));
        }
        if !(self.stationary_max_speed >= 0.0 && self.walking_max_speed > self.stationary_max_speed)
        {
            return Err(RunError::config(
                "speed thresholds must satisfy 0 <= stationary_max_speed < walking_max_speed",
            ));
        }
        if !(self.pace_window_seconds > 0.0) {
            return Err(RunError::config("pace_window_seconds must be positive"));
        }
        if self.smoothing_sample_count == 0 {
            return Err(RunError::config("smoothing_sample_count must be at least 1"));
        }
        if self.max_motion_records == 0 {
            return Err(RunError::config("max_motion_records must be at least 1"));
        }
        Ok(())
    }
}

/// Auto-pause / auto-resume thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct AutoPauseConfig {
    pub enabled: bool,
    /// Sustained stationary time before auto-pause (ms). Default: 30s
    pub pause_threshold_ms: i64,
    /// Sustained movement time before auto-resume (ms). Default: 5s
    pub resume_threshold_ms: i64,
    /// Minimum time between opposite transitions (ms). Default: 3s
    pub debounce_ms: i64,
}

impl Default for AutoPauseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pause_threshold_ms: 30_000,
            resume_threshold_ms: 5_000,
            debounce_ms: 3_000,
        }
    }
}

impl AutoPauseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pause_threshold_ms < 0 || self.resume_threshold_ms < 0 || self.debounce_ms < 0 {
            return Err(RunError::config("auto-pause thresholds must be non-negative"));
        }
        Ok(())
    }
}

/// Location update cadence the core requests from the location collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct LocationIntervalPolicy {
    pub foreground_interval_ms: u64,
    pub background_interval_ms: u64,
    pub paused_interval_ms: u64,
}

impl Default for LocationIntervalPolicy {
    fn default() -> Self {
        Self {
            foreground_interval_ms: 1_000,
            background_interval_ms: 5_000,
            paused_interval_ms: 10_000,
        }
    }
}

/// Lifecycle coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct LifecycleConfig {
    /// Snapshot age after which an active run is considered abandoned (ms). Default: 5 min
    pub staleness_threshold_ms: i64,
    /// Name of the periodic background task registered with the OS
    pub background_task_name: String,
    /// Interval of the periodic background task and heartbeat timer (ms). Default: 60s
    pub background_interval_ms: u64,
    /// Version string stamped into every snapshot
    pub app_version: String,
    pub location_intervals: LocationIntervalPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: 5 * 60 * 1000,
            background_task_name: "run-continuity-background".to_string(),
            background_interval_ms: 60_000,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            location_intervals: LocationIntervalPolicy::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.staleness_threshold_ms <= 0 {
            return Err(RunError::config("staleness_threshold_ms must be positive"));
        }
        if self.background_task_name.trim().is_empty() {
            return Err(RunError::config("background_task_name must not be empty"));
        }
        if self.background_interval_ms == 0 {
            return Err(RunError::config("background_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Complete configuration for a [`crate::RunContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct RunConfig {
    pub motion: MotionConfig,
    pub auto_pause: AutoPauseConfig,
    pub lifecycle: LifecycleConfig,
}

impl RunConfig {
    /// Parse a host-provided JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RunConfig =
            serde_json::from_str(json).map_err(|e| RunError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.motion.validate()?;
        self.auto_pause.validate()?;
        self.lifecycle.validate()
    }
}
