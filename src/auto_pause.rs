//! Auto-pause / auto-resume decision process.
//!
//! The detector is an explicit state machine driven by each appended
//! [`MotionStateRecord`]:
//!
//! ```text
//!            stationary                 stationary >= pause threshold
//!   Moving ─────────────▶ StationaryCandidate ─────────────────────▶ Paused
//!     ▲                          │                                     │
//!     └──────── moving ──────────┘                                     │
//!     └──────────────── moving >= resume threshold ────────────────────┘
//! ```
//!
//! Events are edge-triggered: entering `Paused` fires once, leaving it fires
//! once, and repeated evaluations inside either state fire nothing. After a
//! fired transition the opposite one is held back for `debounce_ms`.

use serde::{Deserialize, Serialize};

use crate::config::AutoPauseConfig;
use crate::history::MotionHistory;
use crate::{MotionState, MotionStateRecord};

/// Phase of the auto-pause state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoPausePhase {
    Moving,
    StationaryCandidate,
    Paused,
}

/// Notification emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum MotionEvent {
    AutoPaused {
        timestamp: i64,
        stationary_ms: i64,
    },
    AutoResumed {
        timestamp: i64,
        moving_ms: i64,
        state: MotionState,
    },
}

impl MotionEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            MotionEvent::AutoPaused { timestamp, .. } => *timestamp,
            MotionEvent::AutoResumed { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutoPauseDetector {
    config: AutoPauseConfig,
    phase: AutoPausePhase,
    last_transition_at: Option<i64>,
}

impl AutoPauseDetector {
    pub fn new(config: AutoPauseConfig) -> Self {
        Self {
            config,
            phase: AutoPausePhase::Moving,
            last_transition_at: None,
        }
    }

    pub fn phase(&self) -> AutoPausePhase {
        self.phase
    }

    pub fn config(&self) -> &AutoPauseConfig {
        &self.config
    }

    /// Replace thresholds; the current phase is kept.
    pub fn set_config(&mut self, config: AutoPauseConfig) {
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.phase = AutoPausePhase::Moving;
        self.last_transition_at = None;
    }

    fn debounced(&self, now: i64) -> bool {
        self.last_transition_at
            .map(|at| now - at >= self.config.debounce_ms)
            .unwrap_or(true)
    }

    /// Advance the state machine with a freshly appended record.
    ///
    /// `history` must already contain `record`.
    pub fn evaluate(&mut self, record: &MotionStateRecord, history: &MotionHistory) -> Option<MotionEvent> {
        if !self.config.enabled {
            return None;
        }
        let now = record.timestamp;

        match (record.state, self.phase) {
            (MotionState::Stationary, AutoPausePhase::Paused) => None,
            (MotionState::Stationary, _) => {
                self.phase = AutoPausePhase::StationaryCandidate;
                let stationary_ms = history.consecutive_duration(MotionState::Stationary, now);
                if stationary_ms >= self.config.pause_threshold_ms && self.debounced(now) {
                    self.phase = AutoPausePhase::Paused;
                    self.last_transition_at = Some(now);
                    Some(MotionEvent::AutoPaused {
                        timestamp: now,
                        stationary_ms,
                    })
                } else {
                    None
                }
            }
            (state, AutoPausePhase::Paused) => {
                let moving_ms = history.consecutive_duration(state, now);
                if moving_ms >= self.config.resume_threshold_ms && self.debounced(now) {
                    self.phase = AutoPausePhase::Moving;
                    self.last_transition_at = Some(now);
                    Some(MotionEvent::AutoResumed {
                        timestamp: now,
                        moving_ms,
                        state,
                    })
                } else {
                    None
                }
            }
            (_, _) => {
                self.phase = AutoPausePhase::Moving;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoPauseConfig {
        AutoPauseConfig {
            enabled: true,
            pause_threshold_ms: 10_000,
            resume_threshold_ms: 3_000,
            debounce_ms: 2_000,
        }
    }

    /// Feed one record per second and collect the events.
    fn drive(detector: &mut AutoPauseDetector, history: &mut MotionHistory, states: &[(MotionState, i64)]) -> Vec<MotionEvent> {
        let mut events = Vec::new();
        for &(state, timestamp) in states {
            let record = MotionStateRecord { state, timestamp };
            history.push(record);
            events.extend(detector.evaluate(&record, history));
        }
        events
    }

    fn series(state: MotionState, from_s: i64, to_s: i64) -> Vec<(MotionState, i64)> {
        (from_s..to_s).map(|s| (state, s * 1_000)).collect()
    }

    #[test]
    fn test_pause_fires_once_per_stationary_run() {
        let mut detector = AutoPauseDetector::new(config());
        let mut history = MotionHistory::new(600_000, 1_000);

        let events = drive(&mut detector, &mut history, &series(MotionState::Stationary, 0, 40));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MotionEvent::AutoPaused { timestamp: 10_000, .. }));
        assert_eq!(detector.phase(), AutoPausePhase::Paused);
    }

    #[test]
    fn test_short_stop_does_not_pause() {
        let mut detector = AutoPauseDetector::new(config());
        let mut history = MotionHistory::new(600_000, 1_000);

        let mut states = series(MotionState::Running, 0, 10);
        states.extend(series(MotionState::Stationary, 10, 15));
        states.extend(series(MotionState::Running, 15, 30));

        let events = drive(&mut detector, &mut history, &states);
        assert!(events.is_empty());
        assert_eq!(detector.phase(), AutoPausePhase::Moving);
    }

    #[test]
    fn test_resume_after_pause() {
        let mut detector = AutoPauseDetector::new(config());
        let mut history = MotionHistory::new(600_000, 1_000);

        let mut states = series(MotionState::Stationary, 0, 20);
        states.extend(series(MotionState::Walking, 20, 40));

        let events = drive(&mut detector, &mut history, &states);
        assert_eq!(events.len(), 2);
        match events[1] {
            MotionEvent::AutoResumed { timestamp, state, .. } => {
                assert_eq!(timestamp, 23_000);
                assert_eq!(state, MotionState::Walking);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_debounce_holds_back_resume() {
        let mut detector = AutoPauseDetector::new(AutoPauseConfig {
            resume_threshold_ms: 0,
            debounce_ms: 5_000,
            ..config()
        });
        let mut history = MotionHistory::new(600_000, 1_000);

        let mut states = series(MotionState::Stationary, 0, 11);
        states.extend(series(MotionState::Running, 11, 20));

        let events = drive(&mut detector, &mut history, &states);
        assert_eq!(events.len(), 2);
        // Paused at 10s, resume allowed no earlier than 15s
        assert_eq!(events[1].timestamp(), 15_000);
    }

    #[test]
    fn test_disabled_never_fires() {
        let mut detector = AutoPauseDetector::new(AutoPauseConfig {
            enabled: false,
            ..config()
        });
        let mut history = MotionHistory::new(600_000, 1_000);
        let events = drive(&mut detector, &mut history, &series(MotionState::Stationary, 0, 60));
        assert!(events.is_empty());
    }
}
