//! Crash-recoverable app state.
//!
//! The snapshot is stored as JSON under a single key so that any reader
//! either sees the previous complete value or the new complete value.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunError};

/// Storage key for the recovery snapshot.
pub const APP_STATE_KEY: &str = "run_continuity.app_state";

/// Minimal state needed to recover an in-progress run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct AppStateSnapshot {
    pub active_run_id: Option<String>,
    /// Unix millis
    pub run_start_time: Option<i64>,
    pub is_paused: bool,
    /// Unix millis of the last successful write
    pub last_save_time: i64,
    pub app_version: String,
}

impl AppStateSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode stored bytes. Anything that is not a well-formed snapshot
    /// document is reported as [`RunError::CorruptedSnapshot`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: AppStateSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.active_run_id.as_deref().is_some_and(str::is_empty) {
            return Err(RunError::CorruptedSnapshot {
                message: "empty activeRunId".to_string(),
            });
        }
        Ok(snapshot)
    }

    /// Milliseconds since the last save, never negative.
    pub fn age_ms(&self, now: i64) -> i64 {
        (now - self.last_save_time).max(0)
    }

    pub fn has_active_run(&self) -> bool {
        self.active_run_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> AppStateSnapshot {
        AppStateSnapshot {
            active_run_id: Some("run-42".to_string()),
            run_start_time: Some(1_700_000_000_000),
            is_paused: false,
            last_save_time: 1_700_000_600_000,
            app_version: "2.3.1".to_string(),
        }
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = String::from_utf8(snapshot().encode().unwrap()).unwrap();
        assert!(json.contains("\"activeRunId\":\"run-42\""));
        assert!(json.contains("\"lastSaveTime\":1700000600000"));
        assert_eq!(AppStateSnapshot::decode(json.as_bytes()).unwrap(), snapshot());
    }

    #[test]
    fn test_corrupted_payloads() {
        for payload in [
            &b"not json at all"[..],
            &b"{\"activeRunId\": \"run-1\""[..],
            &b"[1, 2, 3]"[..],
            &b"{\"activeRunId\": 7, \"isPaused\": false, \"lastSaveTime\": 0, \"appVersion\": \"1\"}"[..],
            &b"{\"activeRunId\": \"\", \"isPaused\": false, \"lastSaveTime\": 0, \"appVersion\": \"1\"}"[..],
            &[0xff, 0xfe, 0x00][..],
        ] {
            assert!(matches!(
                AppStateSnapshot::decode(payload),
                Err(RunError::CorruptedSnapshot { .. })
            ));
        }
    }

    #[test]
    fn test_age() {
        let snap = snapshot();
        assert_eq!(snap.age_ms(snap.last_save_time + 60_000), 60_000);
        assert_eq!(snap.age_ms(snap.last_save_time - 1), 0);
    }
}
