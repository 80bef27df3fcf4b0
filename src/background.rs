//! Background task types and the in-process heartbeat timer.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

/// Storage key for the number of background task executions.
pub const EXECUTION_COUNT_KEY: &str = "run_continuity.background.execution_count";
/// Storage key for the last background execution time (Unix millis, LE bytes).
pub const LAST_EXECUTION_KEY: &str = "run_continuity.background.last_execution";

/// Availability of background execution as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum BackgroundTaskStatus {
    Available,
    Restricted,
    Denied,
}

/// Outcome of one background task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum BackgroundTaskResult {
    NewData,
    NoData,
    Failed,
}

/// Handler the OS invokes for the periodic task.
pub type BackgroundTaskHandler = Arc<dyn Fn() -> BackgroundTaskResult + Send + Sync>;

/// Introspection view of the registered background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTaskDescriptor {
    pub task_name: String,
    pub is_registered: bool,
    pub execution_count: u64,
    pub status: BackgroundTaskStatus,
    pub last_execution_time: Option<i64>,
}

/// Repeating timer on a dedicated thread.
///
/// `cancel` (and `Drop`) stop the thread and wait for it, so no tick runs
/// after it returns.
pub struct PeriodicTimer {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    pub fn start<F>(name: &str, interval: Duration, tick: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    // Explicit stop or sender dropped
                    _ => break,
                }
            })?;
        debug!("[PeriodicTimer] Started '{}' every {:?}", name, interval);

        Ok(Self {
            name: name.to_string(),
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    pub fn cancel(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            // A tick that cancels its own timer must not join itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!("[PeriodicTimer] Cancelled '{}'", self.name);
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
