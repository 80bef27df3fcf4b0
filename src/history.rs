//! Ordered histories owned by the motion engine.
//!
//! `LocationHistory` is append-only with strictly increasing timestamps and a
//! cached cumulative distance. `MotionHistory` keeps recent classification
//! results with bounded retention.

use std::collections::VecDeque;

use crate::geo_utils;
use crate::{LocationSample, MotionState, MotionStateRecord};

/// Append-only GPS history in arrival order.
#[derive(Debug, Clone, Default)]
pub struct LocationHistory {
    samples: Vec<LocationSample>,
    total_distance: f64,
}

impl LocationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sample` if its timestamp is strictly after the last one.
    /// Returns false (and leaves the history untouched) otherwise.
    pub fn push(&mut self, sample: LocationSample) -> bool {
        if let Some(last) = self.samples.last() {
            if sample.timestamp <= last.timestamp {
                return false;
            }
            self.total_distance += geo_utils::sample_distance(last, &sample);
        }
        self.samples.push(sample);
        true
    }

    pub fn samples(&self) -> &[LocationSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&LocationSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&LocationSample> {
        self.samples.last()
    }

    /// Cached sum of all consecutive-pair distances (meters).
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Milliseconds between first and last sample.
    pub fn elapsed_ms(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Samples with `timestamp >= now - window_ms`.
    ///
    /// Timestamps are sorted, so this is a binary search rather than a scan.
    pub fn trailing_window(&self, now: i64, window_ms: i64) -> &[LocationSample] {
        let cutoff = now.saturating_sub(window_ms);
        let start = self.samples.partition_point(|s| s.timestamp < cutoff);
        &self.samples[start..]
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total_distance = 0.0;
    }
}

/// Recent motion classifications, oldest first.
#[derive(Debug, Clone)]
pub struct MotionHistory {
    records: VecDeque<MotionStateRecord>,
    retention_ms: i64,
    max_records: usize,
}

impl MotionHistory {
    pub fn new(retention_ms: i64, max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            retention_ms,
            max_records: max_records.max(1),
        }
    }

    pub fn set_retention(&mut self, retention_ms: i64, max_records: usize) {
        self.retention_ms = retention_ms;
        self.max_records = max_records.max(1);
        if let Some(latest) = self.records.back().map(|r| r.timestamp) {
            self.prune(latest);
        }
    }

    pub fn push(&mut self, record: MotionStateRecord) {
        self.records.push_back(record);
        self.prune(record.timestamp);
    }

    fn prune(&mut self, now: i64) {
        let cutoff = now.saturating_sub(self.retention_ms);
        while self.records.len() > 1 {
            let Some(front) = self.records.front() else {
                break;
            };
            if front.timestamp < cutoff || self.records.len() > self.max_records {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time span ending at `now` over which records are uninterrupted
    /// `state`, walking backward from the newest record.
    ///
    /// Records newer than `now` are ignored. Returns 0 when the newest record
    /// at or before `now` is a different state.
    pub fn consecutive_duration(&self, state: MotionState, now: i64) -> i64 {
        let mut earliest: Option<i64> = None;
        for record in self.records.iter().rev() {
            if record.timestamp > now {
                continue;
            }
            if record.state != state {
                break;
            }
            earliest = Some(record.timestamp);
        }
        earliest.map(|start| (now - start).max(0)).unwrap_or(0)
    }

    pub fn latest(&self) -> Option<&MotionStateRecord> {
        self.records.back()
    }

    pub fn records(&self) -> impl Iterator<Item = &MotionStateRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
