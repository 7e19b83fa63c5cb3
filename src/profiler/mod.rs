//! Profiler / submit tracker (spec §4.9).
//!
//! Generalizes the rolling-histogram + atomic-counter shape of an
//! engine-wide metrics module down to the three scopes the orchestrator
//! actually cares about: `prefill`, `decode`, and everything else. When
//! `debug` is off, nothing here does a GPU readback or blocking wait —
//! submit counts are plain atomics, and timestamp resolution is skipped
//! entirely (spec §9 open question, decided: off by default).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Prefill,
    Decode,
    Other,
}

const SCOPE_COUNT: usize = 3;

fn scope_index(scope: Scope) -> usize {
    match scope {
        Scope::Prefill => 0,
        Scope::Decode => 1,
        Scope::Other => 2,
    }
}

struct RollingHistogram {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl RollingHistogram {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn record(&mut self, value_ms: f64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value_ms);
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Tracks GPU submission counts and (when resolved) timestamp deltas per
/// scope, plus total bytes read back from the device.
pub struct SubmitTracker {
    submit_counts: [AtomicU64; SCOPE_COUNT],
    readback_bytes: AtomicU64,
    timestamps: std::sync::Mutex<[RollingHistogram; SCOPE_COUNT]>,
    debug: bool,
}

impl SubmitTracker {
    pub fn new(debug: bool) -> Self {
        Self {
            submit_counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            readback_bytes: AtomicU64::new(0),
            timestamps: std::sync::Mutex::new([
                RollingHistogram::new(256),
                RollingHistogram::new(256),
                RollingHistogram::new(256),
            ]),
            debug,
        }
    }

    pub fn record_submit(&self, scope: Scope) {
        self.submit_counts[scope_index(scope)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_readback_bytes(&self, bytes: u64) {
        self.readback_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Materialize a resolved GPU timestamp delta (milliseconds) into the
    /// scope's rolling histogram. A no-op when `debug` is off, matching
    /// the "no readbacks or sync points on the hot path" contract.
    pub fn resolve(&self, scope: Scope, delta_ms: f64) {
        if !self.debug {
            return;
        }
        let mut hists = self.timestamps.lock().expect("profiler mutex poisoned");
        hists[scope_index(scope)].record(delta_ms);
    }

    pub fn snapshot(&self) -> ProfilerSnapshot {
        let hists = self.timestamps.lock().expect("profiler mutex poisoned");
        ProfilerSnapshot {
            prefill_submits: self.submit_counts[scope_index(Scope::Prefill)].load(Ordering::Relaxed),
            decode_submits: self.submit_counts[scope_index(Scope::Decode)].load(Ordering::Relaxed),
            other_submits: self.submit_counts[scope_index(Scope::Other)].load(Ordering::Relaxed),
            readback_bytes: self.readback_bytes.load(Ordering::Relaxed),
            prefill_avg_ms: hists[scope_index(Scope::Prefill)].average(),
            decode_avg_ms: hists[scope_index(Scope::Decode)].average(),
            prefill_samples: hists[scope_index(Scope::Prefill)].count(),
            decode_samples: hists[scope_index(Scope::Decode)].count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilerSnapshot {
    pub prefill_submits: u64,
    pub decode_submits: u64,
    pub other_submits: u64,
    pub readback_bytes: u64,
    pub prefill_avg_ms: f64,
    pub decode_avg_ms: f64,
    pub prefill_samples: usize,
    pub decode_samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_counts_accumulate_per_scope() {
        let tracker = SubmitTracker::new(false);
        tracker.record_submit(Scope::Prefill);
        tracker.record_submit(Scope::Prefill);
        tracker.record_submit(Scope::Decode);

        let snap = tracker.snapshot();
        assert_eq!(snap.prefill_submits, 2);
        assert_eq!(snap.decode_submits, 1);
        assert_eq!(snap.other_submits, 0);
    }

    #[test]
    fn resolve_is_noop_when_debug_off() {
        let tracker = SubmitTracker::new(false);
        tracker.resolve(Scope::Decode, 5.0);
        assert_eq!(tracker.snapshot().decode_samples, 0);
    }

    #[test]
    fn resolve_records_when_debug_on() {
        let tracker = SubmitTracker::new(true);
        tracker.resolve(Scope::Decode, 5.0);
        tracker.resolve(Scope::Decode, 7.0);
        let snap = tracker.snapshot();
        assert_eq!(snap.decode_samples, 2);
        assert!((snap.decode_avg_ms - 6.0).abs() < 1e-6);
    }
}
