//! Engine-wide metrics snapshot: buffer pool occupancy plus the
//! profiler's submit/readback counters, combined into one serializable
//! struct for harness callers (spec §4.9, SPEC_FULL.md A.5).

use serde::Serialize;

use crate::gpu::PoolStats;
use crate::profiler::ProfilerSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub pool: PoolStatsView,
    pub profiler: ProfilerSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsView {
    pub bytes_allocated: u64,
    pub peak_bytes_allocated: u64,
    pub live_count: u64,
    pub free_count: u64,
}

impl From<PoolStats> for PoolStatsView {
    fn from(s: PoolStats) -> Self {
        Self {
            bytes_allocated: s.bytes_allocated,
            peak_bytes_allocated: s.peak_bytes_allocated,
            live_count: s.live_count,
            free_count: s.free_count,
        }
    }
}

pub fn snapshot(pool: PoolStats, profiler: ProfilerSnapshot) -> EngineSnapshot {
    EngineSnapshot {
        pool: pool.into(),
        profiler,
    }
}
