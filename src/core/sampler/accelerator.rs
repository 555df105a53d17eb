//! Per-process accelerator usage.
//!
//! The source trait abstracts the external status tool: each query returns
//! typed rows, and tool-specific text parsing lives with the implementation
//! in the platform layer.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use super::metrics::AcceleratorSample;
use crate::error::{ProcstatError, Result};

/// One row of the utilization query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilizationRow {
    pub device_index: String,
    pub pid: u32,
    pub sm_percent: u32,
    pub mem_percent: u32,
}

/// One row of the memory query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub pid: u32,
    pub framebuffer_mib: u64,
    pub device_index: String,
}

/// Accelerator samples grouped by pid.
pub type AcceleratorMap = HashMap<u32, Vec<AcceleratorSample>>;

/// Trait for per-process accelerator usage providers
pub trait AcceleratorSource {
    /// Instantaneous compute and memory-bandwidth utilization per (device, pid)
    fn utilization(&self) -> impl Future<Output = Result<Vec<UtilizationRow>>> + Send;

    /// Resident accelerator memory per (pid, device)
    fn memory(&self) -> impl Future<Output = Result<Vec<MemoryRow>>> + Send;
}

/// Runs both queries and merges them. A failing query contributes nothing.
pub struct AcceleratorCollector<S> {
    source: S,
}

impl<S: AcceleratorSource> AcceleratorCollector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn collect(&self) -> AcceleratorMap {
        let utilization = degrade("utilization", self.source.utilization().await);
        let memory = degrade("memory", self.source.memory().await);
        merge(utilization, memory)
    }
}

fn degrade<T>(query: &str, result: Result<Vec<T>>) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e @ ProcstatError::ToolTimeout { .. }) => {
            log::warn!("Accelerator {} query skipped: {}", query, e);
            Vec::new()
        }
        Err(e) => {
            log::debug!("Accelerator {} query skipped: {}", query, e);
            Vec::new()
        }
    }
}

/// Merge both query results keyed by (pid, device). Fields missing from one
/// side are 0.
pub fn merge(utilization: Vec<UtilizationRow>, memory: Vec<MemoryRow>) -> AcceleratorMap {
    let mut merged: BTreeMap<(u32, String), AcceleratorSample> = BTreeMap::new();

    for row in utilization {
        let entry = merged
            .entry((row.pid, row.device_index.clone()))
            .or_insert_with(|| AcceleratorSample {
                pid: row.pid,
                device_index: row.device_index,
                ..Default::default()
            });
        entry.sm_percent = row.sm_percent;
        entry.mem_percent = row.mem_percent;
    }

    for row in memory {
        let entry = merged
            .entry((row.pid, row.device_index.clone()))
            .or_insert_with(|| AcceleratorSample {
                pid: row.pid,
                device_index: row.device_index,
                ..Default::default()
            });
        entry.framebuffer_mib = row.framebuffer_mib;
    }

    let mut by_pid: AcceleratorMap = HashMap::new();
    for ((pid, _), sample) in merged {
        by_pid.entry(pid).or_default().push(sample);
    }
    by_pid
}
