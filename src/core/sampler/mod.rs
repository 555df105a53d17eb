//! Process sampling core functionality.
//!
//! This module provides the business logic for turning raw per-process
//! counters into a published metrics snapshot: rate estimation,
//! accelerator merging, filtering, rendering and the cycle loop.

mod accelerator;
mod filter;
mod metrics;
mod rate;
pub mod scheduler;
pub mod snapshot;

pub use accelerator::{
    merge as merge_accelerators, AcceleratorCollector, AcceleratorMap, AcceleratorSource,
    MemoryRow, UtilizationRow,
};
pub use filter::FilterConfig;
pub use metrics::{AcceleratorSample, ProcessReport, ProcessSample};
pub use rate::{estimate, CounterAnomalyPolicy, PreviousSample, Rate, RateState};
pub use scheduler::{compute_rates, CycleSummary, Scheduler, SchedulerConfig};
pub use snapshot::{render, sanitize, SnapshotWriter, StagedSnapshot, SNAPSHOT_FILE};
