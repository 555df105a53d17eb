//! Host-wide constants needed to turn raw procfs counters into units.

use sysinfo::System;

const FALLBACK_TICKS_PER_SECOND: u64 = 100;
const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Kernel parameters used to scale per-process counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostParams {
    /// Clock ticks per second (`USER_HZ`)
    pub ticks_per_second: u64,
    /// Page size in bytes
    pub page_size: u64,
}

impl HostParams {
    /// Read the parameters of the running kernel.
    pub fn detect() -> Self {
        Self {
            ticks_per_second: nonzero_or(::procfs::ticks_per_second(), FALLBACK_TICKS_PER_SECOND),
            page_size: nonzero_or(::procfs::page_size(), FALLBACK_PAGE_SIZE),
        }
    }
}

impl Default for HostParams {
    fn default() -> Self {
        Self {
            ticks_per_second: FALLBACK_TICKS_PER_SECOND,
            page_size: FALLBACK_PAGE_SIZE,
        }
    }
}

fn nonzero_or(value: u64, fallback: u64) -> u64 {
    if value > 0 {
        value
    } else {
        fallback
    }
}

/// Host name used for the `instance` label (unsanitized).
pub fn host_name() -> String {
    System::host_name().unwrap_or_else(|| "unknown".to_string())
}
