//! CPU rate estimation from cumulative tick counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Lower bound on elapsed time, guards the division.
const MIN_ELAPSED_SECS: f64 = 1e-3;

/// Counters observed for one pid in the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousSample {
    pub ticks: u64,
    pub at: Instant,
}

/// Per-pid counters from the immediately preceding cycle only.
///
/// Never updated in place: each cycle builds a fresh state from what it
/// sampled, so a pid missing from a cycle is forgotten.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    previous: HashMap<u32, PreviousSample>,
}

impl RateState {
    pub fn get(&self, pid: u32) -> Option<PreviousSample> {
        self.previous.get(&pid).copied()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl FromIterator<(u32, u64, Instant)> for RateState {
    fn from_iter<I: IntoIterator<Item = (u32, u64, Instant)>>(iter: I) -> Self {
        Self {
            previous: iter
                .into_iter()
                .map(|(pid, ticks, at)| (pid, PreviousSample { ticks, at }))
                .collect(),
        }
    }
}

/// What the estimator could say about one pid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    Measured(f64),
    /// No previous sample for this pid.
    FirstObservation,
    /// Counter went backwards: wraparound or the pid was reused.
    CounterAnomaly { previous: u64, current: u64 },
}

impl Rate {
    /// Reported percentage. Never negative.
    pub fn percent(&self) -> f64 {
        match *self {
            Rate::Measured(percent) => percent,
            Rate::FirstObservation | Rate::CounterAnomaly { .. } => 0.0,
        }
    }
}

/// What to do when a counter goes backwards. The reported rate is 0% either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CounterAnomalyPolicy {
    /// Report 0% silently
    #[default]
    Clamp,
    /// Report 0% and log a warning
    Warn,
}

/// CPU utilisation of one process since its previous sample.
///
/// `percent = delta_ticks / ticks_per_second / elapsed_seconds * 100`
pub fn estimate(
    current_ticks: u64,
    previous: Option<PreviousSample>,
    now: Instant,
    ticks_per_second: u64,
) -> Rate {
    let Some(previous) = previous else {
        return Rate::FirstObservation;
    };
    if current_ticks < previous.ticks {
        return Rate::CounterAnomaly {
            previous: previous.ticks,
            current: current_ticks,
        };
    }

    let elapsed = now
        .checked_duration_since(previous.at)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
        .max(MIN_ELAPSED_SECS);
    let delta = (current_ticks - previous.ticks) as f64;
    let ticks_per_second = ticks_per_second.max(1) as f64;

    Rate::Measured(delta / ticks_per_second / elapsed * 100.0)
}
