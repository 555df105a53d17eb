//! The sampling loop.
//!
//! One cycle: enumerate, sample, estimate rates against the previous
//! cycle, collect accelerator usage, filter, publish. Then sleep for what
//! is left of the interval. The rate state is owned here and replaced
//! wholesale by every cycle.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use super::accelerator::{AcceleratorCollector, AcceleratorSource};
use super::filter::FilterConfig;
use super::metrics::{ProcessReport, ProcessSample};
use super::rate::{estimate, CounterAnomalyPolicy, Rate, RateState};
use super::snapshot::{render, SnapshotWriter};
use crate::error::ProcstatError;
use crate::platform::procfs::ProcfsRoot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub filter: FilterConfig,
    pub anomaly_policy: CounterAnomalyPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            filter: FilterConfig::default(),
            anomaly_policy: CounterAnomalyPolicy::default(),
        }
    }
}

/// Outcome of one cycle, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub enumerated: usize,
    pub sampled: usize,
    pub emitted: usize,
    pub anomalies: usize,
    pub published: Option<PathBuf>,
}

pub struct Scheduler<S> {
    procfs: ProcfsRoot,
    accelerators: AcceleratorCollector<S>,
    writer: SnapshotWriter,
    instance: String,
    config: SchedulerConfig,
    rates: RateState,
}

impl<S: AcceleratorSource> Scheduler<S> {
    /// `instance` must already be sanitized.
    pub fn new(
        procfs: ProcfsRoot,
        source: S,
        writer: SnapshotWriter,
        instance: String,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            procfs,
            accelerators: AcceleratorCollector::new(source),
            writer,
            instance,
            config,
            rates: RateState::default(),
        }
    }

    pub fn rate_state(&self) -> &RateState {
        &self.rates
    }

    /// Run one full cycle using `now` as this cycle's sample time.
    pub async fn run_cycle(&mut self, now: Instant) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let pids = match self.procfs.enumerate() {
            Ok(pids) => pids,
            Err(e) => {
                log::warn!("{}", e);
                Vec::new()
            }
        };
        summary.enumerated = pids.len();

        let samples = self.sample_all(&pids);
        summary.sampled = samples.len();

        let previous = std::mem::take(&mut self.rates);
        let (rated, next) = compute_rates(
            samples,
            &previous,
            now,
            self.procfs.host().ticks_per_second,
        );
        self.rates = next;

        let mut accelerators = self.accelerators.collect().await;

        let mut reports = Vec::with_capacity(rated.len());
        for (sample, rate) in rated {
            if let Rate::CounterAnomaly { previous, current } = rate {
                summary.anomalies += 1;
                if self.config.anomaly_policy == CounterAnomalyPolicy::Warn {
                    log::warn!(
                        "CPU ticks of pid {} went backwards ({} -> {}); reporting 0%",
                        sample.pid,
                        previous,
                        current
                    );
                }
            }
            let devices = accelerators.remove(&sample.pid).unwrap_or_default();
            reports.push(ProcessReport {
                sample,
                cpu_percent: rate.percent(),
                devices,
            });
        }

        let reports = self.config.filter.apply(reports);
        summary.emitted = reports.len();

        let lines = render(&reports, &self.instance);
        match self.writer.publish(&lines) {
            Ok(path) => summary.published = Some(path),
            Err(e) => log::warn!("Snapshot dropped this cycle: {}", e),
        }

        summary
    }

    fn sample_all(&self, pids: &[u32]) -> Vec<ProcessSample> {
        let mut samples = Vec::with_capacity(pids.len());
        for &pid in pids {
            match self.procfs.sample(pid) {
                Ok(sample) => samples.push(sample),
                Err(e) if e.is_transient() => log::trace!("{}", e),
                Err(e @ ProcstatError::MalformedRecord { .. }) => log::debug!("{}", e),
                Err(e) => log::debug!("Skipping pid {}: {}", pid, e),
            }
        }
        samples
    }

    /// Cycle until a shutdown signal arrives. Shutdown is only observed
    /// between cycles; a cycle in progress always completes.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        log::info!(
            "Sampling {:?} every {:?} into {:?}",
            self.procfs.path(),
            self.config.interval,
            self.writer.path()
        );

        loop {
            let started = Instant::now();
            let summary = self.run_cycle(started).await;
            let elapsed = started.elapsed();
            log::debug!(
                "Cycle done in {:?}: {} pids, {} sampled, {} emitted",
                elapsed,
                summary.enumerated,
                summary.sampled,
                summary.emitted
            );

            let remaining = self.config.interval.saturating_sub(elapsed);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.recv() => {
                    log::info!("Shutdown requested, stopping sampler");
                    break;
                }
            }
        }
    }
}

/// Pair every sample with its rate and build the state for the next cycle.
///
/// The returned state holds exactly the pids in `samples`.
pub fn compute_rates(
    samples: Vec<ProcessSample>,
    previous: &RateState,
    now: Instant,
    ticks_per_second: u64,
) -> (Vec<(ProcessSample, Rate)>, RateState) {
    let next: RateState = samples
        .iter()
        .map(|s| (s.pid, s.cumulative_cpu_ticks, now))
        .collect();
    let rated = samples
        .into_iter()
        .map(|s| {
            let rate = estimate(
                s.cumulative_cpu_ticks,
                previous.get(s.pid),
                now,
                ticks_per_second,
            );
            (s, rate)
        })
        .collect();
    (rated, next)
}
