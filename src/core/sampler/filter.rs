//! Inclusion thresholds and top-N truncation.

use std::cmp::Ordering;

use super::metrics::ProcessReport;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterConfig {
    /// Inclusive lower bound on resident memory
    pub min_rss_bytes: u64,
    /// Inclusive lower bound on CPU percent
    pub min_cpu_percent: f64,
    /// Keep at most this many processes; 0 keeps all
    pub top_n: usize,
}

impl FilterConfig {
    pub fn admits(&self, report: &ProcessReport) -> bool {
        report.sample.resident_bytes >= self.min_rss_bytes
            && report.cpu_percent >= self.min_cpu_percent
    }

    /// Drop reports below the thresholds, then keep the top N by
    /// (cpu_percent, resident_bytes) descending if a cap is set.
    pub fn apply(&self, reports: Vec<ProcessReport>) -> Vec<ProcessReport> {
        let mut kept: Vec<ProcessReport> = reports.into_iter().filter(|r| self.admits(r)).collect();

        if self.top_n > 0 && kept.len() > self.top_n {
            kept.sort_by(|a, b| rank(b, a));
            kept.truncate(self.top_n);
        }
        kept
    }
}

fn rank(a: &ProcessReport, b: &ProcessReport) -> Ordering {
    a.cpu_percent
        .total_cmp(&b.cpu_percent)
        .then(a.sample.resident_bytes.cmp(&b.sample.resident_bytes))
}
