use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::sampler::{CounterAnomalyPolicy, FilterConfig, SchedulerConfig};

/// Sampler configuration. Every option can be given as a flag or through
/// the environment variable named next to it; flags win.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procstat-textfile",
    version,
    about = "Publish per-process CPU, memory and GPU usage as a Prometheus textfile"
)]
pub struct Config {
    /// Seconds between the start of two sampling cycles (0 runs cycles back to back)
    #[arg(long, env = "INTERVAL_SECONDS", default_value_t = 5)]
    pub interval_seconds: u64,

    /// Directory that receives procstats.prom
    #[arg(long, env = "OUTPUT_DIR", default_value = "/textfile")]
    pub output_dir: PathBuf,

    /// Emit only the N busiest processes (0 disables the cap)
    #[arg(long, env = "TOP_N", default_value_t = 0)]
    pub top_n: usize,

    /// Skip processes with a smaller resident set
    #[arg(long, env = "MIN_RSS_BYTES", default_value_t = 0)]
    pub min_rss_bytes: u64,

    /// Skip processes using less CPU
    #[arg(long, env = "MIN_CPU_PERCENT", default_value_t = 0.0, value_parser = parse_non_negative)]
    pub min_cpu_percent: f64,

    /// Root of the process-information tree
    #[arg(long, env = "PROCFS_PATH", default_value = "/host/proc")]
    pub procfs_path: PathBuf,

    /// passwd-format file used to map owner uids to names
    #[arg(long, env = "PASSWD_PATH", default_value = "/etc/passwd")]
    pub passwd_path: PathBuf,

    /// Accelerator status tool, resolved on PATH
    #[arg(long, env = "GPU_TOOL", default_value = "nvidia-smi")]
    pub gpu_tool: String,

    /// Kill an accelerator query after this many seconds (0 waits forever)
    #[arg(long, env = "GPU_TIMEOUT_SECONDS", default_value_t = 10)]
    pub gpu_timeout_seconds: u64,

    /// Reaction to CPU counters going backwards
    #[arg(long, env = "COUNTER_ANOMALY", value_enum, default_value_t = CounterAnomalyPolicy::Clamp)]
    pub counter_anomaly: CounterAnomalyPolicy,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

fn parse_non_negative(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("{} is not a non-negative number", raw))
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn gpu_timeout(&self) -> Option<Duration> {
        (self.gpu_timeout_seconds > 0).then(|| Duration::from_secs(self.gpu_timeout_seconds))
    }

    pub fn filter(&self) -> FilterConfig {
        FilterConfig {
            min_rss_bytes: self.min_rss_bytes,
            min_cpu_percent: self.min_cpu_percent,
            top_n: self.top_n,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval(),
            filter: self.filter(),
            anomaly_policy: self.counter_anomaly,
        }
    }
}
