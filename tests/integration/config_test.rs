use clap::Parser;
use procstat_textfile::core::sampler::CounterAnomalyPolicy;
use procstat_textfile::Config;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Result<Config, clap::Error> {
    let mut argv = vec!["procstat-textfile"];
    argv.extend_from_slice(args);
    Config::try_parse_from(argv)
}

#[test]
fn test_config_defaults() {
    let config = parse(&[]).unwrap();
    assert_eq!(config.interval(), Duration::from_secs(5));
    assert_eq!(config.output_dir, PathBuf::from("/textfile"));
    assert_eq!(config.top_n, 0);
    assert_eq!(config.min_rss_bytes, 0);
    assert_eq!(config.min_cpu_percent, 0.0);
    assert_eq!(config.procfs_path, PathBuf::from("/host/proc"));
    assert_eq!(config.counter_anomaly, CounterAnomalyPolicy::Clamp);
    assert_eq!(config.gpu_timeout(), Some(Duration::from_secs(10)));
    assert!(!config.once);
}

#[test]
fn test_config_flags_override_defaults() {
    let config = parse(&[
        "--interval-seconds",
        "15",
        "--output-dir",
        "/var/lib/textfile",
        "--top-n",
        "20",
        "--min-rss-bytes",
        "1000",
        "--min-cpu-percent",
        "0.5",
        "--procfs-path",
        "/proc",
        "--counter-anomaly",
        "warn",
        "--gpu-timeout-seconds",
        "0",
        "--once",
    ])
    .unwrap();

    let scheduler = config.scheduler();
    assert_eq!(scheduler.interval, Duration::from_secs(15));
    assert_eq!(scheduler.filter.top_n, 20);
    assert_eq!(scheduler.filter.min_rss_bytes, 1000);
    assert_eq!(scheduler.filter.min_cpu_percent, 0.5);
    assert_eq!(scheduler.anomaly_policy, CounterAnomalyPolicy::Warn);
    assert_eq!(config.output_dir, PathBuf::from("/var/lib/textfile"));
    assert_eq!(config.gpu_timeout(), None);
    assert!(config.once);
}

#[test]
fn test_config_accepts_zero_interval() {
    let config = parse(&["--interval-seconds", "0"]).unwrap();
    assert_eq!(config.scheduler().interval, Duration::ZERO);
    assert!(parse(&["--interval-seconds", "-1"]).is_err());
}

#[test]
fn test_config_rejects_negative_cpu_threshold() {
    assert!(parse(&["--min-cpu-percent=-1"]).is_err());
    assert!(parse(&["--min-cpu-percent", "lots"]).is_err());
}

#[test]
fn test_config_rejects_unknown_anomaly_policy() {
    assert!(parse(&["--counter-anomaly", "panic"]).is_err());
}
