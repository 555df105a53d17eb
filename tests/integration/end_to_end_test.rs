use procstat_textfile::core::sampler::{
    AcceleratorSource, CounterAnomalyPolicy, FilterConfig, MemoryRow, Scheduler, SchedulerConfig,
    SnapshotWriter, UtilizationRow,
};
use procstat_textfile::platform::{HostParams, ProcfsRoot, UserTable};
use procstat_textfile::{ProcstatError, Result};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Default)]
struct FakeGpu {
    utilization: Vec<UtilizationRow>,
    memory: Vec<MemoryRow>,
}

impl AcceleratorSource for FakeGpu {
    async fn utilization(&self) -> Result<Vec<UtilizationRow>> {
        Ok(self.utilization.clone())
    }

    async fn memory(&self) -> Result<Vec<MemoryRow>> {
        Ok(self.memory.clone())
    }
}

struct NoGpu;

impl AcceleratorSource for NoGpu {
    async fn utilization(&self) -> Result<Vec<UtilizationRow>> {
        Err(ProcstatError::tool_unavailable("nvidia-smi not found"))
    }

    async fn memory(&self) -> Result<Vec<MemoryRow>> {
        Err(ProcstatError::tool_unavailable("nvidia-smi not found"))
    }
}

/// Synthetic process-information tree.
struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn spawn(&self, pid: u32, comm: &str, exe: &str) {
        let dir = self.path().join(pid.to_string());
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::write(dir.join("cmdline"), format!("{}\0--flag\0", exe)).unwrap();
        self.set_counters(pid, comm, 0, 0);
    }

    fn set_counters(&self, pid: u32, comm: &str, ticks: u64, rss_pages: u64) {
        let utime = ticks / 2;
        let stime = ticks - utime;
        let stat = format!(
            "{pid} ({comm}) R 1 {pid} {pid} 0 -1 4194304 0 0 0 0 {utime} {stime} 0 0 20 0 2 0 100 8388608 {rss_pages} \
             18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n"
        );
        fs::write(self.path().join(pid.to_string()).join("stat"), stat).unwrap();
    }

    fn kill(&self, pid: u32) {
        fs::remove_dir_all(self.path().join(pid.to_string())).unwrap();
    }

    fn owner_uid(&self, pid: u32) -> u32 {
        fs::metadata(self.path().join(pid.to_string())).unwrap().uid()
    }
}

fn scheduler<S: AcceleratorSource>(
    tree: &FakeProc,
    out: &TempDir,
    users: UserTable,
    host: HostParams,
    filter: FilterConfig,
    source: S,
) -> Scheduler<S> {
    let procfs = ProcfsRoot::new(tree.path(), users, host);
    let config = SchedulerConfig {
        interval: Duration::from_secs(1),
        filter,
        ..Default::default()
    };
    Scheduler::new(
        procfs,
        source,
        SnapshotWriter::prepare(out.path()).unwrap(),
        "test-host".to_string(),
        config,
    )
}

fn standard_host() -> HostParams {
    HostParams {
        ticks_per_second: 100,
        page_size: 4096,
    }
}

fn read_snapshot(out: &TempDir) -> String {
    fs::read_to_string(out.path().join("procstats.prom")).unwrap()
}

#[tokio::test]
async fn test_two_cycles_produce_expected_rate_and_memory() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(4242, "python3", "/usr/bin/python3");
    let uid = tree.owner_uid(4242);
    let users = UserTable::parse(&format!("alice:x:{}:{}::/home/alice:/bin/sh\n", uid, uid));
    let mut sched = scheduler(&tree, &out, users, standard_host(), FilterConfig::default(), NoGpu);

    let t0 = Instant::now();
    tree.set_counters(4242, "python3", 100, 256);
    let first = sched.run_cycle(t0).await;
    assert_eq!(first.sampled, 1);
    assert!(first.published.is_some());

    let labels = "pid=\"4242\",process=\"python3\",user=\"alice\",exe=\"_usr_bin_python3\",instance=\"test-host\"";
    let snapshot = read_snapshot(&out);
    assert!(snapshot.contains(&format!("proc_cpu_percent{{{}}} 0.0\n", labels)));

    tree.set_counters(4242, "python3", 350, 256);
    sched.run_cycle(t0 + Duration::from_secs(1)).await;

    let snapshot = read_snapshot(&out);
    assert!(
        snapshot.contains(&format!("proc_cpu_percent{{{}}} 250.0\n", labels)),
        "snapshot was:\n{}",
        snapshot
    );
    assert!(snapshot.contains(&format!("proc_memory_rss_bytes{{{}}} 1048576\n", labels)));
    assert!(snapshot.contains(&format!("proc_threads{{{}}} 2\n", labels)));
    assert!(snapshot.contains(&format!("proc_memory_vms_bytes{{{}}} 8388608\n", labels)));
    assert!(!snapshot.contains("proc_gpu_sm_percent{"));
}

#[tokio::test]
async fn test_accelerator_usage_is_attached_to_process() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(10, "trainer", "/opt/trainer");
    tree.spawn(11, "idle", "/bin/idle");
    let gpu = FakeGpu {
        utilization: vec![UtilizationRow {
            device_index: "0".to_string(),
            pid: 10,
            sm_percent: 87,
            mem_percent: 40,
        }],
        memory: vec![
            MemoryRow {
                pid: 10,
                framebuffer_mib: 8192,
                device_index: "0".to_string(),
            },
            MemoryRow {
                pid: 10,
                framebuffer_mib: 1024,
                device_index: "1".to_string(),
            },
            // not a sampled process: never emitted
            MemoryRow {
                pid: 999,
                framebuffer_mib: 64,
                device_index: "0".to_string(),
            },
        ],
    };
    let mut sched = scheduler(
        &tree,
        &out,
        UserTable::default(),
        standard_host(),
        FilterConfig::default(),
        gpu,
    );

    sched.run_cycle(Instant::now()).await;

    let snapshot = read_snapshot(&out);
    let uid = tree.owner_uid(10);
    let labels = format!(
        "pid=\"10\",process=\"trainer\",user=\"{}\",exe=\"_opt_trainer\",instance=\"test-host\"",
        uid
    );
    assert!(snapshot.contains(&format!("proc_gpu_sm_percent{{{},gpu=\"0\"}} 87\n", labels)));
    assert!(snapshot.contains(&format!("proc_gpu_mem_percent{{{},gpu=\"0\"}} 40\n", labels)));
    assert!(snapshot.contains(&format!("proc_gpu_fb_mem_mib{{{},gpu=\"0\"}} 8192\n", labels)));
    assert!(snapshot.contains(&format!("proc_gpu_sm_percent{{{},gpu=\"1\"}} 0\n", labels)));
    assert!(snapshot.contains(&format!("proc_gpu_fb_mem_mib{{{},gpu=\"1\"}} 1024\n", labels)));
    assert!(!snapshot.contains("pid=\"999\""));
    assert!(!snapshot.contains("proc_gpu_sm_percent{pid=\"11\""));
}

#[tokio::test]
async fn test_exited_process_is_dropped_and_not_resurrected() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(300, "worker", "/bin/worker");
    tree.set_counters(300, "worker", 1000, 10);
    let mut sched = scheduler(
        &tree,
        &out,
        UserTable::default(),
        standard_host(),
        FilterConfig::default(),
        NoGpu,
    );
    let t0 = Instant::now();

    sched.run_cycle(t0).await;
    assert!(sched.rate_state().get(300).is_some());

    tree.kill(300);
    let summary = sched.run_cycle(t0 + Duration::from_secs(1)).await;
    assert_eq!(summary.sampled, 0);
    assert!(sched.rate_state().get(300).is_none());
    assert!(!read_snapshot(&out).contains("pid=\"300\""));

    // pid reused by an unrelated process with a huge counter
    tree.spawn(300, "other", "/bin/other");
    tree.set_counters(300, "other", 50_000, 10);
    sched.run_cycle(t0 + Duration::from_secs(2)).await;

    let snapshot = read_snapshot(&out);
    assert!(snapshot.contains("proc_cpu_percent{pid=\"300\",process=\"other\""));
    let cpu_line = snapshot
        .lines()
        .find(|l| l.starts_with("proc_cpu_percent{pid=\"300\""))
        .unwrap();
    assert!(cpu_line.ends_with(" 0.0"), "unexpected line: {}", cpu_line);
}

#[tokio::test]
async fn test_min_rss_boundary_is_inclusive() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(1, "small", "/bin/small");
    tree.spawn(2, "exact", "/bin/exact");
    tree.set_counters(1, "small", 0, 999);
    tree.set_counters(2, "exact", 0, 1000);
    let host = HostParams {
        ticks_per_second: 100,
        page_size: 1,
    };
    let filter = FilterConfig {
        min_rss_bytes: 1000,
        ..Default::default()
    };
    let mut sched = scheduler(&tree, &out, UserTable::default(), host, filter, NoGpu);

    let summary = sched.run_cycle(Instant::now()).await;
    assert_eq!(summary.sampled, 2);
    assert_eq!(summary.emitted, 1);

    let snapshot = read_snapshot(&out);
    assert!(snapshot.contains("process=\"exact\""));
    assert!(!snapshot.contains("process=\"small\""));
}

#[tokio::test]
async fn test_malformed_process_is_skipped() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(5, "good", "/bin/good");
    tree.spawn(6, "bad", "/bin/bad");
    fs::write(tree.path().join("6").join("stat"), "6 (bad").unwrap();
    let mut sched = scheduler(
        &tree,
        &out,
        UserTable::default(),
        standard_host(),
        FilterConfig::default(),
        NoGpu,
    );

    let summary = sched.run_cycle(Instant::now()).await;
    assert_eq!(summary.enumerated, 2);
    assert_eq!(summary.sampled, 1);
    assert!(read_snapshot(&out).contains("process=\"good\""));
}

#[tokio::test]
async fn test_missing_process_tree_still_publishes_headers() {
    let out = TempDir::new().unwrap();
    let procfs = ProcfsRoot::new(
        out.path().join("no-such-tree"),
        UserTable::default(),
        standard_host(),
    );
    let mut sched = Scheduler::new(
        procfs,
        NoGpu,
        SnapshotWriter::prepare(out.path()).unwrap(),
        "test-host".to_string(),
        SchedulerConfig::default(),
    );

    let summary = sched.run_cycle(Instant::now()).await;
    assert_eq!(summary.enumerated, 0);
    let snapshot = read_snapshot(&out);
    assert!(snapshot.starts_with("# HELP proc_cpu_percent"));
    assert!(snapshot.lines().all(|l| l.starts_with('#')));
}

#[tokio::test]
async fn test_backwards_counter_reports_zero_and_is_counted() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(77, "restarted", "/bin/restarted");
    tree.spawn(78, "steady", "/bin/steady");
    tree.set_counters(77, "restarted", 5_000, 1);
    tree.set_counters(78, "steady", 100, 1);

    let procfs = ProcfsRoot::new(tree.path(), UserTable::default(), standard_host());
    let config = SchedulerConfig {
        interval: Duration::from_secs(1),
        anomaly_policy: CounterAnomalyPolicy::Warn,
        ..Default::default()
    };
    let mut sched = Scheduler::new(
        procfs,
        NoGpu,
        SnapshotWriter::prepare(out.path()).unwrap(),
        "test-host".to_string(),
        config,
    );
    let t0 = Instant::now();

    let first = sched.run_cycle(t0).await;
    assert_eq!(first.anomalies, 0);

    tree.set_counters(77, "restarted", 1_000, 1);
    tree.set_counters(78, "steady", 150, 1);
    let second = sched.run_cycle(t0 + Duration::from_secs(1)).await;
    assert_eq!(second.anomalies, 1);
    assert_eq!(second.emitted, 2);

    let snapshot = read_snapshot(&out);
    let cpu_line = |pid: &str| {
        snapshot
            .lines()
            .find(|l| l.starts_with(&format!("proc_cpu_percent{{pid=\"{}\"", pid)))
            .unwrap()
            .to_string()
    };
    assert!(cpu_line("77").ends_with(" 0.0"), "{}", snapshot);
    assert!(cpu_line("78").ends_with(" 50.0"), "{}", snapshot);

    // the lowered counter becomes the new baseline
    tree.set_counters(77, "restarted", 1_100, 1);
    let third = sched.run_cycle(t0 + Duration::from_secs(2)).await;
    assert_eq!(third.anomalies, 0);
    let snapshot = read_snapshot(&out);
    let line = snapshot
        .lines()
        .find(|l| l.starts_with("proc_cpu_percent{pid=\"77\""))
        .unwrap();
    assert!(line.ends_with(" 100.0"), "unexpected line: {}", line);
    assert_eq!(sched.rate_state().get(77).map(|p| p.ticks), Some(1_100));
}

#[tokio::test]
async fn test_zero_interval_loop_stops_on_shutdown() {
    let tree = FakeProc::new();
    let out = TempDir::new().unwrap();
    tree.spawn(1, "init", "/sbin/init");
    let procfs = ProcfsRoot::new(tree.path(), UserTable::default(), standard_host());
    let config = SchedulerConfig {
        interval: Duration::ZERO,
        ..Default::default()
    };
    let mut sched = Scheduler::new(
        procfs,
        NoGpu,
        SnapshotWriter::prepare(out.path()).unwrap(),
        "test-host".to_string(),
        config,
    );

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), sched.run(rx))
        .await
        .unwrap();
    assert!(read_snapshot(&out).contains("process=\"init\""));
}
