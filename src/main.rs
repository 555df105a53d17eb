use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;
use tokio::sync::broadcast;

use procstat_textfile::core::sampler::{sanitize, Scheduler, SnapshotWriter};
use procstat_textfile::platform::{host_name, HostParams, NvidiaSmi, ProcfsRoot, UserTable};
use procstat_textfile::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::parse();
    procstat_textfile::init_logging();

    let writer = SnapshotWriter::prepare(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", config.output_dir))?;

    let host = HostParams::detect();
    let users = UserTable::load(&config.passwd_path);
    log::info!(
        "Loaded {} users; {} ticks/s, page size {} bytes",
        users.len(),
        host.ticks_per_second,
        host.page_size
    );

    let procfs = ProcfsRoot::new(&config.procfs_path, users, host);
    let gpu = NvidiaSmi::new(&config.gpu_tool, config.gpu_timeout());
    let instance = sanitize(&host_name());

    let mut scheduler = Scheduler::new(procfs, gpu, writer, instance, config.scheduler());

    if config.once {
        let summary = scheduler.run_cycle(Instant::now()).await;
        log::info!(
            "Sampled {} of {} processes, emitted {}",
            summary.sampled,
            summary.enumerated,
            summary.emitted
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    scheduler.run(shutdown_rx).await;
    Ok(())
}
