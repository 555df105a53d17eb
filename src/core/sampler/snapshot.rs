//! Exposition-format rendering and atomic snapshot publication.
//!
//! A snapshot is written to a temporary file in the output directory and
//! renamed over the published file, so a scraper reading
//! `procstats.prom` only ever sees a complete previous or current cycle.

use std::fs::{self, Permissions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};

use super::metrics::{AcceleratorSample, ProcessReport};
use crate::error::{ProcstatError, Result};

/// Name of the published file inside the output directory.
pub const SNAPSHOT_FILE: &str = "procstats.prom";

const MAX_LABEL_LEN: usize = 200;

type ProcessValue = fn(&ProcessReport) -> String;
type DeviceValue = fn(&AcceleratorSample) -> u64;

const PROCESS_FAMILIES: &[(&str, &str, ProcessValue)] = &[
    ("proc_cpu_percent", "Process CPU percent over interval", |r| {
        format_float(r.cpu_percent)
    }),
    ("proc_memory_rss_bytes", "Resident Set Size in bytes", |r| {
        r.sample.resident_bytes.to_string()
    }),
    ("proc_memory_vms_bytes", "Virtual Memory Size in bytes", |r| {
        r.sample.virtual_bytes.to_string()
    }),
    ("proc_open_fds", "Open file descriptors count", |r| {
        r.sample.open_fds.to_string()
    }),
    ("proc_threads", "Number of threads in the process", |r| {
        r.sample.threads.to_string()
    }),
];

const DEVICE_FAMILIES: &[(&str, &str, DeviceValue)] = &[
    (
        "proc_gpu_sm_percent",
        "NVIDIA per-process SM utilization percent",
        |d| d.sm_percent as u64,
    ),
    (
        "proc_gpu_mem_percent",
        "NVIDIA per-process GPU memory utilization percent",
        |d| d.mem_percent as u64,
    ),
    (
        "proc_gpu_fb_mem_mib",
        "NVIDIA per-process framebuffer memory MiB",
        |d| d.framebuffer_mib,
    ),
];

/// Restrict a label value to `[A-Za-z0-9_:.-]`, replacing anything else
/// with `_`, and cap it at 200 characters.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .take(MAX_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Float values always carry a fractional part (`250.0`, not `250`).
fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

fn process_labels(report: &ProcessReport, instance: &str) -> String {
    let sample = &report.sample;
    format!(
        "pid=\"{}\",process=\"{}\",user=\"{}\",exe=\"{}\",instance=\"{}\"",
        sample.pid,
        sanitize(&sample.name),
        sanitize(&sample.user),
        sanitize(&sample.executable),
        instance
    )
}

/// Render the snapshot text lines. Every metric family is emitted as one
/// contiguous block preceded by its HELP and TYPE lines.
///
/// `instance` must already be sanitized.
pub fn render(reports: &[ProcessReport], instance: &str) -> Vec<String> {
    let labels: Vec<String> = reports
        .iter()
        .map(|r| process_labels(r, instance))
        .collect();
    let mut lines = Vec::with_capacity(16 + reports.len() * PROCESS_FAMILIES.len());

    for (family, help, value) in PROCESS_FAMILIES {
        lines.push(format!("# HELP {} {}", family, help));
        lines.push(format!("# TYPE {} gauge", family));
        for (report, labels) in reports.iter().zip(&labels) {
            lines.push(format!("{}{{{}}} {}", family, labels, value(report)));
        }
    }

    for (family, help, value) in DEVICE_FAMILIES {
        lines.push(format!("# HELP {} {}", family, help));
        lines.push(format!("# TYPE {} gauge", family));
        for (report, labels) in reports.iter().zip(&labels) {
            for device in &report.devices {
                lines.push(format!(
                    "{}{{{},gpu=\"{}\"}} {}",
                    family,
                    labels,
                    sanitize(&device.device_index),
                    value(device)
                ));
            }
        }
    }

    lines
}

/// Publishes snapshots into one output directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    target: PathBuf,
}

impl SnapshotWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        let target = dir.join(SNAPSHOT_FILE);
        Self { dir, target }
    }

    /// Create the output directory if needed. This is the only failure that
    /// should stop the sampler from starting.
    pub fn prepare<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let writer = Self::new(dir);
        fs::create_dir_all(&writer.dir)?;
        Ok(writer)
    }

    /// Path of the published snapshot.
    pub fn path(&self) -> &Path {
        &self.target
    }

    /// Write `lines` to a temporary file next to the published one. Nothing
    /// is visible at the published path until [`StagedSnapshot::commit`].
    pub fn stage(&self, lines: &[String]) -> Result<StagedSnapshot> {
        let fail = |e| ProcstatError::publish(&self.target, e);

        let mut file = Builder::new()
            .prefix(".procstats-")
            .suffix(".prom.tmp")
            .tempfile_in(&self.dir)
            .map_err(fail)?;
        // tempfile creates 0600; the scraper usually runs as another user
        file.as_file()
            .set_permissions(Permissions::from_mode(0o644))
            .map_err(fail)?;

        {
            let mut out = BufWriter::new(&mut file);
            for line in lines {
                writeln!(out, "{}", line).map_err(fail)?;
            }
            out.flush().map_err(fail)?;
        }
        file.as_file().sync_all().map_err(fail)?;

        Ok(StagedSnapshot {
            file,
            target: self.target.clone(),
        })
    }

    /// Stage and commit in one step.
    pub fn publish(&self, lines: &[String]) -> Result<PathBuf> {
        self.stage(lines)?.commit()
    }
}

/// A fully written snapshot waiting to be renamed into place. Dropping it
/// removes the temporary file and leaves the published file untouched.
#[derive(Debug)]
pub struct StagedSnapshot {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedSnapshot {
    pub fn temp_path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically rename the staged file over the published path.
    pub fn commit(self) -> Result<PathBuf> {
        let Self { file, target } = self;
        file.persist(&target)
            .map_err(|e| ProcstatError::publish(&target, e.error))?;
        Ok(target)
    }
}
