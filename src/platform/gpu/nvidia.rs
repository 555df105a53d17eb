use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::core::sampler::{AcceleratorSource, MemoryRow, UtilizationRow};
use crate::error::{ProcstatError, Result};

const PMON_ARGS: &[&str] = &["pmon", "-s", "u", "-c", "1"];
const COMPUTE_APPS_ARGS: &[&str] = &[
    "--query-compute-apps=pid,used_memory,index",
    "--format=csv,noheader,nounits",
];

/// NVIDIA accelerator source backed by the `nvidia-smi` command line tool
pub struct NvidiaSmi {
    tool: String,
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl NvidiaSmi {
    /// Resolve `tool` on PATH. A missing tool is not an error here: every
    /// query will simply report the tool as unavailable.
    pub fn new(tool: &str, timeout: Option<Duration>) -> Self {
        let binary = match which::which(tool) {
            Ok(path) => {
                log::info!("Using accelerator tool at {:?}", path);
                Some(path)
            }
            Err(e) => {
                log::info!(
                    "Accelerator tool '{}' not found ({}); GPU metrics disabled",
                    tool,
                    e
                );
                None
            }
        };

        Self {
            tool: tool.to_string(),
            binary,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| ProcstatError::tool_unavailable(format!("{} not found", self.tool)))?;

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let output = command.output();

        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, output)
                .await
                .map_err(|_| ProcstatError::ToolTimeout {
                    tool: self.tool.clone(),
                    after,
                })?,
            None => output.await,
        }
        .map_err(|e| ProcstatError::tool_unavailable(format!("{}: {}", self.tool, e)))?;

        if !output.status.success() {
            return Err(ProcstatError::tool_unavailable(format!(
                "{} {} exited with {}",
                self.tool,
                args.first().copied().unwrap_or_default(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl AcceleratorSource for NvidiaSmi {
    async fn utilization(&self) -> Result<Vec<UtilizationRow>> {
        self.run(PMON_ARGS).await.map(|out| parse_pmon(&out))
    }

    async fn memory(&self) -> Result<Vec<MemoryRow>> {
        self.run(COMPUTE_APPS_ARGS)
            .await
            .map(|out| parse_compute_apps(&out))
    }
}

/// Parse `nvidia-smi pmon -s u` output.
///
/// Columns: `gpu pid type sm mem enc dec [jpg ofa] command`. Header lines
/// start with `#`; idle devices are listed with `-` as pid. Non-numeric
/// utilization (`-`) reads as 0.
pub fn parse_pmon(output: &str) -> Vec<UtilizationRow> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            continue;
        }
        let Ok(pid) = parts[1].parse::<u32>() else {
            continue;
        };
        rows.push(UtilizationRow {
            device_index: parts[0].to_string(),
            pid,
            sm_percent: parts[3].parse().unwrap_or(0),
            mem_percent: parts[4].parse().unwrap_or(0),
        });
    }
    rows
}

/// Parse `nvidia-smi --query-compute-apps=pid,used_memory,index` CSV rows.
pub fn parse_compute_apps(output: &str) -> Vec<MemoryRow> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 {
            continue;
        }
        let (Ok(pid), Ok(framebuffer_mib)) = (parts[0].parse::<u32>(), parts[1].parse::<u64>())
        else {
            continue;
        };
        rows.push(MemoryRow {
            pid,
            framebuffer_mib,
            device_index: parts[2].to_string(),
        });
    }
    rows
}
