//! Process enumeration and per-process sampling from a procfs tree.
//!
//! The tree root is configurable so the sampler can run in a container with
//! the host's `/proc` mounted elsewhere (and so tests can point it at a
//! synthetic directory).

mod users;

pub use users::UserTable;

use std::path::{Path, PathBuf};

use ::procfs::process::{all_processes_with_root, Process};

use crate::core::sampler::ProcessSample;
use crate::error::{ProcstatError, Result};
use crate::platform::host::HostParams;

/// A process-information tree rooted at some directory.
#[derive(Debug, Clone)]
pub struct ProcfsRoot {
    root: PathBuf,
    users: UserTable,
    host: HostParams,
}

impl ProcfsRoot {
    pub fn new<P: Into<PathBuf>>(root: P, users: UserTable, host: HostParams) -> Self {
        Self {
            root: root.into(),
            users,
            host,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn host(&self) -> HostParams {
        self.host
    }

    /// List the pids currently present under the root.
    ///
    /// Only fails if the root itself cannot be listed. Entries that vanish
    /// while iterating are skipped.
    pub fn enumerate(&self) -> Result<Vec<u32>> {
        let processes =
            all_processes_with_root(&self.root).map_err(|source| ProcstatError::ProcfsUnavailable {
                path: self.root.clone(),
                source,
            })?;

        let mut pids: Vec<u32> = processes
            .filter_map(|process| process.ok())
            .filter_map(|process| u32::try_from(process.pid).ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Read identity and raw counters for one process.
    pub fn sample(&self, pid: u32) -> Result<ProcessSample> {
        let process = Process::new_with_root(self.root.join(pid.to_string()))
            .map_err(|e| ProcstatError::from_proc(pid, "stat", e))?;

        // stat parsing splits after the last ')' so odd comm values are safe
        let stat = process
            .stat()
            .map_err(|e| ProcstatError::from_proc(pid, "stat", e))?;
        // an unreadable (e.g. non UTF-8) command line falls back to the name
        let args = match process.cmdline() {
            Ok(args) => args,
            Err(e) => match ProcstatError::from_proc(pid, "cmdline", e) {
                gone if gone.is_transient() => return Err(gone),
                _ => Vec::new(),
            },
        };
        let executable = args
            .into_iter()
            .next()
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| stat.comm.clone());
        let uid = process
            .uid()
            .map_err(|e| ProcstatError::from_proc(pid, "stat", e))?;

        // fd listing is restricted for other users' processes; report 0 then
        let open_fds = process.fd_count().map(|n| n as u64).unwrap_or(0);

        let rss_pages = u64::try_from(stat.rss).unwrap_or(0);
        Ok(ProcessSample {
            pid,
            user: self.users.resolve(uid),
            executable,
            resident_bytes: rss_pages.saturating_mul(self.host.page_size),
            virtual_bytes: stat.vsize,
            cumulative_cpu_ticks: stat.utime.saturating_add(stat.stime),
            threads: u64::try_from(stat.num_threads).unwrap_or(0),
            open_fds,
            name: stat.comm,
        })
    }
}
