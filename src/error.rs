use std::io;
use std::path::PathBuf;
use std::time::Duration;

use procfs::ProcError;
use thiserror::Error;

/// Error type for the sampler.
///
/// Variants are grouped by how the scheduler reacts to them: transient
/// per-process failures are skipped, tool failures degrade a query to an
/// empty result, publish failures drop one cycle's snapshot.
#[derive(Error, Debug)]
pub enum ProcstatError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("process {pid} disappeared or became unreadable: {source}")]
    ProcessGone {
        pid: u32,
        #[source]
        source: ProcError,
    },

    #[error("malformed {file} record for process {pid}: {reason}")]
    MalformedRecord {
        pid: u32,
        file: &'static str,
        reason: String,
    },

    #[error("cannot list process tree at {path:?}: {source}")]
    ProcfsUnavailable {
        path: PathBuf,
        #[source]
        source: ProcError,
    },

    #[error("Accelerator tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("{tool} did not finish within {after:?}")]
    ToolTimeout { tool: String, after: Duration },

    #[error("failed to publish snapshot to {path:?}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for the sampler
pub type Result<T> = std::result::Result<T, ProcstatError>;

impl ProcstatError {
    pub fn process_gone(pid: u32, source: ProcError) -> Self {
        ProcstatError::ProcessGone { pid, source }
    }

    /// Classify a failure reading `file` of one process. A process that
    /// exited or is hidden from us is gone; anything else is a bad record.
    pub fn from_proc(pid: u32, file: &'static str, err: ProcError) -> Self {
        match err {
            ProcError::NotFound(_) | ProcError::PermissionDenied(_) => {
                Self::process_gone(pid, err)
            }
            ProcError::Io(ref e, _) if e.raw_os_error() == Some(libc::ESRCH) => {
                Self::process_gone(pid, err)
            }
            other => Self::malformed(pid, file, other.to_string()),
        }
    }

    pub fn malformed<S: Into<String>>(pid: u32, file: &'static str, reason: S) -> Self {
        ProcstatError::MalformedRecord {
            pid,
            file,
            reason: reason.into(),
        }
    }

    pub fn tool_unavailable<S: Into<String>>(msg: S) -> Self {
        ProcstatError::ToolUnavailable(msg.into())
    }

    pub fn publish<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        ProcstatError::Publish {
            path: path.into(),
            source,
        }
    }

    /// True for failures caused by a process exiting (or hiding itself)
    /// between enumeration and sampling.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcstatError::ProcessGone { .. })
    }
}
