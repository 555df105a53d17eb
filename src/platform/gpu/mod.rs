//! GPU-specific platform code.
//!
//! Provides per-process accelerator usage from vendor tools. Only NVIDIA
//! (via `nvidia-smi`) is supported.

mod nvidia;

pub use nvidia::{parse_compute_apps, parse_pmon, NvidiaSmi};
