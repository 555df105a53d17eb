// Platform-specific code module

pub mod gpu;
pub mod host;
pub mod procfs;

// Re-exports para imports limpios
pub use gpu::NvidiaSmi;
pub use host::{host_name, HostParams};
pub use self::procfs::{ProcfsRoot, UserTable};
