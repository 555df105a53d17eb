/// Identity and raw counters of one process, read fresh every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub executable: String,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub cumulative_cpu_ticks: u64,
    pub threads: u64,
    pub open_fds: u64,
}

/// Per-process, per-device accelerator usage merged from both tool queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorSample {
    pub pid: u32,
    pub device_index: String,
    pub sm_percent: u32,
    pub mem_percent: u32,
    pub framebuffer_mib: u64,
}

/// A process that survived filtering, annotated with its CPU rate and
/// accelerator usage. One of these becomes one group of snapshot lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub sample: ProcessSample,
    pub cpu_percent: f64,
    pub devices: Vec<AcceleratorSample>,
}
