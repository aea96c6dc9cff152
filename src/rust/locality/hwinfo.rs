// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

#[cfg(target_os = "linux")]
use ::std::fs;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Hardware properties of one unit. The value `-1` marks a property that could not be determined
/// at probe time; after locality discovery finishes, only the clock bounds may still carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwInfo {
    /// NUMA domain the unit runs in.
    pub numa_id: i32,
    /// Logical CPU the unit was probed on.
    pub cpu_id: i32,
    /// Number of physical cores available to the unit.
    pub num_cores: i32,
    /// Number of processing modules (host system plus coprocessors).
    pub num_modules: i32,
    /// Number of NUMA domains.
    pub num_numa: i32,
    /// Minimum number of threads per core.
    pub min_threads: i32,
    /// Maximum number of threads per core.
    pub max_threads: i32,
    /// Minimum CPU clock, in MHz.
    pub min_cpu_mhz: i32,
    /// Maximum CPU clock, in MHz.
    pub max_cpu_mhz: i32,
}

/// Policy refining the thread range of a probed unit. The default keeps whatever the probe found
/// and falls back to one thread per core; accelerator-style modules override the range wholesale.
pub trait ThreadPolicy {
    fn apply(&self, hwinfo: &mut HwInfo);
}

/// Falls back to one thread per core when the probe could not detect a thread range.
pub struct DefaultThreadPolicy;

/// Thread range override for many-core accelerator modules with 4-way hardware threading.
pub struct ManyCorePolicy;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Marks a hardware property that is unknown.
pub const HWINFO_UNKNOWN: i32 = -1;

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Hardware Information
impl HwInfo {
    /// Creates a record with every property unknown.
    pub fn unknown() -> Self {
        Self {
            numa_id: HWINFO_UNKNOWN,
            cpu_id: HWINFO_UNKNOWN,
            num_cores: HWINFO_UNKNOWN,
            num_modules: HWINFO_UNKNOWN,
            num_numa: HWINFO_UNKNOWN,
            min_threads: HWINFO_UNKNOWN,
            max_threads: HWINFO_UNKNOWN,
            min_cpu_mhz: HWINFO_UNKNOWN,
            max_cpu_mhz: HWINFO_UNKNOWN,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl ThreadPolicy for DefaultThreadPolicy {
    fn apply(&self, hwinfo: &mut HwInfo) {
        if hwinfo.min_threads < 1 {
            hwinfo.min_threads = hwinfo.num_cores;
        }
        if hwinfo.max_threads < 1 {
            hwinfo.max_threads = hwinfo.num_cores;
        }
    }
}

impl ThreadPolicy for ManyCorePolicy {
    fn apply(&self, hwinfo: &mut HwInfo) {
        hwinfo.min_threads = hwinfo.num_cores * 4;
        hwinfo.max_threads = hwinfo.num_cores * 4;
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Probes the hardware of the calling unit. Pure function: reads the platform, touches no global
/// state. Properties that cannot be determined are left unknown and resolved by [finalize].
pub fn probe() -> HwInfo {
    let mut hwinfo: HwInfo = HwInfo::unknown();

    let num_cores: i64 = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    hwinfo.num_cores = if num_cores >= 1 { num_cores as i32 } else { 1 };
    hwinfo.num_modules = 1;

    #[cfg(target_os = "linux")]
    {
        let cpu: i32 = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            hwinfo.cpu_id = cpu;
            if let Some(numa_id) = numa_node_of_cpu(cpu) {
                hwinfo.numa_id = numa_id;
            }
        }
        if let Some(num_numa) = count_numa_nodes() {
            hwinfo.num_numa = num_numa as i32;
        }
        if let Some(khz) = read_cpufreq("cpuinfo_min_freq") {
            hwinfo.min_cpu_mhz = (khz / 1000) as i32;
        }
        if let Some(khz) = read_cpufreq("cpuinfo_max_freq") {
            hwinfo.max_cpu_mhz = (khz / 1000) as i32;
        }
    }

    hwinfo
}

/// Resolves the remaining unknowns of a probed record: unknown NUMA placement collapses to domain
/// zero, core counts to one, and the thread range is delegated to the policy. The clock bounds may
/// legitimately stay unknown.
pub fn finalize(hwinfo: &mut HwInfo, policy: &dyn ThreadPolicy) {
    if hwinfo.num_cores < 1 {
        hwinfo.num_cores = 1;
    }
    if hwinfo.numa_id < 0 {
        hwinfo.numa_id = 0;
    }
    if hwinfo.num_numa < 1 {
        hwinfo.num_numa = 1;
    }
    if hwinfo.num_modules < 1 {
        hwinfo.num_modules = 1;
    }
    policy.apply(hwinfo);
}

/// Counts the NUMA nodes exposed by the kernel.
#[cfg(target_os = "linux")]
fn count_numa_nodes() -> Option<usize> {
    let entries = fs::read_dir("/sys/devices/system/node").ok()?;
    let count: usize = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix("node").map_or(false, |suffix| suffix.parse::<u32>().is_ok())
        })
        .count();
    if count > 0 {
        Some(count)
    } else {
        None
    }
}

/// Resolves the NUMA node of a logical CPU.
#[cfg(target_os = "linux")]
fn numa_node_of_cpu(cpu: i32) -> Option<i32> {
    let entries = fs::read_dir(format!("/sys/devices/system/cpu/cpu{}", cpu)).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(suffix) = name.strip_prefix("node") {
            if let Ok(numa_id) = suffix.parse::<i32>() {
                return Some(numa_id);
            }
        }
    }
    None
}

/// Reads one cpufreq bound of CPU zero, in kHz.
#[cfg(target_os = "linux")]
fn read_cpufreq(bound: &str) -> Option<u64> {
    let path: String = format!("/sys/devices/system/cpu/cpu0/cpufreq/{}", bound);
    fs::read_to_string(path).ok()?.trim().parse::<u64>().ok()
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
