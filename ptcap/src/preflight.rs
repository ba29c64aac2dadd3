//! Pre-flight checks for ptcap
//!
//! Validates system requirements before a trace handle is opened.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::collector::PT_PMU_TYPE_PATH;
use crate::domain::Pid;

/// Kernel knob gating unprivileged perf access
pub const PERF_PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";

/// Highest `perf_event_paranoid` value that still permits unprivileged,
/// user-space-only, per-process events
const PARANOID_USER_PER_PROCESS: i32 = 2;

/// Effective capability set of the calling process
const SELF_STATUS_PATH: &str = "/proc/self/status";

const CAP_SYS_ADMIN: u32 = 21;
const CAP_PERFMON: u32 = 38;

/// Run all pre-flight checks before opening the trace handle
pub fn run_preflight_checks(pid: Pid) -> Result<()> {
    check_intel_pt(Path::new(PT_PMU_TYPE_PATH))?;
    check_privileges()?;
    check_process_exists(pid)?;
    check_proc_access(pid)?;
    Ok(())
}

/// Check that the CPU and kernel expose the Intel PT PMU
fn check_intel_pt(pmu_type_path: &Path) -> Result<()> {
    if !pmu_type_path.exists() {
        bail!(
            "Intel PT is not available: {} does not exist.\n\n\
             This usually means:\n\
             - The CPU does not support Intel Processor Trace\n\
             - Running inside a VM that doesn't pass PT through\n\
             - The kernel was built without CONFIG_PERF_EVENTS",
            pmu_type_path.display()
        );
    }
    Ok(())
}

/// Check if running with sufficient privileges for a per-process PT event
fn check_privileges() -> Result<()> {
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        return Ok(());
    }

    let paranoid = paranoid_level(Path::new(PERF_PARANOID_PATH))?;
    // Unreadable status only loses the capability shortcut
    let cap_eff = std::fs::read_to_string(SELF_STATUS_PATH)
        .ok()
        .and_then(|status| effective_caps(&status))
        .unwrap_or(0);

    if may_trace(euid, paranoid, cap_eff) {
        return Ok(());
    }

    bail!(
        "Permission denied: kernel.perf_event_paranoid is {paranoid}, which blocks \
         unprivileged tracing.\n\n\
         Run with: sudo ptcap ...\n\
         or allow per-process tracing: sudo sysctl kernel.perf_event_paranoid=2\n\
         or grant CAP_PERFMON: sudo setcap cap_perfmon+ep $(which ptcap)"
    );
}

/// Mirrors the kernel's gate for a user-space-only event on another task
fn may_trace(euid: libc::uid_t, paranoid: i32, cap_eff: u64) -> bool {
    let has_cap = |cap: u32| cap_eff & (1 << cap) != 0;
    euid == 0
        || paranoid <= PARANOID_USER_PER_PROCESS
        || has_cap(CAP_PERFMON)
        || has_cap(CAP_SYS_ADMIN)
}

/// Parse the `CapEff:` hex mask out of `/proc/<pid>/status`
fn effective_caps(status: &str) -> Option<u64> {
    let hex = status.lines().find_map(|line| line.strip_prefix("CapEff:"))?;
    u64::from_str_radix(hex.trim(), 16).ok()
}

fn paranoid_level(path: &Path) -> Result<i32> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    text.trim()
        .parse()
        .with_context(|| format!("Unexpected contents in {}: {:?}", path.display(), text.trim()))
}

/// Check if the target process exists
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.0,
            pid.0
        );
    }
    Ok(())
}

/// Check if we can read the process's memory maps
pub fn check_proc_access(pid: Pid) -> Result<()> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    std::fs::read(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted",
            pid.0
        )
    })?;
    Ok(())
}
