//! # Intel PT via Linux perf
//!
//! Opens a perf trace handle for the Intel PT PMU and drives it with the
//! enable/disable ioctls.
//!
//! ## Functions
//!
//! - [`read_pmu_type()`] - Discover the dynamic PMU type from sysfs
//! - [`pt_event_attr()`] - Build the event descriptor
//! - [`open_hardware_handle()`] - `perf_event_open(2)` scoped to one process
//! - [`PerfPtBackend`] - [`TraceBackend`] over the above

#![allow(unsafe_code)]

use log::{debug, info};
use ptcap_common::{
    PerfEventAttr, ATTR_FLAG_DISABLED, ATTR_FLAG_EXCLUDE_HV, ATTR_FLAG_EXCLUDE_KERNEL,
    PERF_ATTR_SIZE_VER8, PERF_EVENT_IOC_DISABLE, PERF_EVENT_IOC_ENABLE, PERF_FLAG_FD_CLOEXEC,
    PRECISE_IP_ZERO_SKID,
};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use super::backend::{BufferGeometry, TraceBackend};
use super::ring_buffer::{map_buffers, RingBufferMapping};
use crate::domain::{Pid, TracerError};

/// Where the kernel publishes the Intel PT PMU type
pub const PT_PMU_TYPE_PATH: &str = "/sys/bus/event_source/devices/intel_pt/type";

/// The PMU type file holds a short decimal number
const MAX_PMU_TYPE_LEN: u64 = 8;

/// Read and parse the numeric PMU type from `path`
///
/// # Errors
/// Returns [`TracerError::PmuType`] if the file is unreadable or does not
/// hold a number.
pub fn read_pmu_type(path: &Path) -> Result<u32, TracerError> {
    let pmu_err = |source| TracerError::PmuType { path: path.to_path_buf(), source };

    let mut text = String::new();
    File::open(path)
        .and_then(|f| f.take(MAX_PMU_TYPE_LEN).read_to_string(&mut text))
        .map_err(pmu_err)?;

    text.trim().parse::<u32>().map_err(|e| {
        pmu_err(io::Error::new(io::ErrorKind::InvalidData, format!("{:?}: {e}", text.trim())))
    })
}

/// Event descriptor for user-space-only Intel PT that starts disabled
#[must_use]
pub fn pt_event_attr(pmu_type: u32) -> PerfEventAttr {
    let mut attr = PerfEventAttr {
        type_: pmu_type,
        size: PERF_ATTR_SIZE_VER8,
        flags: ATTR_FLAG_DISABLED | ATTR_FLAG_EXCLUDE_KERNEL | ATTR_FLAG_EXCLUDE_HV,
        ..PerfEventAttr::default()
    };
    attr.set_precise_ip(PRECISE_IP_ZERO_SKID);
    attr
}

/// Open an Intel PT trace handle for `pid`, reading the PMU type from `pmu_type_path`
///
/// # Errors
/// Returns a configuration error if the PMU type can't be read, or a
/// resource error if the kernel rejects the event (privilege, missing
/// hardware, bad descriptor).
pub fn open_hardware_handle(pid: Pid, pmu_type_path: &Path) -> Result<OwnedFd, TracerError> {
    let attr = pt_event_attr(read_pmu_type(pmu_type_path)?);
    debug!("perf_event_open type={} pid={}", attr.type_, pid.0);

    // SAFETY: `attr` is a valid, fully initialised perf_event_attr
    let ret = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            std::ptr::addr_of!(attr),
            pid.0,
            -1 as libc::c_int,
            -1 as libc::c_int,
            PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
        )
    };
    if ret == -1 {
        return Err(TracerError::acquire("open Intel PT perf event", io::Error::last_os_error()));
    }

    #[allow(clippy::cast_possible_truncation)]
    let fd = ret as RawFd;
    // SAFETY: the kernel just handed us this descriptor
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn perf_ioctl(handle: BorrowedFd<'_>, request: u64) -> io::Result<()> {
    // SAFETY: the enable/disable requests take no argument
    if unsafe { libc::ioctl(handle.as_raw_fd(), request as _, 0) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Production backend: Intel PT through perf
#[derive(Debug, Clone)]
pub struct PerfPtBackend {
    pmu_type_path: PathBuf,
}

impl Default for PerfPtBackend {
    fn default() -> Self {
        Self { pmu_type_path: PathBuf::from(PT_PMU_TYPE_PATH) }
    }
}

impl PerfPtBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the PMU type from somewhere other than sysfs
    #[must_use]
    pub fn with_pmu_type_path(path: impl Into<PathBuf>) -> Self {
        Self { pmu_type_path: path.into() }
    }
}

impl TraceBackend for PerfPtBackend {
    type Source = RingBufferMapping;

    fn open(&self, pid: Pid) -> Result<OwnedFd, TracerError> {
        open_hardware_handle(pid, &self.pmu_type_path)
    }

    fn map(
        &self,
        handle: BorrowedFd<'_>,
        geometry: BufferGeometry,
    ) -> Result<RingBufferMapping, TracerError> {
        map_buffers(handle, geometry)
    }

    fn enable(&self, handle: BorrowedFd<'_>) -> Result<(), TracerError> {
        perf_ioctl(handle, PERF_EVENT_IOC_ENABLE)
            .map_err(|e| TracerError::acquire("enable Intel PT", e))?;
        info!("Intel PT enabled");
        Ok(())
    }

    fn disable(&self, handle: BorrowedFd<'_>) -> Result<(), TracerError> {
        perf_ioctl(handle, PERF_EVENT_IOC_DISABLE)
            .map_err(|e| TracerError::release("disable Intel PT", e))?;
        info!("Intel PT disabled");
        Ok(())
    }
}
