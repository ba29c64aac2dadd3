//! # Ring Buffer Mapping
//!
//! Maps the perf control page, data buffer and AUX area of a trace handle.
//!
//! ## Layout
//!
//! ```text
//! offset 0                 data_offset           aux_offset
//! ┌──────────────┬─────────┬──────────────────────┐   ┌────────────────────┐
//! │ control page │  (pad)  │  data (data_pages)   │…  │  AUX (aux_pages)   │
//! └──────────────┴─────────┴──────────────────────┘   └────────────────────┘
//!  mapping #1: (1 + data_pages) pages                  mapping #2
//! ```
//!
//! The kernel fills in `data_offset`/`data_size`; we must write
//! `aux_offset`/`aux_size` into the control page before the second `mmap`.

#![allow(unsafe_code)]

use log::{debug, warn};
use ptcap_common::PerfEventMmapPage;
use std::io;
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::{self, addr_of, addr_of_mut, NonNull};
use std::sync::atomic::{fence, Ordering};

use super::backend::{BufferGeometry, TraceSource};
use crate::domain::{page_size, TracerError};

/// A shared read/write mapping of a descriptor, unmapped on drop
#[derive(Debug)]
pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mmap {
    /// Map `len` bytes of `fd` at `offset`, `PROT_READ | PROT_WRITE`, `MAP_SHARED`
    ///
    /// # Errors
    /// Returns the `mmap(2)` error.
    pub fn map_shared(fd: BorrowedFd<'_>, len: usize, offset: u64) -> io::Result<Self> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mapping offset too large"))?;
        // SAFETY: a fresh mapping at a kernel-chosen address aliases nothing
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(addr.cast::<u8>())
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| io::Error::other("mmap returned null"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Unmap now, reporting failure
    ///
    /// # Errors
    /// Returns the `munmap(2)` error.
    pub fn unmap(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        // SAFETY: we own the mapping and it is never touched again
        if unsafe { libc::munmap(this.ptr.as_ptr().cast(), this.len) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: we own the mapping and it is never touched again
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } == -1 {
            warn!("munmap of {} bytes failed: {}", self.len, io::Error::last_os_error());
        }
    }
}

/// Control page plus AUX area of one perf trace handle
#[derive(Debug)]
pub struct RingBufferMapping {
    base: Mmap,
    aux: Mmap,
}

impl RingBufferMapping {
    fn page(&self) -> *mut PerfEventMmapPage {
        self.base.as_ptr().cast()
    }

    /// `(aux_offset, aux_size)` as currently recorded in the control page
    #[must_use]
    pub fn aux_geometry(&self) -> (u64, u64) {
        let page = self.page();
        // SAFETY: the control page stays mapped for our lifetime
        unsafe {
            (
                ptr::read_volatile(addr_of!((*page).aux_offset)),
                ptr::read_volatile(addr_of!((*page).aux_size)),
            )
        }
    }
}

impl TraceSource for RingBufferMapping {
    fn head(&self) -> u64 {
        let page = self.page();
        // SAFETY: the control page stays mapped for our lifetime
        let head = unsafe { ptr::read_volatile(addr_of!((*page).aux_head)) };
        // Pairs with the kernel's write barrier before publishing aux_head
        fence(Ordering::Acquire);
        head
    }

    fn tail(&self) -> u64 {
        let page = self.page();
        // SAFETY: the control page stays mapped for our lifetime
        unsafe { ptr::read_volatile(addr_of!((*page).aux_tail)) }
    }

    fn set_tail(&mut self, tail: u64) {
        // All reads of the consumed range must complete before the producer
        // may reuse it
        fence(Ordering::SeqCst);
        let page = self.page();
        // SAFETY: the control page stays mapped for our lifetime
        unsafe { ptr::write_volatile(addr_of_mut!((*page).aux_tail), tail) };
    }

    fn buffer(&self) -> &[u8] {
        // SAFETY: the AUX area stays mapped for our lifetime. The producer
        // only writes outside [tail, head), which is all the reader consumes.
        unsafe { std::slice::from_raw_parts(self.aux.as_ptr(), self.aux.len()) }
    }

    fn release(self) -> Result<(), TracerError> {
        let Self { base, aux } = self;
        let aux_res = aux.unmap();
        let base_res = base.unmap();
        aux_res.and(base_res).map_err(TracerError::Unmap)
    }
}

/// Map the control page, data buffer and AUX area of `handle`
///
/// # Errors
/// Returns a configuration error if the geometry overflows, or a resource
/// error if either mapping fails. On failure nothing remains mapped.
pub fn map_buffers(
    handle: BorrowedFd<'_>,
    geometry: BufferGeometry,
) -> Result<RingBufferMapping, TracerError> {
    let page_size = page_size();
    let base_len = geometry
        .data_pages
        .0
        .checked_add(1)
        .and_then(|pages| pages.checked_mul(page_size))
        .ok_or_else(|| TracerError::Config("data buffer size overflows".into()))?;
    let aux_len = geometry
        .aux_pages
        .bytes(page_size)
        .ok_or_else(|| TracerError::Config("AUX buffer size overflows".into()))?;

    // Page 0 is the control page, not trace data
    let base = Mmap::map_shared(handle, base_len, 0)
        .map_err(|e| TracerError::acquire("map perf control page", e))?;

    let page = base.as_ptr().cast::<PerfEventMmapPage>();
    // SAFETY: `base` is at least one page, which covers the control page
    let aux_offset = unsafe {
        let data_offset = ptr::read_volatile(addr_of!((*page).data_offset));
        let data_size = ptr::read_volatile(addr_of!((*page).data_size));
        let aux_offset = data_offset + data_size;
        ptr::write_volatile(addr_of_mut!((*page).aux_offset), aux_offset);
        ptr::write_volatile(addr_of_mut!((*page).aux_size), aux_len as u64);
        aux_offset
    };
    debug!("aux_offset=0x{aux_offset:x} aux_size=0x{aux_len:x}");

    let aux = match Mmap::map_shared(handle, aux_len, aux_offset) {
        Ok(aux) => aux,
        Err(e) => {
            if let Err(unmap_err) = base.unmap() {
                warn!("Failed to unmap perf control page after AUX failure: {unmap_err}");
            }
            return Err(TracerError::acquire("map perf AUX area", e));
        }
    };

    Ok(RingBufferMapping { base, aux })
}
