//! Hardware backend seam
//!
//! The lifecycle and drain loop only talk to the tracing hardware through
//! these two traits. [`PerfPtBackend`](super::perf::PerfPtBackend) is the
//! production implementation.

use std::os::fd::{BorrowedFd, OwnedFd};

use crate::domain::{PageCount, Pid, TracerError};

/// Ring buffer sizes requested from the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    /// Data buffer pages, excluding the control page
    pub data_pages: PageCount,
    /// AUX area pages
    pub aux_pages: PageCount,
}

/// A mapped circular trace buffer and its cursors
///
/// Owned by the drain thread. Cursor accessors hide the volatile accesses
/// and barriers the producer-shared control page requires.
pub trait TraceSource {
    /// Monotonic producer position, read before any access to the buffer
    fn head(&self) -> u64;

    /// Consumer position
    fn tail(&self) -> u64;

    /// Publish a new consumer position to the producer
    fn set_tail(&mut self, tail: u64);

    /// The circular buffer
    fn buffer(&self) -> &[u8];

    /// Unmap everything, attempting every region even if one fails
    ///
    /// # Errors
    /// Returns the first unmap failure.
    fn release(self) -> Result<(), TracerError>;
}

/// Access to a tracing facility scoped to one process
pub trait TraceBackend: Send + Sync + 'static {
    type Source: TraceSource;

    /// Open a disabled trace handle for `pid`
    ///
    /// # Errors
    /// Configuration errors for an undiscoverable facility, resource errors
    /// if the kernel rejects the request.
    fn open(&self, pid: Pid) -> Result<OwnedFd, TracerError>;

    /// Map the control page and the circular buffer of `handle`
    ///
    /// # Errors
    /// Returns a resource error if either mapping fails; nothing stays mapped.
    fn map(&self, handle: BorrowedFd<'_>, geometry: BufferGeometry)
        -> Result<Self::Source, TracerError>;

    /// Start producing trace data
    ///
    /// # Errors
    /// Returns a resource error if the control call fails.
    fn enable(&self, handle: BorrowedFd<'_>) -> Result<(), TracerError>;

    /// Stop producing trace data
    ///
    /// # Errors
    /// Returns a resource error if the control call fails.
    fn disable(&self, handle: BorrowedFd<'_>) -> Result<(), TracerError>;
}
