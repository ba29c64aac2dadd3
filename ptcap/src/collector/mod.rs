//! # Trace Collection
//!
//! Everything between "trace this PID" and bytes on disk.
//!
//! ## Architecture
//!
//! ```text
//! TracerContext::start ──▶ perf_event_open (disabled)
//!        │                        │
//!        │ spawn                  ▼
//!        └──────────────▶ drain thread: mmap base + AUX
//!                                 │ ready
//!                                 ▼
//!                         ioctl(ENABLE) ──▶ hardware writes AUX
//!                                 │
//!              poll(handle, stop pipe) ◀── POLLIN / POLLHUP
//!                                 │
//!                                 ▼
//!                  circular::drain ──▶ writer ──▶ trace file
//! ```
//!
//! ## Submodules
//!
//! - [`tracer`] - Start/stop lifecycle and the [`Tracer`] state machine
//! - [`backend`] - Seam between the lifecycle and the tracing hardware
//! - [`perf`] - Intel PT through `perf_event_open(2)`
//! - [`ring_buffer`] - Shared mappings of the control page and AUX area
//! - [`drain`] - The drain thread's wait/extract loop
//! - [`circular`] - Copying new bytes out of a circular buffer
//! - [`writer`] - Chunked, interruption-safe writes
//! - [`snapshot`] - `/proc/<pid>/maps` copy at trace start

pub mod backend;
pub mod circular;
pub mod drain;
pub mod perf;
pub mod ring_buffer;
pub mod snapshot;
pub mod tracer;
pub mod writer;

#[cfg(test)]
pub(crate) mod fake;

pub use backend::{BufferGeometry, TraceBackend, TraceSource};
pub use drain::DrainStats;
pub use perf::{PerfPtBackend, PT_PMU_TYPE_PATH};
pub use snapshot::snapshot_maps;
pub use tracer::{Tracer, TracerContext};
