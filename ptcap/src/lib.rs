//! # ptcap - Intel PT Trace Capture
//!
//! ptcap records the control flow of a running process with Intel Processor
//! Trace. The kernel's perf subsystem programs the hardware and exposes its
//! output through a shared-memory circular buffer; ptcap drains that buffer
//! into a file while the target runs, then hands the raw packet stream and a
//! snapshot of the process's memory map to an offline decoder.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Target Process                            │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ branches, calls, returns
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Intel PT (CPU) + perf (Kernel)                   │
//! │  • PT packets written into the AUX area                         │
//! │  • aux_head advanced in the control page                        │
//! │  • POLLIN on the perf fd at the wakeup watermark                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ shared memory
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ptcap (This Crate)                          │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Tracer     │──▶│ Drain Thread │──▶│  trace.data  │         │
//! │  │  Lifecycle   │   │ (poll+copy)  │   │              │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         │                                                       │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐                            │
//! │  │  trace.maps  │   │   Summary    │                            │
//! │  │  (snapshot)  │   │   (JSON)     │                            │
//! │  └──────────────┘   └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`collector`]: Trace handle, ring buffer mapping, drain thread and lifecycle
//!   - `tracer`: `TracerContext::start` / `stop` and the `Tracer` state machine
//!   - `drain`: `poll(2)` loop copying new AUX bytes to the output file
//!   - `perf`: Intel PT event setup through `perf_event_open(2)`
//!
//! - [`domain`]: Core types (`Pid`, `PageCount`), `TracerConfig`, `TracerError`
//!
//! - [`export`]: JSON session summary
//!
//! - [`preflight`]: Hardware and privilege checks with actionable messages
//!
//! - [`process_lookup`]: Find a PID by process name
//!
//! - [`cli`]: Command-line argument parsing
//!
//! ## Typical Usage
//!
//! ```bash
//! # Trace a running process until Ctrl+C
//! sudo ptcap my-app
//!
//! # Ten seconds with a bigger AUX buffer, plus a JSON summary
//! sudo ptcap --pid 1234 --aux-pages 4096 --duration 10 --summary run.json
//! ```
//!
//! ## Key Concepts
//!
//! - **AUX area**: Second circular buffer of a perf event, holding PT packets
//! - **aux_head / aux_tail**: Producer and consumer cursors in the control page
//! - **Stop pipe**: Closing its write end wakes the drain thread for shutdown

pub mod cli;
pub mod collector;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod process_lookup;
