//! Session export
//!
//! Writes a machine-readable summary of a finished capture next to the raw
//! trace, for scripts that drive ptcap.

pub mod summary;

pub use summary::{write_summary, ExitReason, TraceSummary};
