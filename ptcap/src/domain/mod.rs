//! Domain model for ptcap
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod config;
pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use config::TracerConfig;
pub use errors::{ErrorKind, TracerError};
pub use types::{page_size, PageCount, Pid};
