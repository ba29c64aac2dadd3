//! Structured error types for ptcap
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`TracerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad sizes or an unreadable PMU type; nothing was acquired
    Configuration,
    /// Opening, mapping or closing a kernel resource failed
    Resource,
    /// Launching or handshaking with the drain thread failed
    Synchronization,
    /// The drain thread failed while waiting, writing or unmapping
    Drain,
    /// The lifecycle was driven out of order
    Misuse,
}

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read Intel PT PMU type from {path}: {source}")]
    PmuType {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to snapshot memory maps of {pid} to {path}: {source}")]
    Snapshot {
        pid: Pid,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to {op}: {source}")]
    Acquire {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to {op}: {source}")]
    Release {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Drain thread synchronisation failed: {0}")]
    Sync(String),

    #[error("Waiting for trace events failed: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to write trace data: {0}")]
    Write(#[source] io::Error),

    #[error("Ring buffer tail {tail} lies outside a buffer of {size} bytes")]
    Cursor { tail: u64, size: u64 },

    #[error("Failed to unmap ring buffer: {0}")]
    Unmap(#[source] io::Error),

    #[error("Drain thread failed: {0}")]
    DrainFailed(#[source] Box<TracerError>),

    #[error("A trace is already active")]
    AlreadyTracing,

    #[error("No trace is active")]
    NotTracing,

    #[error("{} teardown step(s) failed: {}", .0.len(), summarize(.0))]
    Teardown(Vec<TracerError>),
}

impl TracerError {
    pub(crate) fn acquire(op: &'static str, source: io::Error) -> Self {
        TracerError::Acquire { op, source }
    }

    pub(crate) fn release(op: &'static str, source: io::Error) -> Self {
        TracerError::Release { op, source }
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TracerError::Config(_) | TracerError::PmuType { .. } => ErrorKind::Configuration,
            TracerError::Snapshot { .. }
            | TracerError::Acquire { .. }
            | TracerError::Release { .. } => ErrorKind::Resource,
            TracerError::Sync(_) => ErrorKind::Synchronization,
            TracerError::Wait(_)
            | TracerError::Write(_)
            | TracerError::Cursor { .. }
            | TracerError::Unmap(_)
            | TracerError::DrainFailed(_) => ErrorKind::Drain,
            TracerError::AlreadyTracing | TracerError::NotTracing => ErrorKind::Misuse,
            TracerError::Teardown(errors) => {
                errors.first().map_or(ErrorKind::Resource, TracerError::kind)
            }
        }
    }
}

fn summarize(errors: &[TracerError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
