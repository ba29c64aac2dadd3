//! # Tracer Lifecycle
//!
//! The only entry point into the collector. Drives the start sequence
//! synchronously, hands the ring buffer to the drain thread, and tears
//! everything down again in a fixed order.
//!
//! ## Start
//!
//! 1. Snapshot `/proc/<pid>/maps`
//! 2. Open the trace handle (disabled)
//! 3. Create the stop pipe
//! 4. Create the one-shot readiness channel
//! 5. Create the trace output file (mode 0600)
//! 6. Spawn the drain thread
//! 7. Wait for the drain thread to map the ring buffer
//! 8. Enable the hardware
//!
//! Tracing is only enabled once a consumer exists, otherwise early trace data
//! could be overwritten unseen.
//!
//! ## Stop
//!
//! Disable the hardware, close the stop pipe's write end (the drain thread's
//! only shutdown trigger), join, then close the read end, the trace handle
//! and the output file. Every step runs even if an earlier one failed.

#![allow(unsafe_code)]

use log::{info, warn};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::fd::{AsFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::backend::{BufferGeometry, TraceBackend};
use super::drain::{drain_thread, stop_pipe, DrainJob, DrainStats};
use super::perf::PerfPtBackend;
use super::snapshot::snapshot_maps;
use crate::domain::{TracerConfig, TracerError};

/// Owner read/write only
pub const TRACE_FILE_MODE: u32 = 0o600;

const DRAIN_THREAD_NAME: &str = "ptcap-drain";

/// Close a descriptor, reporting the `close(2)` error that drop would hide
fn close_fd(fd: impl IntoRawFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: we took ownership of `raw` and never use it again
    if unsafe { libc::close(raw) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close a descriptor that was shared with the drain thread
fn close_shared<T: IntoRawFd>(shared: Arc<T>) -> io::Result<()> {
    let owned = Arc::try_unwrap(shared)
        .map_err(|_| io::Error::other("descriptor is still referenced by the drain thread"))?;
    close_fd(owned)
}

/// The running drain thread and the write end of its stop pipe
///
/// Dropping a running worker closes the pipe and joins the thread, so any
/// early return from `start` waits for the thread before the resources it
/// references are released.
struct DrainWorker {
    stop_wr: Option<OwnedFd>,
    thread: Option<JoinHandle<Result<DrainStats, TracerError>>>,
}

impl DrainWorker {
    /// Signal the thread to finish and collect its verdict
    fn shutdown(&mut self) -> (Result<(), TracerError>, Result<DrainStats, TracerError>) {
        let closed = self
            .stop_wr
            .take()
            .map_or(Ok(()), |fd| close_fd(fd).map_err(|e| TracerError::release("close stop pipe", e)));

        let verdict = match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(TracerError::Sync("drain thread panicked".into()))),
            None => Err(TracerError::Sync("drain thread was never started".into())),
        };
        (closed, verdict)
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let (closed, verdict) = self.shutdown();
            if let Err(e) = closed {
                warn!("{e}");
            }
            if let Err(e) = verdict {
                warn!("Drain thread failed during rollback: {e}");
            }
        }
    }
}

/// Trace output file that is removed again unless `start` completes
struct PendingOutput {
    file: Arc<File>,
    path: PathBuf,
    armed: bool,
}

impl PendingOutput {
    fn create(path: &Path) -> Result<Self, TracerError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(TRACE_FILE_MODE)
            .open(path)
            .map_err(|e| TracerError::acquire("create trace output file", e))?;
        let output = Self { file: Arc::new(file), path: path.to_path_buf(), armed: true };
        // `mode` only applies to newly created files
        output
            .file
            .set_permissions(Permissions::from_mode(TRACE_FILE_MODE))
            .map_err(|e| TracerError::acquire("restrict trace output file", e))?;
        Ok(output)
    }

    fn keep(mut self) -> Arc<File> {
        self.armed = false;
        Arc::clone(&self.file)
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove partial trace {}: {e}", self.path.display());
            }
        }
    }
}

/// One active trace
///
/// Created by [`TracerContext::start`], consumed by [`TracerContext::stop`].
/// Dropping a context without stopping it still joins the drain thread and
/// closes everything, but errors are only logged.
pub struct TracerContext<B: TraceBackend = PerfPtBackend> {
    // Field order is drop order: the worker must go first
    worker: DrainWorker,
    stop_rd: Arc<OwnedFd>,
    handle: Arc<OwnedFd>,
    output: Arc<File>,
    backend: Arc<B>,
    config: TracerConfig,
}

impl TracerContext<PerfPtBackend> {
    /// Start tracing with Intel PT
    ///
    /// # Errors
    /// See [`TracerContext::start_with`].
    pub fn start(config: TracerConfig) -> Result<Self, TracerError> {
        Self::start_with(Arc::new(PerfPtBackend::new()), config)
    }
}

impl<B: TraceBackend> TracerContext<B> {
    /// Start tracing `config.target_pid` through `backend`
    ///
    /// Returns a fully running context or nothing: on failure every acquired
    /// resource is released and no partial trace file is left behind.
    ///
    /// # Errors
    /// Configuration errors before anything is touched; resource errors if
    /// the snapshot, handle, pipe, output file or hardware enable fails;
    /// synchronisation errors if the drain thread can't be launched or dies
    /// before it is ready; mapping errors reported by the drain thread.
    pub fn start_with(backend: Arc<B>, config: TracerConfig) -> Result<Self, TracerError> {
        config.validate()?;
        info!(
            "Starting trace of {}: trace={}, maps={}, data={}, aux={}",
            config.target_pid,
            config.trace_path.display(),
            config.maps_path.display(),
            config.data_pages,
            config.aux_pages
        );

        snapshot_maps(config.target_pid, &config.maps_path)?;

        let handle = Arc::new(backend.open(config.target_pid)?);
        let (stop_rd, stop_wr) =
            stop_pipe().map_err(|e| TracerError::acquire("create stop pipe", e))?;
        let stop_rd = Arc::new(stop_rd);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let output = PendingOutput::create(&config.trace_path)?;

        let job = DrainJob {
            backend: Arc::clone(&backend),
            handle: Arc::clone(&handle),
            stop: Arc::clone(&stop_rd),
            output: Arc::clone(&output.file),
            geometry: BufferGeometry { data_pages: config.data_pages, aux_pages: config.aux_pages },
            ready: ready_tx,
        };

        // Declared last, so on any early return it is dropped (and joined)
        // before the descriptors above are closed
        let mut worker = DrainWorker { stop_wr: Some(stop_wr), thread: None };
        let thread = thread::Builder::new()
            .name(DRAIN_THREAD_NAME.into())
            .spawn(move || drain_thread(job))
            .map_err(|e| TracerError::Sync(format!("failed to spawn drain thread: {e}")))?;
        worker.thread = Some(thread);

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TracerError::Sync(
                    "drain thread exited before signalling readiness".into(),
                ))
            }
        }

        backend.enable(handle.as_fd())?;
        info!("Tracing {}", config.target_pid);

        Ok(Self { worker, stop_rd, handle, output: output.keep(), backend, config })
    }

    /// The configuration this trace was started with
    #[must_use]
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Stop tracing and release everything
    ///
    /// # Errors
    /// Returns [`TracerError::Teardown`] listing every step that failed,
    /// including a failed drain thread verdict. All steps are attempted.
    pub fn stop(self) -> Result<DrainStats, TracerError> {
        let Self { mut worker, stop_rd, handle, output, backend, config } = self;
        info!("Stopping trace of {}", config.target_pid);
        let mut failures = Vec::new();

        // No new data once the stop signal is sent
        if let Err(e) = backend.disable(handle.as_fd()) {
            failures.push(e);
        }

        let (closed, verdict) = worker.shutdown();
        if let Err(e) = closed {
            failures.push(e);
        }
        let stats = match verdict {
            Ok(stats) => Some(stats),
            Err(e) => {
                failures.push(TracerError::DrainFailed(Box::new(e)));
                None
            }
        };

        for (op, closed) in [
            ("close stop pipe read end", close_shared(stop_rd)),
            ("close trace handle", close_shared(handle)),
            ("close trace output file", close_shared(output)),
        ] {
            if let Err(e) = closed {
                failures.push(TracerError::release(op, e));
            }
        }

        match stats {
            Some(stats) if failures.is_empty() => {
                info!(
                    "Trace of {} complete: {} bytes in {} wakes",
                    config.target_pid, stats.bytes_written, stats.wakes
                );
                Ok(stats)
            }
            _ => {
                for e in &failures {
                    warn!("Teardown failure: {e}");
                }
                Err(TracerError::Teardown(failures))
            }
        }
    }
}

/// Start/stop state machine over [`TracerContext`]
///
/// Rejects starting twice or stopping while idle without touching the
/// active trace.
pub struct Tracer<B: TraceBackend = PerfPtBackend> {
    backend: Arc<B>,
    active: Option<TracerContext<B>>,
}

impl Default for Tracer<PerfPtBackend> {
    fn default() -> Self {
        Self::new(PerfPtBackend::new())
    }
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend: Arc::new(backend), active: None }
    }

    #[must_use]
    pub fn is_tracing(&self) -> bool {
        self.active.is_some()
    }

    /// # Errors
    /// [`TracerError::AlreadyTracing`] if a trace is active, otherwise any
    /// error from [`TracerContext::start_with`].
    pub fn start(&mut self, config: TracerConfig) -> Result<(), TracerError> {
        if self.active.is_some() {
            return Err(TracerError::AlreadyTracing);
        }
        self.active = Some(TracerContext::start_with(Arc::clone(&self.backend), config)?);
        Ok(())
    }

    /// # Errors
    /// [`TracerError::NotTracing`] if idle, otherwise any error from
    /// [`TracerContext::stop`]. The tracer is idle afterwards either way.
    pub fn stop(&mut self) -> Result<DrainStats, TracerError> {
        self.active.take().ok_or(TracerError::NotTracing)?.stop()
    }
}
