//! # Drain Loop
//!
//! Body of the background drain thread: map the ring buffer, report
//! readiness, then block in `poll(2)` until the kernel signals new trace
//! data, the trace handle hangs up, or the stop pipe hangs up.
//!
//! ## Wake Sources
//!
//! | Descriptor  | Events             | Meaning                              |
//! |-------------|--------------------|--------------------------------------|
//! | trace handle| `POLLIN`           | AUX watermark reached                |
//! | trace handle| `POLLHUP`          | Traced process went away             |
//! | stop pipe   | `POLLHUP`          | Write end closed by `stop`           |
//!
//! Every wake drains before deciding whether to exit, so data produced just
//! before shutdown still reaches the output file.

#![allow(unsafe_code)]

use crossbeam_channel::{SendError, Sender};
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use super::backend::{BufferGeometry, TraceBackend, TraceSource};
use super::circular::drain;
use super::writer::TraceSink;
use crate::domain::TracerError;

/// Outcome of a successful drain run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Number of times `poll(2)` returned
    pub wakes: u64,
    /// Trace bytes written to the output
    pub bytes_written: u64,
}

/// Why the drain thread woke up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wake {
    pub data_ready: bool,
    pub handle_hung_up: bool,
    pub stop_requested: bool,
}

/// Create the stop pipe as `(read end, write end)`
///
/// Closing the write end makes the read end report `POLLHUP`.
///
/// # Errors
/// Returns the `pipe2(2)` error.
pub fn stop_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` has room for the two descriptors pipe2 writes
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and ours
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Block, with no timeout, until `handle` or `stop` has something to report
///
/// # Errors
/// Returns [`TracerError::Wait`] if `poll(2)` fails or flags either
/// descriptor as invalid or in error. Interrupted calls are not retried.
pub fn wait_for_events(handle: RawFd, stop: RawFd) -> Result<Wake, TracerError> {
    let mut fds = [
        libc::pollfd { fd: handle, events: libc::POLLIN | libc::POLLHUP, revents: 0 },
        libc::pollfd { fd: stop, events: libc::POLLHUP, revents: 0 },
    ];
    // SAFETY: `fds` is a valid array of two pollfd structs
    if unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) } == -1 {
        return Err(TracerError::Wait(io::Error::last_os_error()));
    }

    for pfd in &fds {
        if pfd.revents & (libc::POLLNVAL | libc::POLLERR) != 0 {
            return Err(TracerError::Wait(io::Error::other(format!(
                "descriptor {} reported poll events 0x{:x}",
                pfd.fd, pfd.revents
            ))));
        }
    }

    Ok(Wake {
        data_ready: fds[0].revents & libc::POLLIN != 0,
        handle_hung_up: fds[0].revents & libc::POLLHUP != 0,
        stop_requested: fds[1].revents & libc::POLLHUP != 0,
    })
}

/// Drain `source` into `sink` on every wake until stopped
///
/// # Errors
/// Aborts on the first wait or drain failure. Bytes already written stay in
/// the sink.
pub fn run_loop<S, W>(
    handle: RawFd,
    stop: RawFd,
    source: &mut S,
    sink: &mut W,
) -> Result<DrainStats, TracerError>
where
    S: TraceSource,
    W: TraceSink + ?Sized,
{
    let mut stats = DrainStats::default();

    loop {
        let wake = wait_for_events(handle, stop)?;
        stats.wakes += 1;

        let head = source.head();
        let mut tail = source.tail();
        debug!(
            "wake #{}: aux_head=0x{head:x} aux_tail=0x{tail:x} size=0x{:x} {wake:?}",
            stats.wakes,
            source.buffer().len()
        );

        stats.bytes_written += drain(source.buffer(), head, &mut tail, sink)?;
        source.set_tail(tail);

        if wake.stop_requested {
            debug!("stop requested");
            break;
        }
        if wake.handle_hung_up {
            debug!("trace handle hung up");
            break;
        }
    }

    info!("Drain loop exit: awoke {} times, wrote {} bytes", stats.wakes, stats.bytes_written);
    Ok(stats)
}

/// Everything the drain thread needs, moved into it at spawn
pub(crate) struct DrainJob<B: TraceBackend> {
    pub backend: Arc<B>,
    pub handle: Arc<OwnedFd>,
    pub stop: Arc<OwnedFd>,
    pub output: Arc<File>,
    pub geometry: BufferGeometry,
    /// Posted exactly once; a dropped sender also unblocks the caller
    pub ready: Sender<Result<(), TracerError>>,
}

/// Drain thread entry point
pub(crate) fn drain_thread<B: TraceBackend>(job: DrainJob<B>) -> Result<DrainStats, TracerError> {
    let DrainJob { backend, handle, stop, output, geometry, ready } = job;
    debug!("drain thread init: {geometry:?}");

    let mut source = match backend.map(handle.as_fd(), geometry) {
        Ok(source) => source,
        Err(e) => {
            // The mapping error itself is reported by `start`
            if let Err(SendError(Err(lost))) = ready.send(Err(e)) {
                warn!("Tracer stopped waiting before the mapping failure arrived: {lost}");
            }
            return Err(TracerError::Sync("ring buffer mapping failed".into()));
        }
    };

    if ready.send(Ok(())).is_err() {
        warn!("Tracer stopped waiting before the drain thread was ready");
        if let Err(e) = source.release() {
            warn!("{e}");
        }
        return Err(TracerError::Sync("readiness was not observed".into()));
    }
    drop(ready);

    let mut sink: &File = &output;
    let verdict = run_loop(handle.as_raw_fd(), stop.as_raw_fd(), &mut source, &mut sink);

    match (verdict, source.release()) {
        (Ok(stats), Ok(())) => Ok(stats),
        (Err(e), Ok(())) | (Ok(_), Err(e)) => {
            warn!("Drain thread failed: {e}");
            Err(e)
        }
        (Err(e), Err(unmap)) => {
            warn!("Drain thread failed: {e} (and {unmap})");
            Err(TracerError::Teardown(vec![e, unmap]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fake::VecSource;
    use std::io::Write;

    /// A descriptor number nothing in the test process has open
    const INVALID_FD: RawFd = 1_000_000;

    fn notify_pipe() -> (OwnedFd, File) {
        let (rd, wr) = stop_pipe().unwrap();
        (rd, File::from(wr))
    }

    #[test]
    fn test_wait_reports_stop_request() {
        let (handle_rd, _handle_wr) = notify_pipe();
        let (stop_rd, stop_wr) = stop_pipe().unwrap();
        drop(stop_wr);

        let wake = wait_for_events(handle_rd.as_raw_fd(), stop_rd.as_raw_fd()).unwrap();

        assert_eq!(wake, Wake { data_ready: false, handle_hung_up: false, stop_requested: true });
    }

    #[test]
    fn test_wait_reports_data_ready() {
        let (handle_rd, mut handle_wr) = notify_pipe();
        let (stop_rd, _stop_wr) = stop_pipe().unwrap();
        handle_wr.write_all(b"!").unwrap();

        let wake = wait_for_events(handle_rd.as_raw_fd(), stop_rd.as_raw_fd()).unwrap();

        assert!(wake.data_ready);
        assert!(!wake.stop_requested);
    }

    #[test]
    fn test_wait_fails_on_invalid_descriptor() {
        let (stop_rd, _stop_wr) = stop_pipe().unwrap();
        let err = wait_for_events(INVALID_FD, stop_rd.as_raw_fd()).unwrap_err();
        assert!(matches!(err, TracerError::Wait(_)));
    }

    #[test]
    fn test_run_loop_drains_on_final_wake() {
        let (handle_rd, _handle_wr) = notify_pipe();
        let (stop_rd, stop_wr) = stop_pipe().unwrap();
        let mut source = VecSource::with_payload(16, b"PSB+TNT");
        drop(stop_wr);

        let mut out = Vec::new();
        let stats =
            run_loop(handle_rd.as_raw_fd(), stop_rd.as_raw_fd(), &mut source, &mut out).unwrap();

        assert_eq!(out, b"PSB+TNT");
        assert_eq!(stats, DrainStats { wakes: 1, bytes_written: 7 });
        assert_eq!(source.tail(), 7);
    }

    #[test]
    fn test_run_loop_exits_on_handle_hangup() {
        let (handle_rd, handle_wr) = notify_pipe();
        let (stop_rd, _stop_wr) = stop_pipe().unwrap();
        let mut source = VecSource::with_payload(8, b"abc");
        drop(handle_wr);

        let mut out = Vec::new();
        let stats =
            run_loop(handle_rd.as_raw_fd(), stop_rd.as_raw_fd(), &mut source, &mut out).unwrap();

        assert_eq!(out, b"abc");
        assert_eq!(stats.wakes, 1);
    }

    #[test]
    fn test_run_loop_aborts_on_wait_failure() {
        let (stop_rd, _stop_wr) = stop_pipe().unwrap();
        let mut source = VecSource::with_payload(8, b"abc");

        let mut out = Vec::new();
        let err = run_loop(INVALID_FD, stop_rd.as_raw_fd(), &mut source, &mut out).unwrap_err();

        assert!(matches!(err, TracerError::Wait(_)));
        assert!(out.is_empty());
        assert_eq!(source.tail(), 0);
    }

    #[test]
    fn test_unobserved_mapping_failure_ends_thread() {
        use crate::collector::fake::{FakeBackend, FakeBehaviour};
        use crate::domain::PageCount;

        let (handle, _handle_wr) = stop_pipe().unwrap();
        let (stop, _stop_wr) = stop_pipe().unwrap();
        let (ready, ready_rx) = crossbeam_channel::bounded(1);
        drop(ready_rx);
        let backend = Arc::new(FakeBackend::new(FakeBehaviour { fail_map: true, ..Default::default() }));
        let job = DrainJob {
            backend: Arc::clone(&backend),
            handle: Arc::new(handle),
            stop: Arc::new(stop),
            output: Arc::new(tempfile::tempfile().unwrap()),
            geometry: BufferGeometry { data_pages: PageCount(1), aux_pages: PageCount(1) },
            ready,
        };

        let err = drain_thread(job).unwrap_err();

        assert!(matches!(err, TracerError::Sync(_)));
        assert_eq!(backend.calls(), ["map"]);
    }

    #[test]
    fn test_run_loop_aborts_on_drain_failure() {
        let (handle_rd, _handle_wr) = notify_pipe();
        let (stop_rd, stop_wr) = stop_pipe().unwrap();
        let mut source = VecSource::with_payload(8, b"abc");
        source.set_tail(8);
        drop(stop_wr);

        let mut out = Vec::new();
        let err = run_loop(handle_rd.as_raw_fd(), stop_rd.as_raw_fd(), &mut source, &mut out)
            .unwrap_err();

        assert!(matches!(err, TracerError::Cursor { tail: 8, size: 8 }));
        assert_eq!(source.tail(), 8);
    }
}
