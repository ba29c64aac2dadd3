//! In-process stand-ins for the tracing hardware
//!
//! A pipe plays the trace handle (its write end hanging up is the handle
//! hanging up, its read end closing breaks a write-end handle) and a
//! `Vec<u8>` plays the AUX area.

use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::backend::{BufferGeometry, TraceBackend, TraceSource};
use super::drain::stop_pipe;
use crate::domain::{Pid, TracerError};

/// Circular buffer backed by memory
pub(crate) struct VecSource {
    buf: Vec<u8>,
    head: Arc<AtomicU64>,
    tail: u64,
    fail_release: bool,
}

impl VecSource {
    /// A ring of `size` bytes whose producer already wrote `payload`
    pub(crate) fn with_payload(size: usize, payload: &[u8]) -> Self {
        let source = Self::unpublished(size, payload, Arc::new(AtomicU64::new(0)));
        source.head.store(payload.len() as u64, Ordering::Release);
        source
    }

    fn unpublished(size: usize, payload: &[u8], head: Arc<AtomicU64>) -> Self {
        assert!(payload.len() <= size);
        let mut buf = payload.to_vec();
        buf.resize(size, 0);
        Self { buf, head, tail: 0, fail_release: false }
    }
}

impl TraceSource for VecSource {
    fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    fn tail(&self) -> u64 {
        self.tail
    }

    fn set_tail(&mut self, tail: u64) {
        self.tail = tail;
    }

    fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn release(self) -> Result<(), TracerError> {
        if self.fail_release {
            return Err(TracerError::Unmap(io::Error::from_raw_os_error(libc::EINVAL)));
        }
        Ok(())
    }
}

/// Knobs for [`FakeBackend`]
#[derive(Default)]
pub(crate) struct FakeBehaviour {
    pub fail_open: bool,
    pub fail_map: bool,
    pub fail_enable: bool,
    pub fail_disable: bool,
    pub fail_release: bool,
    /// Start the consumer with a cursor outside the buffer
    pub corrupt_tail: bool,
    /// Close the notification pipe when tracing is enabled
    pub hang_up_on_enable: bool,
    /// Hand out the pipe's write end as the handle and close its read end
    /// when tracing is enabled, so `poll` reports `POLLERR`
    pub break_handle_on_enable: bool,
    /// Bytes the "hardware" produces once enabled
    pub payload: Vec<u8>,
}

/// Records every call so tests can check ordering
pub(crate) struct FakeBackend {
    behaviour: FakeBehaviour,
    head: Arc<AtomicU64>,
    notify: Mutex<Option<OwnedFd>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    pub(crate) fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            head: Arc::new(AtomicU64::new(0)),
            notify: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn refuse(op: &'static str) -> TracerError {
        TracerError::acquire(op, io::Error::from_raw_os_error(libc::EACCES))
    }
}

impl TraceBackend for FakeBackend {
    type Source = VecSource;

    fn open(&self, _pid: Pid) -> Result<OwnedFd, TracerError> {
        self.record("open");
        if self.behaviour.fail_open {
            return Err(Self::refuse("open fake trace handle"));
        }
        let (rd, wr) = stop_pipe().map_err(|e| TracerError::acquire("create fake handle", e))?;
        let (handle, notify) = if self.behaviour.break_handle_on_enable { (wr, rd) } else { (rd, wr) };
        *self.notify.lock().unwrap() = Some(notify);
        Ok(handle)
    }

    fn map(
        &self,
        _handle: BorrowedFd<'_>,
        geometry: BufferGeometry,
    ) -> Result<VecSource, TracerError> {
        self.record("map");
        if self.behaviour.fail_map {
            return Err(Self::refuse("map fake ring"));
        }
        let size = (geometry.aux_pages.0 * 64).max(self.behaviour.payload.len() + 1);
        let mut source =
            VecSource::unpublished(size, &self.behaviour.payload, Arc::clone(&self.head));
        source.fail_release = self.behaviour.fail_release;
        if self.behaviour.corrupt_tail {
            source.tail = size as u64;
        }
        Ok(source)
    }

    fn enable(&self, _handle: BorrowedFd<'_>) -> Result<(), TracerError> {
        self.record("enable");
        if self.behaviour.fail_enable {
            return Err(Self::refuse("enable fake tracing"));
        }
        self.head.store(self.behaviour.payload.len() as u64, Ordering::Release);
        if self.behaviour.hang_up_on_enable || self.behaviour.break_handle_on_enable {
            self.notify.lock().unwrap().take();
        }
        Ok(())
    }

    fn disable(&self, _handle: BorrowedFd<'_>) -> Result<(), TracerError> {
        self.record("disable");
        if self.behaviour.fail_disable {
            return Err(TracerError::release(
                "disable fake tracing",
                io::Error::from_raw_os_error(libc::EIO),
            ));
        }
        Ok(())
    }
}
