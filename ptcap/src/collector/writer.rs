//! Output writer
//!
//! Pushes an arbitrary-length byte buffer into a descriptor, chunking
//! transfers that exceed what a single `write(2)` may move and retrying
//! interrupted calls.

use std::fs::File;
use std::io::{self, Write};

/// Largest transfer a single `write(2)` call accepts (`SSIZE_MAX`)
#[allow(clippy::cast_sign_loss)]
pub const MAX_TRANSFER: usize = isize::MAX as usize;

/// Destination for drained trace bytes
pub trait TraceSink {
    /// Largest number of bytes one [`TraceSink::write_once`] call may be given
    fn max_transfer(&self) -> usize {
        MAX_TRANSFER
    }

    /// Issue a single write; may transfer fewer bytes than offered
    ///
    /// # Errors
    /// Returns the underlying I/O error, including `Interrupted`.
    fn write_once(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl TraceSink for &File {
    fn write_once(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

impl TraceSink for File {
    fn write_once(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

impl TraceSink for Vec<u8> {
    fn write_once(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Write all of `buf` to `sink`
///
/// # Errors
/// Returns the first non-`Interrupted` error from the sink, or `WriteZero` if
/// the sink stops accepting bytes.
pub fn write_all<S: TraceSink + ?Sized>(sink: &mut S, mut buf: &[u8]) -> io::Result<()> {
    let block = sink.max_transfer().max(1);
    while !buf.is_empty() {
        let chunk = &buf[..buf.len().min(block)];
        match sink.write_once(chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "trace sink accepted no bytes",
                ))
            }
            Ok(n) => buf = &buf[n..],
            // Interrupted before anything was written
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
