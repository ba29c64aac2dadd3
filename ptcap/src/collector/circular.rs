//! # Circular Buffer Reader
//!
//! Copies newly produced bytes out of the AUX ring into a linear sink.
//!
//! The producer only publishes a monotonically increasing `head`; it must be
//! reduced modulo the buffer size before use. `tail` is the consumer's
//! position. Everything in `[tail, head)` (wrapping at the end of the buffer)
//! belongs to the consumer until `tail` is advanced, so `tail` only moves
//! once every byte of the range has reached the sink.
//!
//! ```text
//!  no wrap:   |....TTTTTTTT....|      write [tail, head)
//!                  ^tail   ^head
//!  wrap:      |HHHH......TTTTTT|      write [tail, size) then [0, head)
//!                 ^head  ^tail
//! ```

use super::writer::{write_all, TraceSink};
use crate::domain::TracerError;

/// Drain `[tail, head_monotonic mod len)` of `buf` into `sink`
///
/// On success `tail` is set to the wrapped head and the number of bytes
/// written is returned. On failure `tail` is left untouched.
///
/// # Errors
/// Returns [`TracerError::Cursor`] for an empty buffer or a tail outside the
/// buffer, and [`TracerError::Write`] if the sink fails.
pub fn drain<S: TraceSink + ?Sized>(
    buf: &[u8],
    head_monotonic: u64,
    tail: &mut u64,
    sink: &mut S,
) -> Result<u64, TracerError> {
    let size = buf.len() as u64;
    if size == 0 || *tail >= size {
        return Err(TracerError::Cursor { tail: *tail, size });
    }

    #[allow(clippy::cast_possible_truncation)]
    let (start, head) = (*tail as usize, (head_monotonic % size) as usize);

    let written = if start <= head {
        write_all(sink, &buf[start..head]).map_err(TracerError::Write)?;
        head - start
    } else {
        write_all(sink, &buf[start..]).map_err(TracerError::Write)?;
        write_all(sink, &buf[..head]).map_err(TracerError::Write)?;
        buf.len() - start + head
    };

    // Space up to `head` may now be reused by the producer
    *tail = head as u64;
    Ok(written as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn ring(size: u8) -> Vec<u8> {
        (0..size).collect()
    }

    /// Sink that fails on its `n`th call
    struct FailingSink {
        fail_on: usize,
        calls: usize,
        data: Vec<u8>,
    }

    impl TraceSink for FailingSink {
        fn write_once(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_drain_wrapped_region() {
        let buf = ring(16);
        let mut tail = 12;
        let mut out = Vec::new();

        let n = drain(&buf, 20, &mut tail, &mut out).unwrap();

        assert_eq!(out, vec![12, 13, 14, 15, 0, 1, 2, 3]);
        assert_eq!(n, 8);
        assert_eq!(tail, 4);
    }

    #[test]
    fn test_drain_contiguous_region() {
        let buf = ring(16);
        let mut tail = 2;
        let mut out = Vec::new();

        let n = drain(&buf, 10, &mut tail, &mut out).unwrap();

        assert_eq!(out, (2..10).collect::<Vec<u8>>());
        assert_eq!(n, 8);
        assert_eq!(tail, 10);
    }

    #[test]
    fn test_drain_nothing_new() {
        let buf = ring(16);
        let mut tail = 5;
        let mut out = Vec::new();

        assert_eq!(drain(&buf, 16 * 3 + 5, &mut tail, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(tail, 5);
    }

    #[test]
    fn test_drain_every_cursor_pair() {
        let buf = ring(8);
        for tail_start in 0..8u64 {
            for head in 0..8u64 {
                let mut tail = tail_start;
                let mut out = Vec::new();
                drain(&buf, head + 8 * 5, &mut tail, &mut out).unwrap();

                let expected: Vec<u8> = if tail_start <= head {
                    (tail_start..head).map(|b| b as u8).collect()
                } else {
                    (tail_start..8).chain(0..head).map(|b| b as u8).collect()
                };
                assert_eq!(out, expected, "tail={tail_start} head={head}");
                assert_eq!(tail, head);
            }
        }
    }

    #[test]
    fn test_drain_failure_keeps_tail() {
        let buf = ring(16);
        let mut tail = 12;
        // First half of the wrapped range succeeds, second fails
        let mut sink = FailingSink { fail_on: 2, calls: 0, data: Vec::new() };

        let err = drain(&buf, 4, &mut tail, &mut sink).unwrap_err();

        assert!(matches!(err, TracerError::Write(_)));
        assert_eq!(sink.data, vec![12, 13, 14, 15]);
        assert_eq!(tail, 12);
    }

    #[test]
    fn test_drain_rejects_bad_cursor() {
        let buf = ring(16);
        let mut tail = 16;
        let mut out = Vec::new();
        assert!(matches!(
            drain(&buf, 3, &mut tail, &mut out),
            Err(TracerError::Cursor { tail: 16, size: 16 })
        ));

        let mut tail = 0;
        assert!(matches!(drain(&[], 3, &mut tail, &mut out), Err(TracerError::Cursor { .. })));
    }
}
