//! Domain types providing compile-time safety and self-documentation
//!
//! Newtype wrappers keep process IDs and page counts from being confused with
//! byte sizes or raw descriptors in function signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID of the traced target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid(pub i32);

impl Pid {
    /// The calling process
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn current() -> Self {
        Pid(std::process::id() as i32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Pid(pid)
    }
}

/// A size expressed in platform pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCount(pub usize);

impl PageCount {
    /// Size in bytes for the given page size, or `None` on overflow
    #[must_use]
    pub fn bytes(self, page_size: usize) -> Option<usize> {
        self.0.checked_mul(page_size)
    }

    #[must_use]
    pub fn is_valid_ring_size(self) -> bool {
        self.0.is_power_of_two()
    }
}

impl fmt::Display for PageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pages", self.0)
    }
}

/// Size of a platform page in bytes
#[must_use]
#[allow(unsafe_code, clippy::cast_sign_loss)]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(1234).to_string(), "PID:1234");
    }

    #[test]
    fn test_page_count_bytes() {
        assert_eq!(PageCount(4).bytes(4096), Some(16384));
        assert_eq!(PageCount(usize::MAX).bytes(4096), None);
    }

    #[test]
    fn test_ring_size_must_be_power_of_two() {
        assert!(PageCount(1).is_valid_ring_size());
        assert!(PageCount(1024).is_valid_ring_size());
        assert!(!PageCount(0).is_valid_ring_size());
        assert!(!PageCount(3).is_valid_ring_size());
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
