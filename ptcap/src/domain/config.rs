//! Tracer configuration
//!
//! Immutable for the lifetime of one trace. Validated before any file or
//! kernel resource is touched.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::TracerError;
use super::types::{page_size, PageCount, Pid};

/// Default size of the perf data buffer (excluding the control page)
pub const DEFAULT_DATA_PAGES: PageCount = PageCount(64);

/// Default size of the AUX area that receives Intel PT packets
pub const DEFAULT_AUX_PAGES: PageCount = PageCount(1024);

/// Default trace output file name
pub const DEFAULT_TRACE_PATH: &str = "trace.data";

/// Default memory map snapshot file name
pub const DEFAULT_MAPS_PATH: &str = "trace.maps";

/// Everything needed to trace one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub target_pid: Pid,
    /// Raw trace packets are written here
    pub trace_path: PathBuf,
    /// `/proc/<pid>/maps` is copied here at start
    pub maps_path: PathBuf,
    pub data_pages: PageCount,
    pub aux_pages: PageCount,
}

impl TracerConfig {
    /// Configuration with default buffer sizes and output paths
    #[must_use]
    pub fn new(target_pid: Pid) -> Self {
        Self {
            target_pid,
            trace_path: PathBuf::from(DEFAULT_TRACE_PATH),
            maps_path: PathBuf::from(DEFAULT_MAPS_PATH),
            data_pages: DEFAULT_DATA_PAGES,
            aux_pages: DEFAULT_AUX_PAGES,
        }
    }

    #[must_use]
    pub fn with_trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = path.into();
        self
    }

    #[must_use]
    pub fn with_maps_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.maps_path = path.into();
        self
    }

    #[must_use]
    pub fn with_data_pages(mut self, pages: usize) -> Self {
        self.data_pages = PageCount(pages);
        self
    }

    #[must_use]
    pub fn with_aux_pages(mut self, pages: usize) -> Self {
        self.aux_pages = PageCount(pages);
        self
    }

    /// Check buffer geometry
    ///
    /// # Errors
    /// Returns [`TracerError::Config`] if either buffer size is not a positive
    /// power of two, or if the mapping would not fit in the address space.
    pub fn validate(&self) -> Result<(), TracerError> {
        if !self.data_pages.is_valid_ring_size() {
            return Err(TracerError::Config(
                "data_pages must be a positive power of 2".into(),
            ));
        }
        if !self.aux_pages.is_valid_ring_size() {
            return Err(TracerError::Config("aux_pages must be a positive power of 2".into()));
        }

        let page = page_size();
        let base_pages = self.data_pages.0.checked_add(1);
        if base_pages.and_then(|p| p.checked_mul(page)).is_none()
            || self.aux_pages.bytes(page).is_none()
        {
            return Err(TracerError::Config(format!(
                "buffer sizes of {} and {} overflow the address space",
                self.data_pages, self.aux_pages
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TracerConfig::new(Pid(1));
        assert!(config.validate().is_ok());
        assert_eq!(config.trace_path, PathBuf::from("trace.data"));
    }

    #[test]
    fn test_config_bad_data_pages() {
        let config = TracerConfig::new(Pid(1)).with_data_pages(3);
        match config.validate() {
            Err(TracerError::Config(s)) if s == "data_pages must be a positive power of 2" => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_config_bad_aux_pages() {
        let config = TracerConfig::new(Pid(1)).with_aux_pages(0);
        match config.validate() {
            Err(TracerError::Config(s)) if s == "aux_pages must be a positive power of 2" => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_config_overflowing_aux_pages() {
        let huge = (usize::MAX / 2) + 1;
        let config = TracerConfig::new(Pid(1)).with_aux_pages(huge);
        assert!(matches!(config.validate(), Err(TracerError::Config(_))));
    }
}
