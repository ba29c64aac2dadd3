//! Session summary in JSON

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::DrainStats;
use crate::domain::{Pid, TracerConfig};

/// Why a capture session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Interrupted,
    DurationLimit,
    ProcessExited,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitReason::Interrupted => "interrupted",
            ExitReason::DurationLimit => "duration limit reached",
            ExitReason::ProcessExited => "process exited",
        })
    }
}

/// What one capture session produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub pid: Pid,
    pub trace_path: PathBuf,
    pub maps_path: PathBuf,
    pub data_pages: usize,
    pub aux_pages: usize,
    pub wakes: u64,
    pub bytes_written: u64,
    pub elapsed_ms: u64,
    pub exit_reason: ExitReason,
}

impl TraceSummary {
    #[must_use]
    pub fn new(
        config: &TracerConfig,
        stats: DrainStats,
        elapsed: Duration,
        exit_reason: ExitReason,
    ) -> Self {
        Self {
            pid: config.target_pid,
            trace_path: config.trace_path.clone(),
            maps_path: config.maps_path.clone(),
            data_pages: config.data_pages.0,
            aux_pages: config.aux_pages.0,
            wakes: stats.wakes,
            bytes_written: stats.bytes_written,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            exit_reason,
        }
    }
}

/// Write `summary` to any writer as pretty-printed JSON
///
/// # Errors
/// Returns an error if serialization or the underlying write fails.
pub fn write_summary<W: Write>(summary: &TraceSummary, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, summary).context("Failed to write summary JSON")?;
    writeln!(writer).context("Failed to write summary JSON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceSummary {
        let config = TracerConfig::new(Pid(4242)).with_aux_pages(256);
        let stats = DrainStats { wakes: 3, bytes_written: 65_536 };
        TraceSummary::new(&config, stats, Duration::from_millis(1500), ExitReason::DurationLimit)
    }

    #[test]
    fn test_summary_fields() {
        let summary = sample();
        assert_eq!(summary.pid, Pid(4242));
        assert_eq!(summary.trace_path, PathBuf::from("trace.data"));
        assert_eq!(summary.data_pages, 64);
        assert_eq!(summary.aux_pages, 256);
        assert_eq!(summary.elapsed_ms, 1500);
    }

    #[test]
    fn test_write_summary_json() {
        let mut buffer = Vec::new();
        write_summary(&sample(), &mut buffer).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["maps_path"], "trace.maps");
        assert_eq!(json["bytes_written"], 65_536);
        assert_eq!(json["exit_reason"], "duration_limit");
        assert!(buffer.ends_with(b"}\n"));
    }

    #[test]
    fn test_summary_reads_back() {
        let mut buffer = Vec::new();
        write_summary(&sample(), &mut buffer).unwrap();

        let parsed: TraceSummary = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::ProcessExited.to_string(), "process exited");
        assert_eq!(ExitReason::Interrupted.to_string(), "interrupted");
    }
}
