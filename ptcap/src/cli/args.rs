//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::domain::config::{
    DEFAULT_AUX_PAGES, DEFAULT_DATA_PAGES, DEFAULT_MAPS_PATH, DEFAULT_TRACE_PATH,
};
use crate::domain::{Pid, TracerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "ptcap",
    about = "Record an Intel PT control-flow trace of a running process",
    after_help = "\
EXAMPLES:
    sudo ptcap my-app                           Trace by process name until Ctrl+C
    sudo ptcap --pid 1234 --duration 10         Trace a PID for ten seconds
    sudo ptcap --pid 1234 --summary run.json    Also write a JSON session summary"
)]
pub struct Args {
    /// Process name to trace (auto-detects PID)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to trace
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Where to write the raw PT packet stream
    #[arg(long, value_name = "FILE", default_value = DEFAULT_TRACE_PATH)]
    pub trace_out: PathBuf,

    /// Where to write the memory map snapshot
    #[arg(long, value_name = "FILE", default_value = DEFAULT_MAPS_PATH)]
    pub maps_out: PathBuf,

    /// Data buffer size in pages (power of 2)
    #[arg(long, default_value_t = DEFAULT_DATA_PAGES.0)]
    pub data_pages: usize,

    /// AUX buffer size in pages (power of 2)
    #[arg(long, default_value_t = DEFAULT_AUX_PAGES.0)]
    pub aux_pages: usize,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Write a JSON session summary to FILE
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Tracer configuration for `pid` from these arguments
    #[must_use]
    pub fn tracer_config(&self, pid: Pid) -> TracerConfig {
        TracerConfig::new(pid)
            .with_trace_path(self.trace_out.clone())
            .with_maps_path(self.maps_out.clone())
            .with_data_pages(self.data_pages)
            .with_aux_pages(self.aux_pages)
    }
}
