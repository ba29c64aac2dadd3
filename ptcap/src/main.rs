//! # ptcap - Main Entry Point
//!
//! `ptcap <PROCESS>` or `ptcap --pid <PID>`: trace until Ctrl+C, the
//! `--duration` limit, or the target exiting, then print a summary.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::time::{Duration, Instant};

use ptcap::cli::Args;
use ptcap::collector::TracerContext;
use ptcap::domain::{Pid, TracerError};
use ptcap::export::{write_summary, ExitReason, TraceSummary};
use ptcap::preflight::run_preflight_checks;
use ptcap::process_lookup::find_process_by_name;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// How often the main loop checks the duration limit and target liveness
const TICK: Duration = Duration::from_millis(100);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(is_permission_error) {
        return EXIT_NOPERM;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn is_permission_error(cause: &(dyn std::error::Error + 'static)) -> bool {
    cause.downcast_ref::<io::Error>().is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
}

/// Resolve the target PID from CLI arguments.
///
/// - `ptcap my-app` - find process by name
/// - `ptcap --pid 1234` - explicit PID
fn resolve_pid(args: &Args) -> Result<Pid> {
    if let Some(ref name) = args.process {
        if args.pid.is_some() {
            anyhow::bail!(
                "Cannot use PROCESS argument with --pid.\n\n\
                 Use either:\n  \
                 ptcap my-app            (by name)\n  \
                 ptcap --pid 1234        (explicit PID)"
            );
        }
        let info = find_process_by_name(name)?;
        info!("Resolved '{name}' to {} ({})", info.pid, info.exe_path.display());
        return Ok(info.pid);
    }

    if let Some(pid) = args.pid {
        return Ok(Pid(pid));
    }

    anyhow::bail!(
        "Missing required argument: PROCESS or --pid\n\n\
         Usage:\n  \
         ptcap my-app            Trace a process by name\n  \
         ptcap --pid 1234        Trace a PID\n\n\
         Run 'ptcap --help' for more options"
    )
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let pid = resolve_pid(&args)?;
    let config = args.tracer_config(pid);
    config.validate()?;

    run_preflight_checks(pid)?;

    if !quiet {
        println!("ptcap v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {}", pid.0);
        println!("trace: {}", config.trace_path.display());
        println!("maps: {}", config.maps_path.display());
        println!("buffers: {} data, {} aux", config.data_pages, config.aux_pages);
    }

    let tracer = TracerContext::start(config.clone()).context("Failed to start tracing")?;
    let started = Instant::now();

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let proc_path = format!("/proc/{}", pid.0);

    let exit_reason = loop {
        if duration_limit.is_some_and(|limit| started.elapsed() >= limit) {
            break ExitReason::DurationLimit;
        }

        if !Path::new(&proc_path).exists() {
            break ExitReason::ProcessExited;
        }

        tokio::select! {
            () = tokio::time::sleep(TICK) => {}
            _ = &mut ctrl_c => {
                break ExitReason::Interrupted;
            }
        }
    };

    let elapsed = started.elapsed();
    let stats = tracer.stop().map_err(report_teardown)?;
    let summary = TraceSummary::new(&config, stats, elapsed, exit_reason);

    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} bytes of trace in {} wakes",
            exit_reason,
            elapsed.as_secs_f64(),
            summary.bytes_written,
            summary.wakes,
        );
        println!("saved: {}", config.trace_path.display());
    }

    if let Some(ref summary_path) = args.summary {
        let file = File::create(summary_path)
            .with_context(|| format!("Failed to create {}", summary_path.display()))?;
        write_summary(&summary, BufWriter::new(file))?;
        if !quiet {
            println!("summary: {}", summary_path.display());
        }
    }

    Ok(())
}

/// Stop errors still leave a usable trace file; say so before failing
fn report_teardown(err: TracerError) -> anyhow::Error {
    eprintln!("warning: trace may be incomplete ({:?} failure)", err.kind());
    anyhow::Error::new(err).context("Failed to stop tracing cleanly")
}
