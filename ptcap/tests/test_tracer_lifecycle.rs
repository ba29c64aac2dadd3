use ptcap::collector::{PerfPtBackend, Tracer, TracerContext, PT_PMU_TYPE_PATH};
use ptcap::domain::{ErrorKind, Pid, TracerConfig, TracerError};
use std::io;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Arc;

fn config_in(dir: &tempfile::TempDir, pid: Pid) -> TracerConfig {
    TracerConfig::new(pid)
        .with_trace_path(dir.path().join("trace.data"))
        .with_maps_path(dir.path().join("trace.maps"))
        .with_data_pages(4)
        .with_aux_pages(16)
}

fn spawn_sleeper() -> Child {
    Command::new("sleep").arg("5").spawn().expect("failed to spawn sleep")
}

#[test]
fn test_missing_pmu_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, Pid::current());
    let backend = Arc::new(PerfPtBackend::with_pmu_type_path("/nonexistent/intel_pt/type"));

    let err = TracerContext::start_with(backend, config.clone()).err().unwrap();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    // The snapshot precedes the handle; the output file does not
    assert!(config.maps_path.exists());
    assert!(!config.trace_path.exists());
}

#[test]
fn test_invalid_geometry_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, Pid::current()).with_data_pages(0);

    let err = TracerContext::start(config.clone()).err().unwrap();

    assert!(matches!(err, TracerError::Config(_)));
    assert!(!config.maps_path.exists());
    assert!(!config.trace_path.exists());
}

#[test]
fn test_tracer_stop_while_idle() {
    let mut tracer = Tracer::default();
    assert!(!tracer.is_tracing());
    assert!(matches!(tracer.stop(), Err(TracerError::NotTracing)));
}

fn is_refused(err: &TracerError) -> bool {
    matches!(err, TracerError::Acquire { source, .. }
        if source.kind() == io::ErrorKind::PermissionDenied
            || source.raw_os_error() == Some(libc::EPERM)
            || source.raw_os_error() == Some(libc::EACCES))
}

/// Runs only where Intel PT is exposed and we may use it
#[test]
fn test_trace_child_process() {
    if !Path::new(PT_PMU_TYPE_PATH).exists() {
        eprintln!("skipping: Intel PT not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut child = spawn_sleeper();
    let config = config_in(&dir, Pid(child.id().try_into().unwrap()));

    let ctx = match TracerContext::start(config.clone()) {
        Ok(ctx) => ctx,
        Err(e) if is_refused(&e) => {
            eprintln!("skipping: {e}");
            child.kill().ok();
            child.wait().ok();
            return;
        }
        Err(e) => panic!("start failed: {e}"),
    };

    std::thread::sleep(std::time::Duration::from_millis(200));
    let stats = ctx.stop().unwrap();
    child.kill().ok();
    child.wait().ok();

    let written = std::fs::metadata(&config.trace_path).unwrap().len();
    assert_eq!(written, stats.bytes_written);
    assert!(!std::fs::read_to_string(&config.maps_path).unwrap().is_empty());
}
