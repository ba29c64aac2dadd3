//! Process memory map snapshot
//!
//! Saves `/proc/<pid>/maps` at trace start so a decoder can later relate
//! virtual addresses in the trace to on-disk code.

use log::info;
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::domain::{Pid, TracerError};

/// Owner read/write only
pub const SNAPSHOT_MODE: u32 = 0o600;

/// Copy the live memory map of `pid` to `out_path` with mode 0600
///
/// # Errors
/// Returns [`TracerError::Snapshot`] if the map is unreadable (for example
/// because the process vanished) or the destination can't be written.
pub fn snapshot_maps(pid: Pid, out_path: &Path) -> Result<(), TracerError> {
    let snapshot_err = |source| TracerError::Snapshot { pid, path: out_path.to_path_buf(), source };

    // procfs files report a zero size, so read them rather than fs::copy
    let maps = fs::read(format!("/proc/{}/maps", pid.0)).map_err(snapshot_err)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SNAPSHOT_MODE)
        .open(out_path)
        .map_err(snapshot_err)?;
    // `mode` only applies to newly created files
    file.set_permissions(Permissions::from_mode(SNAPSHOT_MODE)).map_err(snapshot_err)?;
    file.write_all(&maps).map_err(snapshot_err)?;

    info!("Saved memory map of {pid} to {} ({} bytes)", out_path.display(), maps.len());
    Ok(())
}
