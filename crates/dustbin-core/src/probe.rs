//! Filesystem probing: device ids, mount points and partition usage.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use tracing::debug;

use crate::error::{Error, Result};

/// Capacity figures for the filesystem backing a path.
#[derive(Debug, Clone, Copy)]
pub struct PartitionUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub fn partition_usage(path: &Path) -> Result<PartitionUsage> {
    let vfs = statvfs(path).map_err(|errno| {
        Error::read(path, std::io::Error::from_raw_os_error(errno as i32))
    })?;
    let frag = vfs.fragment_size() as u64;
    Ok(PartitionUsage {
        total_bytes: vfs.blocks() as u64 * frag,
        available_bytes: vfs.blocks_available() as u64 * frag,
    })
}

/// Device id of the filesystem holding `path` (lstat, symlinks not followed).
pub fn device_of(path: &Path) -> Result<u64> {
    let meta = fs::symlink_metadata(path).map_err(|e| Error::read(path, e))?;
    Ok(meta.dev())
}

/// Like [`device_of`], but falls back to the nearest existing ancestor.
/// Used for paths that are about to be created.
pub fn device_of_nearest(path: &Path) -> Result<u64> {
    for ancestor in path.ancestors() {
        if let Ok(meta) = fs::symlink_metadata(ancestor) {
            return Ok(meta.dev());
        }
    }
    Err(Error::does_not_exist(path))
}

/// Mount point of the filesystem holding `path`: the highest ancestor that
/// still reports the same device id.
pub fn mount_point_of(path: &Path) -> Result<PathBuf> {
    let path = fs::canonicalize(path).map_err(|e| Error::read(path, e))?;
    let device = device_of(&path)?;

    let mut mount_point = path.clone();
    for ancestor in path.ancestors() {
        match fs::metadata(ancestor) {
            Ok(meta) if meta.dev() == device => mount_point = ancestor.to_path_buf(),
            _ => break,
        }
    }
    debug!("mount point of {} is {}", path.display(), mount_point.display());
    Ok(mount_point)
}

/// Mounted filesystems backed by real block devices, in `/proc/mounts`
/// (i.e. mount) order. The stable order is what keeps trash-id assignment
/// deterministic across process restarts.
pub fn list_mount_points() -> Result<Vec<PathBuf>> {
    let table = Path::new("/proc/mounts");
    let contents = fs::read_to_string(table).map_err(|e| Error::read(table, e))?;
    Ok(parse_mount_table(&contents))
}

fn parse_mount_table(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            // Pseudo-filesystems (proc, sysfs, tmpfs, ...) have no device
            // path and never hold a trash directory.
            if !device.starts_with('/') {
                return None;
            }
            // Octal escapes (\040 for space) appear in mount paths with
            // spaces; those are rare enough to skip rather than decode.
            if mount_point.contains('\\') {
                return None;
            }
            Some(PathBuf::from(mount_point))
        })
        .collect()
}
