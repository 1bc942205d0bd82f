//! Physical movement of content into and out of `files/`.
//!
//! Moves try a direct rename first; a cross-device failure falls back to
//! an explicit recursive copy followed by deletion of the source. The
//! source is never deleted until the destination copy is fully at rest,
//! and a partially written destination is cleaned up before reporting.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::TrashRegistry;

/// Closed set of entry types the engine moves. Determined by an lstat
/// probe and switched over explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
    Directory,
}

impl EntryKind {
    pub fn probe(path: &Path) -> Result<EntryKind> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::read(path, e))?;
        let file_type = meta.file_type();
        Ok(if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        })
    }
}

/// Resolve an addressed item to its real filesystem path.
pub fn physical_path(
    registry: &TrashRegistry,
    trash_id: u32,
    file_id: &str,
    relative_path: &str,
) -> Result<PathBuf> {
    let mut path = registry.files_path(trash_id, file_id)?;
    if !relative_path.is_empty() {
        path = path.join(relative_path);
    }
    Ok(path)
}

pub fn move_to_trash(
    registry: &TrashRegistry,
    src: &Path,
    trash_id: u32,
    file_id: &str,
) -> Result<()> {
    let dest = registry.files_path(trash_id, file_id)?;
    move_path(src, &dest)
}

/// Move an item (or a file nested inside a trashed directory) back out of
/// the trash. Restoring into a directory the user has since deleted is
/// rejected up front, before any I/O.
pub fn move_from_trash(
    registry: &TrashRegistry,
    dest: &Path,
    trash_id: u32,
    file_id: &str,
    relative_path: &str,
) -> Result<()> {
    let src = physical_path(registry, trash_id, file_id, relative_path)?;
    check_restore_target(dest)?;
    move_path(&src, dest)
}

pub fn copy_to_trash(
    registry: &TrashRegistry,
    src: &Path,
    trash_id: u32,
    file_id: &str,
) -> Result<()> {
    let dest = registry.files_path(trash_id, file_id)?;
    copy_entry(src, &dest)
}

pub fn copy_from_trash(
    registry: &TrashRegistry,
    dest: &Path,
    trash_id: u32,
    file_id: &str,
    relative_path: &str,
) -> Result<()> {
    let src = physical_path(registry, trash_id, file_id, relative_path)?;
    check_restore_target(dest)?;
    copy_entry(&src, dest)
}

fn check_restore_target(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(Error::RestoreTargetMissing {
                path: dest.to_path_buf(),
            });
        }
    }
    if fs::symlink_metadata(dest).is_ok() {
        return Err(Error::AlreadyExists {
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

/// Permanently delete a trashed item: the content tree and its info
/// record. Only whole items can be deleted; a second deleter finding the
/// content already gone is treated as satisfied.
pub fn del(registry: &TrashRegistry, trash_id: u32, file_id: &str) -> Result<()> {
    let info_path = registry.info_path(trash_id, file_id)?;
    let files_path = registry.files_path(trash_id, file_id)?;

    if let Err(e) = fs::symlink_metadata(&info_path) {
        return Err(match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::access_denied(&files_path),
            _ => Error::does_not_exist(&files_path),
        });
    }

    remove_recursive(&files_path)?;

    match fs::remove_file(&info_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::write(&info_path, e)),
    }
}

fn move_path(src: &Path, dest: &Path) -> Result<()> {
    match direct_rename(src, dest) {
        Ok(()) => Ok(()),
        Err(Error::CrossDevice { .. }) => {
            debug!(
                "rename {} -> {} crossed a device, copying instead",
                src.display(),
                dest.display()
            );
            copy_then_delete(src, dest)
        }
        Err(e) => Err(e),
    }
}

fn direct_rename(src: &Path, dest: &Path) -> Result<()> {
    fs::rename(src, dest).map_err(|e| match e.raw_os_error() {
        Some(code) if code == nix::libc::EXDEV => Error::CrossDevice {
            path: src.to_path_buf(),
        },
        Some(code) if code == nix::libc::EACCES || code == nix::libc::EPERM => {
            Error::access_denied(dest)
        }
        Some(code) if code == nix::libc::ENOENT => Error::does_not_exist(src),
        _ => Error::write(src, e),
    })
}

/// The cross-filesystem fallback, as an explicit observable step: copy the
/// full subtree, then delete the source. Not crash-atomic — a kill between
/// copy completion and source deletion leaves a duplicate, matching the
/// historical behavior this engine replaces.
pub fn copy_then_delete(src: &Path, dest: &Path) -> Result<()> {
    if let Err(e) = copy_recursive(src, dest) {
        cleanup_partial(dest);
        return Err(e);
    }
    if let Err(e) = remove_recursive(src) {
        // Keep exactly one copy: the source survived, so drop the copy.
        warn!(
            "copied {} but could not delete it afterwards: {}",
            src.display(),
            e
        );
        cleanup_partial(dest);
        return Err(e);
    }
    Ok(())
}

fn cleanup_partial(dest: &Path) {
    if let Err(cleanup) = remove_recursive(dest) {
        // Secondary failure: logged, not fatal.
        warn!(
            "could not clean up partial destination {}: {}",
            dest.display(),
            cleanup
        );
    }
}

fn copy_entry(src: &Path, dest: &Path) -> Result<()> {
    if let Err(e) = copy_recursive(src, dest) {
        cleanup_partial(dest);
        return Err(e);
    }
    Ok(())
}

/// Recursive copy preserving directory structure, regular file bytes and
/// symlink targets verbatim (a link is recreated pointing at the same
/// target string, never dereferenced). Permission bits are carried over
/// best-effort for directories.
fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    match EntryKind::probe(src)? {
        EntryKind::File => {
            fs::copy(src, dest).map_err(|e| Error::write(dest, e))?;
        }
        EntryKind::Symlink => {
            let target = fs::read_link(src).map_err(|e| Error::read(src, e))?;
            symlink(&target, dest).map_err(|e| Error::write(dest, e))?;
        }
        EntryKind::Directory => {
            let meta = fs::symlink_metadata(src).map_err(|e| Error::read(src, e))?;
            fs::create_dir(dest).map_err(|e| Error::write(dest, e))?;
            let entries = fs::read_dir(src).map_err(|e| Error::read(src, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::read(src, e))?;
                copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
            }
            let _ = fs::set_permissions(dest, meta.permissions());
        }
    }
    Ok(())
}

/// Recursive delete. Directories get user write+execute restored first so
/// read-only subtrees can still be purged; entries that are already gone
/// are treated as deleted.
pub fn remove_recursive(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::read(path, e)),
    };

    if meta.is_dir() {
        let mode = meta.permissions().mode();
        if mode & 0o300 != 0o300 {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o300));
        }
        let entries = fs::read_dir(path).map_err(|e| Error::read(path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::read(path, e))?;
            remove_recursive(&entry.path())?;
        }
        match fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::write(path, e)),
        }
    } else {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::write(path, e)),
        }
    }
}
