//! Info records (`info/<fileId>.trashinfo`) and file-id allocation.
//!
//! Allocation relies on `O_CREAT|O_EXCL`: the info file doubles as the
//! claim on a file id, so concurrent trashers racing for the same base
//! name get distinct ids without any locking.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::TrashRegistry;

const DELETION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const INFO_SUFFIX: &str = ".trashinfo";

/// Externally visible view of a trashed entry.
#[derive(Debug, Clone)]
pub struct TrashedItem {
    pub trash_id: u32,
    pub file_id: String,
    /// Empty for a top-level entry, non-empty when addressing a file
    /// nested inside a trashed directory.
    pub relative_path: String,
    pub physical_path: PathBuf,
    pub orig_path: PathBuf,
    pub deletion_date: Option<NaiveDateTime>,
}

/// Pick a collision-free file id for `orig_path` and atomically write its
/// info record. Returns the chosen `(trash_id, file_id)`.
pub fn create_info(registry: &mut TrashRegistry, orig_path: &Path) -> Result<(u32, String)> {
    // Check the source first; EACCES and ENOENT get distinct kinds.
    fs::symlink_metadata(orig_path).map_err(|e| Error::read(orig_path, e))?;

    let trash_id = registry.find_trash_directory(orig_path)?;

    let base_name = orig_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::does_not_exist(orig_path))?;

    // Original paths in non-home trashes are stored relative to the mount
    // point, so the record survives the device being remounted elsewhere.
    let stored_path = if trash_id == 0 {
        orig_path.to_path_buf()
    } else {
        match registry.top_dir(trash_id) {
            Some(top) => relative_to_top_dir(top, orig_path),
            None => orig_path.to_path_buf(),
        }
    };

    let mut body = String::from("[Trash Info]\n");
    body.push_str("Path=");
    body.push_str(&urlencoding::encode(&stored_path.to_string_lossy()));
    body.push_str("\nDeletionDate=");
    body.push_str(&Local::now().format(DELETION_DATE_FORMAT).to_string());
    body.push('\n');

    // Exclusive-create retry loop: on collision, derive the next candidate
    // with a " (n)" suffix. The loop has no bound other than what the
    // filesystem imposes; collisions are rare in practice.
    let mut attempt: u64 = 0;
    loop {
        let candidate = if attempt == 0 {
            base_name.clone()
        } else {
            format!("{} ({})", base_name, attempt)
        };
        let info_path = registry.info_path(trash_id, &candidate)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&info_path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(body.as_bytes()).and_then(|_| file.flush()) {
                    // Half-written info files must not survive.
                    drop(file);
                    if let Err(cleanup) = fs::remove_file(&info_path) {
                        warn!(
                            "could not clean up partial info file {}: {}",
                            info_path.display(),
                            cleanup
                        );
                    }
                    return Err(Error::write(&info_path, e));
                }
                debug!(
                    "info record created in trash {} for file id {:?}",
                    trash_id, candidate
                );
                return Ok((trash_id, candidate));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
            }
            Err(e) => return Err(Error::write(&info_path, e)),
        }
    }
}

/// Remove an info record. A record that is already gone counts as removed.
pub fn delete_info(registry: &TrashRegistry, trash_id: u32, file_id: &str) -> Result<()> {
    let info_path = registry.info_path(trash_id, file_id)?;
    match fs::remove_file(&info_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::write(&info_path, e)),
    }
}

/// Parse the info record for a trashed item.
pub fn info_for_file(
    registry: &TrashRegistry,
    trash_id: u32,
    file_id: &str,
) -> Result<TrashedItem> {
    let info_path = registry.info_path(trash_id, file_id)?;
    let (orig_path, deletion_date) =
        read_info_file(&info_path, trash_id, registry.top_dir(trash_id))?;
    Ok(TrashedItem {
        trash_id,
        file_id: file_id.to_string(),
        relative_path: String::new(),
        physical_path: registry.files_path(trash_id, file_id)?,
        orig_path,
        deletion_date,
    })
}

fn read_info_file(
    info_path: &Path,
    trash_id: u32,
    top_dir: Option<&Path>,
) -> Result<(PathBuf, Option<NaiveDateTime>)> {
    let corrupt = |reason: &str| Error::CorruptRecord {
        path: info_path.to_path_buf(),
        reason: reason.to_string(),
    };

    let contents = fs::read_to_string(info_path).map_err(|e| Error::read(info_path, e))?;

    let mut stored_path: Option<String> = None;
    let mut deletion_date: Option<NaiveDateTime> = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Path" => stored_path = Some(value.trim().to_string()),
            "DeletionDate" => {
                // Lenient: a missing or unparsable date does not make the
                // record unusable.
                deletion_date =
                    NaiveDateTime::parse_from_str(value.trim(), DELETION_DATE_FORMAT).ok();
            }
            _ => {}
        }
    }

    let stored_path = stored_path.filter(|p| !p.is_empty()).ok_or_else(|| {
        corrupt("missing mandatory Path field")
    })?;
    let decoded = urlencoding::decode(&stored_path)
        .map_err(|_| corrupt("invalid percent-encoding in Path field"))?
        .into_owned();

    let orig_path = if trash_id == 0 {
        PathBuf::from(decoded)
    } else {
        match top_dir {
            Some(top) => top.join(decoded),
            None => {
                warn!(
                    "no known mount point for trash {}, using stored path verbatim",
                    trash_id
                );
                PathBuf::from(decoded)
            }
        }
    };

    Ok((orig_path, deletion_date))
}

/// Enumerate every trashed item across all known trash directories. The
/// mount table is rescanned first so freshly plugged devices show up.
pub fn list(registry: &mut TrashRegistry) -> Vec<TrashedItem> {
    registry.rescan();

    let mut items = Vec::new();
    for (trash_id, root) in registry.trash_directories() {
        let info_dir = root.join("info");
        let entries = match fs::read_dir(&info_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not read {}: {}", info_dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(file_id) = name.strip_suffix(INFO_SUFFIX) else {
                warn!("invalid info file in {}: {}", info_dir.display(), name);
                continue;
            };
            match info_for_file(registry, trash_id, file_id) {
                Ok(item) => items.push(item),
                Err(e) => warn!("skipping unreadable record {}: {}", name, e),
            }
        }
    }
    items
}

/// Cheap emptiness check: true when no trash directory holds any record.
pub fn is_empty(registry: &mut TrashRegistry) -> bool {
    for (_, root) in registry.trash_directories() {
        if let Ok(mut entries) = fs::read_dir(root.join("info")) {
            if entries.next().is_some() {
                return false;
            }
        }
    }
    true
}

fn relative_to_top_dir(top_dir: &Path, orig_path: &Path) -> PathBuf {
    let real = fs::canonicalize(orig_path).unwrap_or_else(|_| orig_path.to_path_buf());
    match real.strip_prefix(top_dir) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            warn!(
                "could not make {} relative to {}",
                real.display(),
                top_dir.display()
            );
            real
        }
    }
}
