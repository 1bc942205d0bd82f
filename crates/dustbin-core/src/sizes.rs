//! Persisted disk-usage cache for trashed directories
//! (`<root>/directorysizes`).
//!
//! One line per top-level trashed directory:
//! `"<size> <mtime-ms> <percent-encoded fileId>"`. The recorded mtime is
//! that of the item's *info file*, not of the directory: a trashed
//! directory is immutable, so the only event that invalidates a cached
//! size is its file id being deleted and reused by a different item, which
//! shows up as a changed info-file mtime.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const CACHE_FILE: &str = "directorysizes";

pub struct DirSizeCache {
    trash_root: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    size: u64,
    mtime_ms: u64,
}

impl DirSizeCache {
    pub fn new(trash_root: impl Into<PathBuf>) -> Self {
        DirSizeCache {
            trash_root: trash_root.into(),
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.trash_root.join(CACHE_FILE)
    }

    fn info_mtime_ms(&self, file_id: &str) -> Result<u64> {
        let info_path = self
            .trash_root
            .join("info")
            .join(format!("{}.trashinfo", file_id));
        let meta = fs::metadata(&info_path).map_err(|e| Error::read(&info_path, e))?;
        let modified = meta.modified().map_err(|e| Error::read(&info_path, e))?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64)
    }

    /// Lenient load: a missing cache file is an empty cache, and invalid
    /// lines are dropped rather than failing the whole file.
    fn load(&self) -> BTreeMap<String, CacheEntry> {
        let contents = match fs::read_to_string(self.cache_path()) {
            Ok(contents) => contents,
            Err(_) => return BTreeMap::new(),
        };
        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let parsed = (|| {
                let size = fields.next()?.parse::<u64>().ok()?;
                let mtime_ms = fields.next()?.parse::<u64>().ok()?;
                let file_id = urlencoding::decode(fields.next()?).ok()?.into_owned();
                Some((file_id, CacheEntry { size, mtime_ms }))
            })();
            match parsed {
                Some((file_id, entry)) => {
                    entries.insert(file_id, entry);
                }
                None => warn!("dropping invalid cache line {:?}", line),
            }
        }
        entries
    }

    /// Rewrite the whole cache file through a temp file and an atomic
    /// rename, so a reader never observes a truncated cache.
    fn rewrite(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let cache_path = self.cache_path();
        let mut tmp = NamedTempFile::new_in(&self.trash_root)
            .map_err(|e| Error::write(&cache_path, e))?;
        for (file_id, entry) in entries {
            writeln!(
                tmp,
                "{} {} {}",
                entry.size,
                entry.mtime_ms,
                urlencoding::encode(file_id)
            )
            .map_err(|e| Error::write(&cache_path, e))?;
        }
        tmp.persist(&cache_path)
            .map_err(|e| Error::write(&cache_path, e.error))?;
        Ok(())
    }

    /// Record the size of a trashed directory, stamped with the current
    /// mtime of its info file.
    pub fn add(&self, file_id: &str, size: u64) -> Result<()> {
        let mtime_ms = self.info_mtime_ms(file_id)?;
        let mut entries = self.load();
        entries.insert(file_id.to_string(), CacheEntry { size, mtime_ms });
        self.rewrite(&entries)
    }

    pub fn remove(&self, file_id: &str) -> Result<()> {
        let mut entries = self.load();
        if entries.remove(file_id).is_some() {
            self.rewrite(&entries)?;
        }
        Ok(())
    }

    /// Total disk usage of everything under `files/`. Non-directories are
    /// sized directly; directories use the cache when the recorded
    /// info-file mtime still matches, and are otherwise re-walked and
    /// written back.
    pub fn calculate_size(&self) -> Result<u64> {
        let cache = self.load();
        let files_dir = self.trash_root.join("files");
        let entries = fs::read_dir(&files_dir).map_err(|e| Error::read(&files_dir, e))?;

        let mut total = 0u64;
        for entry in entries {
            let entry = entry.map_err(|e| Error::read(&files_dir, e))?;
            let meta = entry.metadata().map_err(|e| Error::read(&entry.path(), e))?;
            if !meta.is_dir() {
                total += meta.len();
                continue;
            }

            let file_id = entry.file_name().to_string_lossy().into_owned();
            // An orphaned directory without an info record still counts
            // towards usage, it just cannot be cached.
            let current_mtime = self.info_mtime_ms(&file_id).ok();
            let cached = cache
                .get(&file_id)
                .filter(|entry| Some(entry.mtime_ms) == current_mtime);

            match cached {
                Some(entry) => total += entry.size,
                None => {
                    let size = directory_size(&entry.path());
                    debug!("recomputed size of {:?}: {} bytes", file_id, size);
                    total += size;
                    if current_mtime.is_some() {
                        self.add(&file_id, size)?;
                    }
                }
            }
        }
        Ok(total)
    }
}

/// Recursive byte count of a directory tree, symlinks not followed.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
