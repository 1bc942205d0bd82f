//! The façade the protocol/front-end layer drives. Every operation is a
//! blocking, synchronous call; nothing is cached between calls because a
//! second process may mutate the trash concurrently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{self, TrashLimits};
use crate::error::{Error, Result};
use crate::probe::{self, PartitionUsage};
use crate::registry::TrashRegistry;
use crate::sizes::{self, DirSizeCache};
use crate::store::{self, TrashedItem};
use crate::transfer::{self, EntryKind};

pub struct TrashEngine {
    registry: TrashRegistry,
    limits: TrashLimits,
}

impl TrashEngine {
    pub fn new(registry: TrashRegistry, limits: TrashLimits) -> Self {
        TrashEngine { registry, limits }
    }

    pub fn from_environment() -> Result<Self> {
        let registry = TrashRegistry::from_environment()?;
        let limits = config::load_configuration()?;
        Ok(TrashEngine { registry, limits })
    }

    /// Ensure the home trash exists and discover per-partition trash
    /// directories. Must succeed before any other operation.
    pub fn init(&mut self) -> Result<()> {
        self.registry.init()?;
        self.registry.scan();
        Ok(())
    }

    /// Eviction thresholds for an external policy enforcer. The engine
    /// itself never purges on its own.
    pub fn limits(&self) -> &TrashLimits {
        &self.limits
    }

    /// Trash an item end to end: allocate an id, write the info record,
    /// then move the content. A failed content transfer rolls the info
    /// record back so no half-trashed item survives.
    pub fn trash(&mut self, src: &Path) -> Result<TrashedItem> {
        let (trash_id, file_id) = store::create_info(&mut self.registry, src)?;
        if let Err(e) = self.transfer_in(src, trash_id, &file_id) {
            if let Err(cleanup) = store::delete_info(&self.registry, trash_id, &file_id) {
                warn!("could not roll back info record {:?}: {}", file_id, cleanup);
            }
            return Err(e);
        }
        debug!("trashed {} as {}-{}", src.display(), trash_id, file_id);
        store::info_for_file(&self.registry, trash_id, &file_id)
    }

    pub fn create_info(&mut self, orig_path: &Path) -> Result<(u32, String)> {
        store::create_info(&mut self.registry, orig_path)
    }

    pub fn delete_info(&mut self, trash_id: u32, file_id: &str) -> Result<()> {
        store::delete_info(&self.registry, trash_id, file_id)
    }

    pub fn move_to_trash(&mut self, src: &Path, trash_id: u32, file_id: &str) -> Result<()> {
        self.transfer_in(src, trash_id, file_id)
    }

    fn transfer_in(&mut self, src: &Path, trash_id: u32, file_id: &str) -> Result<()> {
        let kind = EntryKind::probe(src)?;
        transfer::move_to_trash(&self.registry, src, trash_id, file_id)?;
        if kind == EntryKind::Directory {
            self.record_directory_size(trash_id, file_id);
        }
        Ok(())
    }

    /// Move an item out of the trash. Restoring the whole item (empty
    /// relative path) destroys its record; extracting a nested file from a
    /// trashed directory leaves the record alone.
    pub fn move_from_trash(
        &mut self,
        dest: &Path,
        trash_id: u32,
        file_id: &str,
        relative_path: &str,
    ) -> Result<()> {
        transfer::move_from_trash(&self.registry, dest, trash_id, file_id, relative_path)?;
        if relative_path.is_empty() {
            store::delete_info(&self.registry, trash_id, file_id)?;
            self.forget_directory_size(trash_id, file_id);
        }
        Ok(())
    }

    /// Restore an item to the original path recorded at trash time.
    pub fn restore(&mut self, trash_id: u32, file_id: &str) -> Result<PathBuf> {
        let item = store::info_for_file(&self.registry, trash_id, file_id)?;
        let dest = item.orig_path.clone();
        self.move_from_trash(&dest, trash_id, file_id, "")?;
        Ok(dest)
    }

    pub fn copy_to_trash(&mut self, src: &Path, trash_id: u32, file_id: &str) -> Result<()> {
        transfer::copy_to_trash(&self.registry, src, trash_id, file_id)
    }

    pub fn copy_from_trash(
        &mut self,
        dest: &Path,
        trash_id: u32,
        file_id: &str,
        relative_path: &str,
    ) -> Result<()> {
        transfer::copy_from_trash(&self.registry, dest, trash_id, file_id, relative_path)
    }

    /// Permanently delete a trashed item. Only whole items can be deleted:
    /// a non-empty relative path (a member of an already-trashed
    /// directory) is rejected without touching anything.
    pub fn del(&mut self, trash_id: u32, file_id: &str, relative_path: &str) -> Result<()> {
        if !relative_path.is_empty() {
            let path =
                transfer::physical_path(&self.registry, trash_id, file_id, relative_path)?;
            return Err(Error::CannotDeletePartial { path });
        }
        transfer::del(&self.registry, trash_id, file_id)?;
        self.forget_directory_size(trash_id, file_id);
        Ok(())
    }

    pub fn list(&mut self) -> Vec<TrashedItem> {
        store::list(&mut self.registry)
    }

    /// Clear every known trash directory. Each item is deleted
    /// individually so the record invariant holds for whatever a partial
    /// failure leaves behind.
    pub fn empty_trash(&mut self) -> Result<()> {
        let mut failure = None;
        for item in store::list(&mut self.registry) {
            if let Err(e) = transfer::remove_recursive(&item.physical_path) {
                warn!("could not delete {}: {}", item.physical_path.display(), e);
                failure = Some(e);
                continue;
            }
            if let Err(e) = store::delete_info(&self.registry, item.trash_id, &item.file_id) {
                failure = Some(e);
                continue;
            }
            self.forget_directory_size(item.trash_id, &item.file_id);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn info_for_file(&self, trash_id: u32, file_id: &str) -> Result<TrashedItem> {
        store::info_for_file(&self.registry, trash_id, file_id)
    }

    /// Resolve an address to a real filesystem path, checking it exists.
    pub fn physical_path(
        &self,
        trash_id: u32,
        file_id: &str,
        relative_path: &str,
    ) -> Result<PathBuf> {
        let path = transfer::physical_path(&self.registry, trash_id, file_id, relative_path)?;
        std::fs::symlink_metadata(&path).map_err(|e| Error::read(&path, e))?;
        Ok(path)
    }

    pub fn is_empty(&mut self) -> bool {
        store::is_empty(&mut self.registry)
    }

    pub fn trash_directories(&mut self) -> BTreeMap<u32, PathBuf> {
        self.registry.trash_directories()
    }

    pub fn top_directories(&mut self) -> BTreeMap<u32, PathBuf> {
        self.registry.top_directories()
    }

    /// Total disk usage of one trash directory, served from the
    /// `directorysizes` cache where still valid.
    pub fn trash_size(&self, trash_id: u32) -> Result<u64> {
        let root = self.registry.trash_root(trash_id)?;
        DirSizeCache::new(root).calculate_size()
    }

    pub fn partition_usage(&self, trash_id: u32) -> Result<PartitionUsage> {
        let root = self.registry.trash_root(trash_id)?;
        probe::partition_usage(root)
    }

    fn record_directory_size(&self, trash_id: u32, file_id: &str) {
        let (root, files_path) = match (
            self.registry.trash_root(trash_id),
            self.registry.files_path(trash_id, file_id),
        ) {
            (Ok(root), Ok(files_path)) => (root, files_path),
            _ => return,
        };
        let size = sizes::directory_size(&files_path);
        // The cache is advisory; a failed update only costs a re-walk.
        if let Err(e) = DirSizeCache::new(root).add(file_id, size) {
            warn!("could not update size cache for {:?}: {}", file_id, e);
        }
    }

    fn forget_directory_size(&self, trash_id: u32, file_id: &str) {
        if let Ok(root) = self.registry.trash_root(trash_id) {
            if let Err(e) = DirSizeCache::new(root).remove(file_id) {
                warn!("could not drop size cache entry for {:?}: {}", file_id, e);
            }
        }
    }
}
