//! Discovery and lazy creation of trash directories, one per relevant
//! filesystem. Id 0 is always the home trash; other ids are assigned in
//! discovery order while iterating mount points in a stable order.
//!
//! The registry is an explicit constructed-once object passed into every
//! operation (never a process-wide singleton), so tests can point it at
//! temporary roots.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use nix::unistd::geteuid;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::probe;

pub struct TrashRegistry {
    home_root: PathBuf,
    home_device: u64,
    /// Fixed mount list for tests; `None` re-reads the system mount table
    /// on every scan so newly plugged devices are noticed.
    fixed_mounts: Option<Vec<PathBuf>>,
    trash_dirs: BTreeMap<u32, PathBuf>,
    top_dirs: BTreeMap<u32, PathBuf>,
    next_id: u32,
    scanned: bool,
}

impl TrashRegistry {
    /// Registry rooted at `$XDG_DATA_HOME/Trash` (or
    /// `~/.local/share/Trash`), scanning the system mount table.
    pub fn from_environment() -> Result<Self> {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| Error::does_not_exist("$HOME"))?;
        let data_home = env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local/share"));
        let home_device = probe::device_of_nearest(&home)?;
        Ok(TrashRegistry {
            home_root: data_home.join("Trash"),
            home_device,
            fixed_mounts: None,
            trash_dirs: BTreeMap::new(),
            top_dirs: BTreeMap::new(),
            next_id: 1,
            scanned: false,
        })
    }

    /// Registry with an explicit home trash root and mount list. This is
    /// the constructor tests use to stay inside a tempdir.
    pub fn with_roots(home_root: impl Into<PathBuf>, mounts: Vec<PathBuf>) -> Result<Self> {
        let home_root = home_root.into();
        let home_device = probe::device_of_nearest(&home_root)?;
        Ok(TrashRegistry {
            home_root,
            home_device,
            fixed_mounts: Some(mounts),
            trash_dirs: BTreeMap::new(),
            top_dirs: BTreeMap::new(),
            next_id: 1,
            scanned: false,
        })
    }

    /// Ensure the home trash and its `info/` and `files/` subdirectories
    /// exist, with restrictive permissions. Failure here is fatal to every
    /// operation that depends on the registry.
    pub fn init(&mut self) -> Result<()> {
        if let Some(parent) = self.home_root.parent() {
            if fs::symlink_metadata(parent).is_err() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .map_err(|e| mkdir_error(parent, e))?;
            }
        }
        ensure_dir(&self.home_root)?;
        ensure_dir(&self.home_root.join("info"))?;
        ensure_dir(&self.home_root.join("files"))?;
        self.trash_dirs.insert(0, self.home_root.clone());
        debug!("home trash initialized at {}", self.home_root.display());
        Ok(())
    }

    /// Scan mount points for existing trash directories and register any
    /// that are not yet known. Never creates directories.
    pub fn scan(&mut self) {
        let mounts = match &self.fixed_mounts {
            Some(fixed) => fixed.clone(),
            None => probe::list_mount_points().unwrap_or_else(|e| {
                warn!("could not list mount points: {}", e);
                Vec::new()
            }),
        };
        for mount in mounts {
            if let Some(trash_dir) = self.trash_for_mount_point(&mount, false) {
                self.register(trash_dir, &mount);
            }
        }
        self.scanned = true;
    }

    pub fn rescan(&mut self) {
        self.scanned = false;
        self.scan();
    }

    fn ensure_scanned(&mut self) {
        if !self.scanned {
            self.scan();
        }
    }

    /// Same-filesystem-first trash resolution for a file about to be
    /// trashed. Falls back to the home trash (id 0) when the file's
    /// partition cannot hold a trash directory.
    pub fn find_trash_directory(&mut self, orig_path: &Path) -> Result<u32> {
        self.ensure_scanned();

        let device = probe::device_of(orig_path)?;
        if device == self.home_device {
            return Ok(0);
        }

        let mount = probe::mount_point_of(orig_path)?;
        match self.trash_for_mount_point(&mount, true) {
            Some(trash_dir) => {
                let id = self.register(trash_dir, &mount);
                debug!("trashing to trash directory {}", id);
                Ok(id)
            }
            None => {
                debug!(
                    "no trash directory usable on {}, falling back to home trash",
                    mount.display()
                );
                Ok(0)
            }
        }
    }

    fn register(&mut self, trash_dir: PathBuf, mount: &Path) -> u32 {
        if let Some((&id, _)) = self.trash_dirs.iter().find(|(_, dir)| **dir == trash_dir) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        info!("found trash directory {}, id {}", trash_dir.display(), id);
        self.trash_dirs.insert(id, trash_dir);
        self.top_dirs.insert(id, mount.to_path_buf());
        id
    }

    /// Locate (or, with `create_if_needed`, create) the trash directory for
    /// a mount point: the administrator-created `$topdir/.Trash/$uid` is
    /// preferred, then the per-user `$topdir/.Trash-$uid`.
    fn trash_for_mount_point(&self, topdir: &Path, create_if_needed: bool) -> Option<PathBuf> {
        let uid = geteuid().as_raw();

        // (1) $topdir/.Trash, root-owned with the sticky bit and o+wx.
        let admin_root = topdir.join(".Trash");
        if let Ok(meta) = fs::symlink_metadata(&admin_root) {
            let required =
                (nix::libc::S_IWOTH | nix::libc::S_IXOTH | nix::libc::S_ISVTX) as u32;
            if meta.uid() == 0
                && meta.is_dir()
                && !meta.file_type().is_symlink()
                && meta.mode() & required == required
            {
                let trash_dir = admin_root.join(uid.to_string());
                match fs::symlink_metadata(&trash_dir) {
                    Ok(mine) => {
                        if directory_usable(&mine, uid) {
                            return Some(trash_dir);
                        }
                        debug!(
                            "{} exists but fails the security checks, not using it",
                            trash_dir.display()
                        );
                    }
                    Err(_) if create_if_needed => {
                        if self.create_trash_directory(&trash_dir) {
                            return Some(trash_dir);
                        }
                    }
                    Err(_) => {}
                }
            } else {
                debug!(
                    "{} exists but fails the security checks, not using it",
                    admin_root.display()
                );
            }
        }

        // (2) $topdir/.Trash-$uid
        let trash_dir = topdir.join(format!(".Trash-{}", uid));
        match fs::symlink_metadata(&trash_dir) {
            Ok(meta) => {
                if directory_usable(&meta, uid) {
                    return Some(trash_dir);
                }
                debug!(
                    "{} exists but fails the security checks, not using it",
                    trash_dir.display()
                );
                None
            }
            Err(_) if create_if_needed => {
                if self.create_trash_directory(&trash_dir) {
                    Some(trash_dir)
                } else {
                    None
                }
            }
            Err(_) => None,
        }
    }

    /// Create a trash directory with `info/` and `files/`. Filesystems
    /// that cannot hold a user-owned mode-0700 directory (e.g. FAT) get
    /// the directory removed again and the whole partition is rejected.
    fn create_trash_directory(&self, trash_dir: &Path) -> bool {
        let uid = geteuid().as_raw();
        if fs::DirBuilder::new().mode(0o700).create(trash_dir).is_err() {
            return false;
        }
        let meta = match fs::symlink_metadata(trash_dir) {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        if meta.uid() != uid || meta.mode() & 0o777 != 0o700 {
            warn!(
                "{} created without the expected ownership/mode, removing it again",
                trash_dir.display()
            );
            let _ = fs::remove_dir(trash_dir);
            return false;
        }
        let subdirs_ok = fs::DirBuilder::new()
            .mode(0o700)
            .create(trash_dir.join("info"))
            .is_ok()
            && fs::DirBuilder::new()
                .mode(0o700)
                .create(trash_dir.join("files"))
                .is_ok();
        if !subdirs_ok {
            return false;
        }
        info!("created trash directory {}", trash_dir.display());
        true
    }

    pub fn trash_directories(&mut self) -> BTreeMap<u32, PathBuf> {
        self.ensure_scanned();
        self.trash_dirs.clone()
    }

    pub fn top_directories(&mut self) -> BTreeMap<u32, PathBuf> {
        self.ensure_scanned();
        self.top_dirs.clone()
    }

    pub fn trash_root(&self, trash_id: u32) -> Result<&Path> {
        self.trash_dirs
            .get(&trash_id)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::does_not_exist(format!("<trash directory {}>", trash_id)))
    }

    /// Mount point backing a non-home trash directory. Original paths in
    /// its info records are stored relative to this.
    pub fn top_dir(&self, trash_id: u32) -> Option<&Path> {
        self.top_dirs.get(&trash_id).map(PathBuf::as_path)
    }

    pub fn info_path(&self, trash_id: u32, file_id: &str) -> Result<PathBuf> {
        let root = self.trash_root(trash_id)?;
        Ok(root.join("info").join(format!("{}.trashinfo", file_id)))
    }

    pub fn files_path(&self, trash_id: u32, file_id: &str) -> Result<PathBuf> {
        let root = self.trash_root(trash_id)?;
        Ok(root.join("files").join(file_id))
    }
}

fn directory_usable(meta: &fs::Metadata, uid: u32) -> bool {
    meta.uid() == uid
        && meta.is_dir()
        && !meta.file_type().is_symlink()
        && meta.mode() & 0o777 == 0o700
}

/// Test that a directory exists, creating it otherwise. A non-directory
/// squatting on the path is renamed to `<name>.orig` first.
fn ensure_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            let mut orig = path.as_os_str().to_owned();
            orig.push(".orig");
            let orig = PathBuf::from(orig);
            if fs::symlink_metadata(&orig).is_ok() {
                return Err(Error::AlreadyExists { path: orig });
            }
            fs::rename(path, &orig).map_err(|e| mkdir_error(path, e))?;
            warn!(
                "{} was not a directory, moved it to {}",
                path.display(),
                orig.display()
            );
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::read(path, e)),
    }
    fs::DirBuilder::new()
        .mode(0o700)
        .create(path)
        .map_err(|e| mkdir_error(path, e))?;
    debug!("created {}", path.display());
    Ok(())
}

fn mkdir_error(path: &Path, source: std::io::Error) -> Error {
    match source.raw_os_error() {
        Some(code) if code == nix::libc::ENOSPC || code == nix::libc::EDQUOT => Error::DiskFull {
            path: path.to_path_buf(),
        },
        _ => Error::CouldNotCreateDirectory {
            path: path.to_path_buf(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_home_trash_layout() {
        let tmp = tempdir().unwrap();
        let home_root = tmp.path().join("Trash");
        let mut registry = TrashRegistry::with_roots(&home_root, vec![]).unwrap();
        registry.init().unwrap();

        assert!(home_root.join("info").is_dir());
        assert!(home_root.join("files").is_dir());
        assert_eq!(registry.trash_root(0).unwrap(), home_root.as_path());
    }

    #[test]
    fn test_init_renames_blocking_file() {
        let tmp = tempdir().unwrap();
        let home_root = tmp.path().join("Trash");
        fs::write(&home_root, "not a directory").unwrap();

        let mut registry = TrashRegistry::with_roots(&home_root, vec![]).unwrap();
        registry.init().unwrap();

        assert!(home_root.is_dir());
        assert_eq!(
            fs::read_to_string(tmp.path().join("Trash.orig")).unwrap(),
            "not a directory"
        );
    }

    #[test]
    fn test_same_device_resolves_to_home_trash() {
        let tmp = tempdir().unwrap();
        let home_root = tmp.path().join("Trash");
        let mut registry = TrashRegistry::with_roots(&home_root, vec![]).unwrap();
        registry.init().unwrap();

        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, "x").unwrap();
        assert_eq!(registry.find_trash_directory(&victim).unwrap(), 0);
    }

    #[test]
    fn test_unknown_trash_id_is_an_error() {
        let tmp = tempdir().unwrap();
        let mut registry =
            TrashRegistry::with_roots(tmp.path().join("Trash"), vec![]).unwrap();
        registry.init().unwrap();
        assert!(matches!(
            registry.trash_root(7),
            Err(Error::DoesNotExist { .. })
        ));
    }

    #[test]
    fn test_scan_registers_user_trash_on_mount() {
        let tmp = tempdir().unwrap();
        let mount = tmp.path().join("media");
        let uid = geteuid().as_raw();
        let trash_dir = mount.join(format!(".Trash-{}", uid));
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(trash_dir.join("info"))
            .unwrap();
        fs::DirBuilder::new()
            .mode(0o700)
            .create(trash_dir.join("files"))
            .unwrap();
        // The recursive DirBuilder may widen parents; pin the trash dir.
        fs::set_permissions(&trash_dir, fs::Permissions::from_mode(0o700)).unwrap();

        let mut registry =
            TrashRegistry::with_roots(tmp.path().join("Trash"), vec![mount.clone()]).unwrap();
        registry.init().unwrap();
        let dirs = registry.trash_directories();
        assert_eq!(dirs.get(&1), Some(&trash_dir));
        assert_eq!(registry.top_dir(1), Some(mount.as_path()));
    }
}
