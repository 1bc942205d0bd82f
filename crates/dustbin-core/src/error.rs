use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("access denied: {path}")]
    AccessDenied { path: PathBuf },

    #[error("does not exist: {path}")]
    DoesNotExist { path: PathBuf },

    #[error("already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("disk full while writing {path}")]
    DiskFull { path: PathBuf },

    #[error("could not create directory {path}: {source}")]
    CouldNotCreateDirectory {
        path: PathBuf,
        source: io::Error,
    },

    #[error("could not write {path}: {source}")]
    CouldNotWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("could not read {path}: {source}")]
    CouldNotRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("corrupt trash info record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("malformed trash address: {address}")]
    MalformedAddress { address: String },

    #[error("restore target directory missing for {path}")]
    RestoreTargetMissing { path: PathBuf },

    /// Rename crossed a filesystem boundary; the caller must fall back to
    /// copy-then-delete.
    #[error("cross-device rename for {path}")]
    CrossDevice { path: PathBuf },

    #[error("cannot delete inside a trashed directory: {path}")]
    CannotDeletePartial { path: PathBuf },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn access_denied(path: impl Into<PathBuf>) -> Self {
        Error::AccessDenied { path: path.into() }
    }

    pub fn does_not_exist(path: impl Into<PathBuf>) -> Self {
        Error::DoesNotExist { path: path.into() }
    }

    /// Translate a failed read-side syscall on `path`.
    pub fn read(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Error::does_not_exist(path),
            io::ErrorKind::PermissionDenied => Error::access_denied(path),
            _ => Error::CouldNotRead {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Translate a failed write-side syscall on `path`. Out-of-space
    /// conditions become `DiskFull`.
    pub fn write(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return Error::access_denied(path);
        }
        match source.raw_os_error() {
            Some(code) if code == nix::libc::ENOSPC || code == nix::libc::EDQUOT => {
                Error::DiskFull {
                    path: path.to_path_buf(),
                }
            }
            _ => Error::CouldNotWrite {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}
