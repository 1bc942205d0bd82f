//! Trash storage engine: relocates files and directories into
//! per-filesystem trash areas, records restore metadata, accounts for
//! trashed disk usage, and exposes the `<trashId>-<fileId>[/path]`
//! addressing scheme a front-end layer builds on.

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod probe;
pub mod registry;
pub mod sizes;
pub mod store;
pub mod transfer;

pub use config::TrashLimits;
pub use engine::TrashEngine;
pub use error::{Error, Result};
pub use registry::TrashRegistry;
pub use store::TrashedItem;
