//! Filesystem layer for rotor.
//!
//! This crate provides:
//! - Filesystem trait for append-only handles, listing and removal
//! - NamingPolicy mapping an instant to the path of the active file
//! - Retention by max files and max age

pub mod filesystem;
pub mod naming;
pub mod retention;

pub use filesystem::{
    DirEntry, FileHandle, Filesystem, FsError, MockFilesystem, RealFilesystem, DIR_MODE, FILE_MODE,
};
pub use naming::{
    format_time, resolve_dir, sanitize_name, NamingPolicy, DEFAULT_EXTENSION, DEFAULT_NAME,
    DEFAULT_SEPARATOR, DEFAULT_TIME_LAYOUT,
};
pub use retention::{prune, PruneResult, Retention, DEFAULT_KEEP_FILES, DEFAULT_MAX_AGE_SECS};
