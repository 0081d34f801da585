//! Filesystem abstraction for rotor.
//!
//! Everything the writer needs from the operating system goes through the
//! [`Filesystem`] trait so that tests can swap in [`MockFilesystem`], which
//! counts open handles and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use thiserror::Error;

/// Permission bits for directories the writer creates.
pub const DIR_MODE: u32 = 0o755;

/// Permission bits for log files the writer creates.
pub const FILE_MODE: u32 = 0o644;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("path error: {0}")]
    Path(String),

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to list {}: {source}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A directory entry as seen by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: SystemTime,
}

/// An open, append-only file.
pub trait FileHandle: Send {
    /// Write the whole buffer at the end of the file.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Commit written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Trait for filesystem operations.
/// Abstracted for testing with mock implementations.
pub trait Filesystem: Send + Sync {
    /// Open `path` for appending, creating it if absent. Never truncates.
    fn open_append(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError>;

    /// Create directory and parents if needed.
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// List regular files directly inside `dir`.
    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Remove a file.
    fn remove(&self, path: &Path) -> Result<(), FsError>;
}

impl<F: Filesystem + ?Sized> Filesystem for Arc<F> {
    fn open_append(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError> {
        (**self).open_append(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        (**self).create_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, FsError> {
        (**self).list_dir(dir)
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        (**self).remove(path)
    }
}

/// Real filesystem implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

struct RealFile(fs::File);

impl FileHandle for RealFile {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.0.sync_all()
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

impl Filesystem for RealFilesystem {
    fn open_append(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError> {
        let mut options = fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(FILE_MODE);
        }

        let file = options.open(path).map_err(|source| FsError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(RealFile(file)))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIR_MODE);
        }

        builder.create(path).map_err(|source| FsError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, FsError> {
        let list_err = |source: io::Error| FsError::List {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };

            entries.push(DirEntry {
                path: entry.path(),
                file_name,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|source| FsError::Remove {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
struct MockFile {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    files: RwLock<HashMap<PathBuf, MockFile>>,
    dirs: RwLock<HashSet<PathBuf>>,
    open_handles: AtomicUsize,
    peak_open_handles: AtomicUsize,
    opens: AtomicUsize,
    fail_create_dir: AtomicBool,
    fail_open: AtomicBool,
    fail_write: AtomicBool,
    fail_list: AtomicBool,
    fail_remove: AtomicBool,
}

/// Mock filesystem for testing.
/// Cloning creates a new handle to the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MockFilesystem {
    state: Arc<MockState>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get content of a specific file.
    pub fn get_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.read_files().get(path).map(|f| f.data.clone())
    }

    /// Add a file directly (for test setup).
    pub fn add_file(&self, path: PathBuf, data: Vec<u8>) {
        self.add_file_modified(path, data, SystemTime::now());
    }

    /// Add a file with an explicit modification time.
    pub fn add_file_modified(&self, path: PathBuf, data: Vec<u8>, modified: SystemTime) {
        self.write_files().insert(path, MockFile { data, modified });
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    /// Highest number of handles that were ever open at the same time.
    pub fn peak_open_handles(&self) -> usize {
        self.state.peak_open_handles.load(Ordering::SeqCst)
    }

    /// Total successful `open_append` calls.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Make `create_dir_all` fail with permission denied.
    pub fn fail_create_dir(&self, fail: bool) {
        self.state.fail_create_dir.store(fail, Ordering::SeqCst);
    }

    /// Make `open_append` fail with permission denied.
    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make writes on open handles fail as if the disk were full.
    pub fn fail_write(&self, fail: bool) {
        self.state.fail_write.store(fail, Ordering::SeqCst);
    }

    /// Make `list_dir` fail.
    pub fn fail_list(&self, fail: bool) {
        self.state.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Make `remove` fail.
    pub fn fail_remove(&self, fail: bool) {
        self.state.fail_remove.store(fail, Ordering::SeqCst);
    }

    fn read_files(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, MockFile>> {
        self.state.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_files(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, MockFile>> {
        self.state.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn denied(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, format!("{what}: permission denied"))
}

struct MockHandle {
    fs: MockFilesystem,
    path: PathBuf,
}

impl FileHandle for MockHandle {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.fs.state.fail_write.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
        }
        let mut files = self.fs.write_files();
        let file = files.entry(self.path.clone()).or_insert_with(|| MockFile {
            data: Vec::new(),
            modified: SystemTime::now(),
        });
        file.data.extend_from_slice(buf);
        file.modified = SystemTime::now();
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.fs.state.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Filesystem for MockFilesystem {
    fn open_append(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(FsError::Open {
                path: path.to_path_buf(),
                source: denied("open"),
            });
        }
        if let Some(parent) = path.parent() {
            if !self.exists(parent) {
                return Err(FsError::Open {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "parent directory missing"),
                });
            }
        }

        self.write_files()
            .entry(path.to_path_buf())
            .or_insert_with(|| MockFile {
                data: Vec::new(),
                modified: SystemTime::now(),
            });

        let open = self.state.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open_handles.fetch_max(open, Ordering::SeqCst);
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockHandle {
            fs: self.clone(),
            path: path.to_path_buf(),
        }))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        if self.state.fail_create_dir.load(Ordering::SeqCst) {
            return Err(FsError::CreateDir {
                path: path.to_path_buf(),
                source: denied("mkdir"),
            });
        }
        let mut dirs = self.state.dirs.write().unwrap_or_else(PoisonError::into_inner);
        for ancestor in path.ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.read_files().contains_key(path)
            || self
                .state
                .dirs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, FsError> {
        if self.state.fail_list.load(Ordering::SeqCst) {
            return Err(FsError::List {
                path: dir.to_path_buf(),
                source: denied("readdir"),
            });
        }

        let entries = self
            .read_files()
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, file)| {
                let file_name = path.file_name()?.to_str()?.to_string();
                Some(DirEntry {
                    path: path.clone(),
                    file_name,
                    modified: file.modified,
                })
            })
            .collect();
        Ok(entries)
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        if self.state.fail_remove.load(Ordering::SeqCst) {
            return Err(FsError::Remove {
                path: path.to_path_buf(),
                source: denied("unlink"),
            });
        }
        self.write_files().remove(path);
        Ok(())
    }
}
