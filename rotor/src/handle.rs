//! Ownership of the single active file handle.
//!
//! Not synchronized on its own; [`Rotor`](crate::Rotor) keeps it behind its
//! mutex.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use rotor_fs::{FileHandle, Filesystem, FsError, NamingPolicy};
use tracing::{debug, warn};

use crate::error::RotorError;

struct ActiveFile {
    path: PathBuf,
    handle: Box<dyn FileHandle>,
}

/// Opens, switches, syncs and closes the active file.
pub(crate) struct HandleManager {
    naming: NamingPolicy,
    make_dir: bool,
    fs: Arc<dyn Filesystem>,
    fallback: Box<dyn Write + Send>,
    active: Option<ActiveFile>,
    degraded: bool,
}

impl HandleManager {
    pub(crate) fn new(
        naming: NamingPolicy,
        make_dir: bool,
        fs: Arc<dyn Filesystem>,
        fallback: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            naming,
            make_dir,
            fs,
            fallback,
            active: None,
            degraded: false,
        }
    }

    pub(crate) fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Make sure the handle for `now` is open.
    ///
    /// Returns `true` when an open handle for an older path was replaced,
    /// i.e. the write path crossed a boundary. The old handle is closed before
    /// the new one is opened so at most one handle exists at a time.
    pub(crate) fn ensure_open(&mut self, now: &DateTime<Local>) -> Result<bool, FsError> {
        let path = self.naming.path(now);
        if self.active_path() == Some(path.as_path()) {
            return Ok(false);
        }

        let switched = self.release();

        if self.make_dir {
            if let Some(parent) = path.parent() {
                if !self.fs.exists(parent) {
                    self.fs.create_dir_all(parent)?;
                }
            }
        }
        let handle = self.fs.open_append(&path)?;
        debug!(path = %path.display(), "rotor: opened file");

        self.active = Some(ActiveFile { path, handle });
        Ok(switched)
    }

    /// Append `buf` to the open handle.
    ///
    /// A failed write drops the handle, so the next write reopens, and
    /// delivers `buf` to the fallback sink.
    pub(crate) fn write_active(&mut self, buf: &[u8]) -> Result<usize, RotorError> {
        let Some(active) = self.active.as_mut() else {
            return self.write_fallback(buf, FsError::Path("no active file".to_string()));
        };
        if let Err(err) = active.handle.write_all(buf) {
            debug!(path = %active.path.display(), error = %err, "rotor: write failed");
            self.release();
            return self.write_fallback(buf, FsError::Io(err));
        }
        if self.degraded {
            debug!(path = %active.path.display(), "rotor: file available again");
            self.degraded = false;
        }
        Ok(buf.len())
    }

    /// Deliver `buf` to the fallback sink and report why.
    pub(crate) fn write_fallback(&mut self, buf: &[u8], source: FsError) -> Result<usize, RotorError> {
        if !self.degraded {
            warn!(error = %source, "rotor: writing to fallback sink");
            self.degraded = true;
        }
        self.fallback.write_all(buf).map_err(RotorError::Write)?;
        let _ = self.fallback.flush();
        Err(RotorError::Fallback {
            written: buf.len(),
            source,
        })
    }

    pub(crate) fn sync(&mut self) -> Result<(), RotorError> {
        match self.active.as_mut() {
            Some(active) => active.handle.sync().map_err(RotorError::Sync),
            None => Ok(()),
        }
    }

    /// Close the handle; the next write reopens. No-op when nothing is open.
    pub(crate) fn close(&mut self) -> Result<(), RotorError> {
        match self.active.take() {
            Some(active) => active.handle.close().map_err(RotorError::Close),
            None => Ok(()),
        }
    }

    /// Sync and close the handle for rotation. Errors are logged, not returned.
    ///
    /// Returns whether a handle was open.
    pub(crate) fn release(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        if let Err(err) = active.handle.sync() {
            debug!(path = %active.path.display(), error = %err, "rotor: sync before close failed");
        }
        if let Err(err) = active.handle.close() {
            debug!(path = %active.path.display(), error = %err, "rotor: close failed");
        }
        true
    }
}
