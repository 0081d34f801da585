//! Error types for the rotor writer.

use std::io;

use rotor_fs::FsError;
use thiserror::Error;

/// Errors returned by [`Rotor`](crate::Rotor) operations.
#[derive(Debug, Error)]
pub enum RotorError {
    /// The target directory could not be resolved at construction.
    #[error("invalid configuration: {0}")]
    Config(#[source] FsError),

    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The active file could not be opened; the payload went to the
    /// fallback sink instead.
    #[error("file unavailable, {written} bytes written to fallback sink: {source}")]
    Fallback {
        written: usize,
        #[source]
        source: FsError,
    },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("sync failed: {0}")]
    Sync(#[source] io::Error),

    #[error("close failed: {0}")]
    Close(#[source] io::Error),
}

impl RotorError {
    /// Bytes that were delivered despite the error.
    ///
    /// Non-zero only for [`RotorError::Fallback`].
    pub fn written(&self) -> usize {
        match self {
            RotorError::Fallback { written, .. } => *written,
            _ => 0,
        }
    }

    /// Whether the payload went to the fallback sink.
    pub fn is_fallback(&self) -> bool {
        matches!(self, RotorError::Fallback { .. })
    }
}

impl From<RotorError> for io::Error {
    fn from(err: RotorError) -> Self {
        match err {
            RotorError::Write(e) | RotorError::Sync(e) | RotorError::Close(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
