//! Retention policy for rotated files.
//!
//! Prunes files produced by a [`NamingPolicy`] either by count (keep the
//! newest N) or by age (remove anything last modified before now minus D).
//! The file the naming policy currently produces, and any path the caller
//! asks to keep, are never removed.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rotor_clock::Clock;
use tracing::debug;

use crate::filesystem::{DirEntry, Filesystem, FsError};
use crate::naming::NamingPolicy;

/// Default number of files kept by count retention.
pub const DEFAULT_KEEP_FILES: usize = 7;

/// Default maximum age in seconds (7 days).
pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 86400;

/// Which rotated files survive a prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep the newest N matching files, the current one included.
    Count(usize),
    /// Remove matching files last modified longer ago than this.
    Age(Duration),
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Count(DEFAULT_KEEP_FILES)
    }
}

impl Retention {
    /// Count retention. Zero is coerced to one.
    pub fn count(max_files: usize) -> Self {
        Retention::Count(max_files.max(1))
    }

    /// Age retention.
    pub fn age(max_age: Duration) -> Self {
        Retention::Age(max_age)
    }
}

/// Result of a prune.
#[derive(Debug, Default)]
pub struct PruneResult {
    /// Number of files removed due to the count limit.
    pub removed_by_count: usize,

    /// Number of files removed due to the age limit.
    pub removed_by_age: usize,

    /// Removals that failed and were skipped.
    pub failed: usize,

    /// Paths of all removed files.
    pub removed_paths: Vec<PathBuf>,
}

impl PruneResult {
    /// Total number of files removed.
    pub fn total_removed(&self) -> usize {
        self.removed_by_count + self.removed_by_age
    }
}

/// Apply `retention` to the directory of `naming`.
///
/// Only files the naming policy matches are considered. Files are ordered by
/// name, which is chronological for zero-padded layouts. Individual removal
/// failures are skipped; a listing failure aborts the prune.
pub fn prune<F, C>(
    fs: &F,
    naming: &NamingPolicy,
    retention: &Retention,
    clock: &C,
    keep: &[PathBuf],
) -> Result<PruneResult, FsError>
where
    F: Filesystem + ?Sized,
    C: Clock + ?Sized,
{
    let now = clock.now();
    let mut protected: Vec<PathBuf> = keep.to_vec();
    protected.push(naming.path(&now));
    protected.sort();
    protected.dedup();

    let mut candidates: Vec<DirEntry> = fs
        .list_dir(naming.dir())?
        .into_iter()
        .filter(|entry| naming.matches(&entry.file_name))
        .filter(|entry| !protected.contains(&entry.path))
        .collect();
    candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let mut result = PruneResult::default();
    match *retention {
        Retention::Count(max_files) => {
            // Protected files count toward the limit even before their first write.
            let kept = protected
                .iter()
                .filter(|path| path.parent() == Some(naming.dir()))
                .filter_map(|path| path.file_name()?.to_str())
                .filter(|name| naming.matches(name))
                .count();
            let excess = (candidates.len() + kept).saturating_sub(max_files.max(1));

            for entry in candidates.iter().take(excess) {
                if remove(fs, &entry.path, &mut result) {
                    result.removed_by_count += 1;
                }
            }
        }
        Retention::Age(max_age) => {
            let Some(cutoff) = SystemTime::from(now).checked_sub(max_age) else {
                return Ok(result);
            };
            for entry in candidates.iter().filter(|e| e.modified < cutoff) {
                if remove(fs, &entry.path, &mut result) {
                    result.removed_by_age += 1;
                }
            }
        }
    }

    Ok(result)
}

fn remove<F: Filesystem + ?Sized>(fs: &F, path: &Path, result: &mut PruneResult) -> bool {
    match fs.remove(path) {
        Ok(()) => {
            result.removed_paths.push(path.to_path_buf());
            true
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "retention: skipping file");
            result.failed += 1;
            false
        }
    }
}
