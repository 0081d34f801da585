//! Naming policy: which file should be active at a given instant.
//!
//! Layout: `<dir>/<name><separator><time>.<extension>`, with `<time>` rendered
//! from a chrono strftime layout in local time.

use std::path::{Component, Path, PathBuf};

use chrono::format::{self, Item, Parsed, StrftimeItems};
use chrono::{DateTime, Local};

use crate::filesystem::FsError;

/// Base name used when the configured one is empty.
pub const DEFAULT_NAME: &str = "rotor";

/// Default separator between base name and time component.
pub const DEFAULT_SEPARATOR: &str = "-";

/// Default file extension (without the dot).
pub const DEFAULT_EXTENSION: &str = "log";

/// Default time layout: calendar date, one file per day.
pub const DEFAULT_TIME_LAYOUT: &str = "%Y-%m-%d";

/// Replace characters that are illegal in file names with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '<' | '>' | '?' | '*' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Resolve `dir` to an absolute, lexically cleaned path.
pub fn resolve_dir(dir: &Path) -> Result<PathBuf, FsError> {
    if dir.as_os_str().is_empty() {
        return Err(FsError::Path("directory must not be empty".to_string()));
    }

    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    Ok(clean(&absolute))
}

/// Drop `.` components and fold `..` into their parent without touching the
/// filesystem. `..` never climbs above the root.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

fn is_malformed(layout: &str) -> bool {
    StrftimeItems::new(layout).any(|item| matches!(item, Item::Error))
}

/// Render `now` with `layout`. A layout chrono cannot parse is used verbatim.
pub fn format_time(now: &DateTime<Local>, layout: &str) -> String {
    if is_malformed(layout) {
        return layout.to_string();
    }
    now.format_with_items(StrftimeItems::new(layout)).to_string()
}

/// Deterministic mapping from an instant to the path of the active file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    name: String,
    dir: PathBuf,
    separator: String,
    layout: String,
    extension: String,
}

impl NamingPolicy {
    /// Create a policy with default separator, extension and layout.
    ///
    /// Fails only when `dir` cannot be resolved to an absolute path.
    pub fn new(name: &str, dir: &Path) -> Result<Self, FsError> {
        let mut name = sanitize_name(name);
        if name.is_empty() {
            name = DEFAULT_NAME.to_string();
        }

        Ok(Self {
            name,
            dir: resolve_dir(dir)?,
            separator: DEFAULT_SEPARATOR.to_string(),
            layout: DEFAULT_TIME_LAYOUT.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        })
    }

    /// Builder: set the separator between name and time. Path-illegal
    /// characters are replaced like in the base name.
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = sanitize_name(separator);
        self
    }

    /// Builder: set the extension. A leading dot is ignored and
    /// path-illegal characters are replaced like in the base name.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = sanitize_name(extension.trim_start_matches('.'));
        self
    }

    /// Builder: set the strftime layout of the time component.
    pub fn with_time_layout(mut self, layout: &str) -> Self {
        self.layout = layout.to_string();
        self
    }

    /// The sanitized base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The extension, without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name (no directory) for `now`.
    pub fn file_name(&self, now: &DateTime<Local>) -> String {
        format!(
            "{}{}{}.{}",
            self.name,
            self.separator,
            format_time(now, &self.layout),
            self.extension
        )
    }

    /// Absolute path of the file that should be active at `now`.
    pub fn path(&self, now: &DateTime<Local>) -> PathBuf {
        self.dir.join(self.file_name(now))
    }

    /// Whether `file_name` was produced by this policy at some instant.
    pub fn matches(&self, file_name: &str) -> bool {
        let Some(rest) = file_name
            .strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix(self.separator.as_str()))
        else {
            return false;
        };
        let Some(time) = rest
            .strip_suffix(self.extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return false;
        };

        if is_malformed(&self.layout) {
            return time == self.layout;
        }
        let mut parsed = Parsed::new();
        format::parse(&mut parsed, time, StrftimeItems::new(&self.layout)).is_ok()
    }
}
