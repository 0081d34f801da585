//! Rotor configuration and builder options.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use rotor_clock::{Boundary, Clock, SystemClock};
use rotor_fs::{
    Filesystem, RealFilesystem, Retention, DEFAULT_EXTENSION, DEFAULT_KEEP_FILES,
    DEFAULT_SEPARATOR, DEFAULT_TIME_LAYOUT,
};
use serde::{Deserialize, Serialize};

use crate::error::RotorError;

/// Default for creating missing target directories.
pub const DEFAULT_MAKE_DIR: bool = true;

/// Plain, serializable settings of a rotor.
///
/// `max_age_secs`, when set, selects age retention and `keep_files` is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotorConfig {
    pub separator: String,
    pub extension: String,
    pub time_layout: String,
    pub make_dir: bool,
    pub keep_files: usize,
    pub max_age_secs: Option<u64>,
    pub boundary: Boundary,
}

impl Default for RotorConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            time_layout: DEFAULT_TIME_LAYOUT.to_string(),
            make_dir: DEFAULT_MAKE_DIR,
            keep_files: DEFAULT_KEEP_FILES,
            max_age_secs: None,
            boundary: Boundary::Daily,
        }
    }
}

impl RotorConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, RotorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The retention policy these settings select.
    pub fn retention(&self) -> Retention {
        match self.max_age_secs {
            Some(secs) => Retention::age(Duration::from_secs(secs)),
            None => Retention::count(self.keep_files),
        }
    }
}

/// Options for [`Rotor::open`](crate::Rotor::open).
///
/// Besides the [`RotorConfig`] settings this carries the collaborators a
/// rotor depends on: clock, filesystem and fallback sink.
pub struct Options {
    config: RotorConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) fs: Arc<dyn Filesystem>,
    pub(crate) fallback: Box<dyn Write + Send>,
}

impl Default for Options {
    fn default() -> Self {
        Self::from_config(RotorConfig::default())
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Default options: system clock, real filesystem, stderr fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options built from loaded settings.
    pub fn from_config(config: RotorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            fs: Arc::new(RealFilesystem),
            fallback: Box::new(io::stderr()),
        }
    }

    pub fn config(&self) -> &RotorConfig {
        &self.config
    }

    /// Builder: separator between base name and time. Default `-`.
    ///
    /// Characters illegal in file names (`: \ / < > ? * |`) become `_`.
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.config.separator = separator.to_string();
        self
    }

    /// Builder: file extension. Default `log`.
    ///
    /// A leading dot is dropped; illegal characters become `_` as for the
    /// separator.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.config.extension = extension.to_string();
        self
    }

    /// Builder: strftime layout of the time component. Default `%Y-%m-%d`.
    pub fn with_time_layout(mut self, layout: &str) -> Self {
        self.config.time_layout = layout.to_string();
        self
    }

    /// Builder: create missing directories. Default on.
    pub fn with_make_dir(mut self, make_dir: bool) -> Self {
        self.config.make_dir = make_dir;
        self
    }

    /// Builder: keep at most `keep_files` files (0 is treated as 1).
    pub fn with_keep_files(mut self, keep_files: usize) -> Self {
        self.config.keep_files = keep_files;
        self.config.max_age_secs = None;
        self
    }

    /// Builder: remove files older than `max_age` instead of counting.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.config.max_age_secs = Some(max_age.as_secs());
        self
    }

    /// Builder: rotation boundary. Default daily.
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.config.boundary = boundary;
        self
    }

    /// Builder: time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Builder: filesystem implementation.
    pub fn with_filesystem(mut self, fs: impl Filesystem + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    /// Builder: sink used when the target file cannot be opened. Default stderr.
    pub fn with_fallback(mut self, fallback: impl Write + Send + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }
}
