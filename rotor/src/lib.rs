//! Rolling file writer.
//!
//! [`Rotor`] is an [`std::io::Write`] sink for log pipelines. Bytes go to
//! `<dir>/<name>-<date>.log`; when the date changes the next write lands in a
//! new file, a background trigger closes the old one at the boundary, and
//! old files are pruned by count or by age. When a file cannot be opened the
//! bytes are written to stderr and the error says so.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use rotor::{Options, Rotor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = Options::new()
//!     .with_extension("txt")
//!     .with_max_age(Duration::from_secs(3 * 86400));
//! let rotor = Rotor::open("worker", "/var/log/worker", options)?;
//!
//! rotor.write(b"ready\n")?;
//! rotor.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handle;
mod writer;
mod scheduler;

pub use config::{Options, RotorConfig, DEFAULT_MAKE_DIR};
pub use error::RotorError;
pub use writer::Rotor;

pub use rotor_clock::{Boundary, Clock, MockClock, SystemClock};
pub use rotor_fs::{
    FileHandle, Filesystem, FsError, MockFilesystem, NamingPolicy, RealFilesystem, Retention,
};
