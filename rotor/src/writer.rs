//! The rolling writer.
//!
//! All operations serialize through one mutex around the rotor state: the
//! active handle and the pending rotation trigger change together inside the
//! same critical section. Retention runs on its own thread after every
//! rotation and never touches the handle.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use rotor_clock::{Boundary, Clock};
use rotor_fs::{prune, Filesystem, NamingPolicy, Retention};
use tracing::{debug, warn};

use crate::config::Options;
use crate::error::RotorError;
use crate::handle::HandleManager;
use crate::scheduler::RotationScheduler;

struct RotorState {
    handle: HandleManager,
    scheduler: RotationScheduler,
    stopped: bool,
}

struct Shared {
    state: Mutex<RotorState>,
    naming: NamingPolicy,
    retention: Retention,
    boundary: Boundary,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn Filesystem>,
    pruning: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RotorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm the next rotation at the boundary after the current time.
    fn arm(self: &Arc<Self>, state: &mut RotorState) {
        let delay = self.boundary.duration_until_next(self.clock.now());
        let weak = Arc::downgrade(self);
        state.scheduler.arm(delay, move |generation| fire(weak, generation));
        debug!(delay_ms = delay.as_millis() as u64, "rotor: rotation armed");
    }

    /// Close the active handle and start retention. The next write reopens
    /// at whatever path the naming policy produces then.
    fn rotate_locked(self: &Arc<Self>, state: &mut RotorState) {
        let previous = state.handle.active_path().map(Path::to_path_buf);
        state.handle.release();
        debug!(previous = ?previous, "rotor: rotated");
        self.spawn_prune(Vec::new());
    }

    fn spawn_prune(self: &Arc<Self>, keep: Vec<PathBuf>) {
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("rotor-retention".to_string())
            .spawn(move || {
                match prune(
                    shared.fs.as_ref(),
                    &shared.naming,
                    &shared.retention,
                    shared.clock.as_ref(),
                    &keep,
                ) {
                    Ok(result) if result.total_removed() > 0 || result.failed > 0 => debug!(
                        removed = result.total_removed(),
                        failed = result.failed,
                        "rotor: retention pruned files"
                    ),
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "rotor: retention skipped"),
                }
            });

        match spawned {
            Ok(handle) => {
                let mut pruning = self.pruning.lock().unwrap_or_else(PoisonError::into_inner);
                pruning.retain(|h| !h.is_finished());
                pruning.push(handle);
            }
            Err(err) => warn!(error = %err, "rotor: failed to start retention"),
        }
    }
}

/// Entry point of a trigger thread.
fn fire(shared: Weak<Shared>, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut state = shared.lock();
    if !state.scheduler.take_fired(generation) {
        return;
    }
    shared.rotate_locked(&mut state);
    shared.arm(&mut state);
}

/// A byte sink that writes to successive dated files.
///
/// `Rotor` is `Send + Sync`; share it behind an `Arc` and write through
/// `&Rotor`, which implements [`io::Write`].
///
/// ```no_run
/// use std::io::Write;
/// use rotor::{Options, Rotor};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rotor = Rotor::open("app", "/var/log/app", Options::new().with_keep_files(14))?;
/// writeln!(&rotor, "service started")?;
/// rotor.sync()?;
/// rotor.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Rotor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Rotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotor")
            .field("naming", &self.shared.naming)
            .field("retention", &self.shared.retention)
            .field("boundary", &self.shared.boundary)
            .finish_non_exhaustive()
    }
}

impl Rotor {
    /// Create a rotor writing `<dir>/<name><separator><time>.<extension>`.
    ///
    /// Only resolves paths and arms the first rotation; the directory and
    /// file are created by the first write. Fails when `dir` cannot be
    /// resolved to an absolute path.
    pub fn open(name: &str, dir: impl AsRef<Path>, options: Options) -> Result<Self, RotorError> {
        let config = options.config().clone();
        let naming = NamingPolicy::new(name, dir.as_ref())
            .map_err(RotorError::Config)?
            .with_separator(&config.separator)
            .with_extension(&config.extension)
            .with_time_layout(&config.time_layout);

        let handle = HandleManager::new(
            naming.clone(),
            config.make_dir,
            Arc::clone(&options.fs),
            options.fallback,
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(RotorState {
                handle,
                scheduler: RotationScheduler::default(),
                stopped: false,
            }),
            naming,
            retention: config.retention(),
            boundary: config.boundary,
            clock: options.clock,
            fs: options.fs,
            pruning: Mutex::new(Vec::new()),
        });

        {
            let mut state = shared.lock();
            shared.arm(&mut state);
        }

        Ok(Self { shared })
    }

    /// Append `buf` to the file for the current time.
    ///
    /// Crossing a boundary switches files before any byte is written, so a
    /// single write never spans two files. When the file cannot be opened
    /// the bytes go to the fallback sink and [`RotorError::Fallback`] carries
    /// the byte count.
    pub fn write(&self, buf: &[u8]) -> Result<usize, RotorError> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if !state.stopped && !state.scheduler.is_armed() {
            shared.arm(&mut state);
        }

        let now = shared.clock.now();
        match state.handle.ensure_open(&now) {
            Ok(switched) => {
                if switched {
                    let keep = state.handle.active_path().map(Path::to_path_buf);
                    shared.spawn_prune(keep.into_iter().collect());
                }
                state.handle.write_active(buf)
            }
            Err(source) => state.handle.write_fallback(buf, source),
        }
    }

    /// Commit the active file to stable storage. No-op when nothing is open.
    pub fn sync(&self) -> Result<(), RotorError> {
        self.shared.lock().handle.sync()
    }

    /// Disarm rotation and close the active file.
    ///
    /// Idempotent. The rotor stays usable: a later write reopens the file in
    /// append mode and re-arms rotation (unless [`stop`](Self::stop) was
    /// called).
    pub fn close(&self) -> Result<(), RotorError> {
        let mut state = self.shared.lock();
        state.scheduler.disarm();
        state.handle.close()
    }

    /// Cancel scheduled rotation for good. Returns whether a trigger was armed.
    ///
    /// Writes keep working and still switch files when the naming policy
    /// produces a new path; only the timer is gone.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.lock();
        state.stopped = true;
        state.scheduler.disarm()
    }

    /// Rotate now, exactly as a scheduled boundary would: close the active
    /// file and run retention in the background.
    pub fn rotate(&self) {
        let mut state = self.shared.lock();
        self.shared.rotate_locked(&mut state);
    }

    /// Block until background retention started so far has finished.
    pub fn wait_retention(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pruning = self.shared.pruning.lock().unwrap_or_else(PoisonError::into_inner);
            pruning.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Path of the open file, if any.
    pub fn active_path(&self) -> Option<PathBuf> {
        self.shared.lock().handle.active_path().map(Path::to_path_buf)
    }

    /// Path the next write would go to.
    pub fn current_path(&self) -> PathBuf {
        self.shared.naming.path(&self.shared.clock.now())
    }

    /// Whether the last write went to the fallback sink.
    pub fn is_degraded(&self) -> bool {
        self.shared.lock().handle.is_degraded()
    }

    /// Whether a rotation trigger is pending.
    pub fn is_armed(&self) -> bool {
        self.shared.lock().scheduler.is_armed()
    }

    /// The naming policy deciding file paths.
    pub fn naming(&self) -> &NamingPolicy {
        &self.shared.naming
    }
}

impl Drop for Rotor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "rotor: close on drop failed");
        }
    }
}

impl Write for &Rotor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Rotor::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Rotor::sync(self).map_err(io::Error::from)
    }
}

impl Write for Rotor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Rotor::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Rotor::sync(self).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_clock::MockClock;
    use rotor_fs::MockFilesystem;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        fs: MockFilesystem,
        clock: MockClock,
        fallback: SharedBuf,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                fs: MockFilesystem::new(),
                clock: MockClock::at(2024, 1, 10, 12, 0, 0).unwrap(),
                fallback: SharedBuf::default(),
            }
        }

        fn options(&self) -> Options {
            Options::new()
                .with_filesystem(self.fs.clone())
                .with_clock(self.clock.clone())
                .with_fallback(self.fallback.clone())
        }

        fn open(&self, options: Options) -> Rotor {
            Rotor::open("app", "/logs", options).expect("open")
        }

        fn file(&self, name: &str) -> Option<Vec<u8>> {
            self.fs.get_file(&Path::new("/logs").join(name))
        }

        fn next_day(&self) {
            self.clock.advance(Duration::from_secs(86400));
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    // --- Construction ---

    #[test]
    fn test_open_is_lazy_and_armed() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());

        assert!(rotor.active_path().is_none());
        assert!(!fx.fs.exists(Path::new("/logs")));
        assert!(rotor.is_armed());
        assert_eq!(rotor.current_path(), PathBuf::from("/logs/app-2024-01-10.log"));
    }

    #[test]
    fn test_open_rejects_empty_dir() {
        let fx = Fixture::new();
        let result = Rotor::open("app", "", fx.options());
        assert!(matches!(result, Err(RotorError::Config(_))));
    }

    #[test]
    fn test_open_applies_naming_options() {
        let fx = Fixture::new();
        let rotor = fx.open(
            fx.options()
                .with_separator(".")
                .with_extension("txt")
                .with_time_layout("%Y%m%d"),
        );
        assert_eq!(rotor.current_path(), PathBuf::from("/logs/app.20240110.txt"));
    }

    // --- Writes ---

    #[test]
    fn test_write_creates_dir_and_appends() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());

        assert_eq!(rotor.write(b"one\n").expect("write"), 4);
        assert_eq!(rotor.write(b"two\n").expect("write"), 4);

        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"one\ntwo\n".to_vec()));
        assert_eq!(rotor.active_path(), Some(PathBuf::from("/logs/app-2024-01-10.log")));
        assert!(fx.fallback.contents().is_empty());
    }

    #[test]
    fn test_write_through_io_write() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());

        writeln!(&rotor, "hello {}", 42).expect("writeln");
        (&rotor).flush().expect("flush");

        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"hello 42\n".to_vec()));
    }

    #[test]
    fn test_boundary_switches_file_between_writes() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());

        rotor.write(b"before-1 ").expect("write");
        rotor.write(b"before-2").expect("write");
        fx.next_day();
        rotor.write(b"after-1 ").expect("write");
        rotor.write(b"after-2").expect("write");

        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"before-1 before-2".to_vec()));
        assert_eq!(fx.file("app-2024-01-11.log"), Some(b"after-1 after-2".to_vec()));
        assert_eq!(fx.fs.open_handles(), 1);
        assert_eq!(fx.fs.peak_open_handles(), 1);
    }

    #[test]
    fn test_concurrent_writers_share_one_handle() {
        let fx = Fixture::new();
        let rotor = Arc::new(fx.open(fx.options()));

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let rotor = Arc::clone(&rotor);
                thread::spawn(move || {
                    for i in 0..200 {
                        let line = format!("writer-{t}-line-{i}\n");
                        rotor.write(line.as_bytes()).expect("write");
                    }
                })
            })
            .collect();

        // Cross a boundary while writers are running.
        thread::sleep(Duration::from_millis(2));
        fx.next_day();

        for writer in writers {
            writer.join().expect("writer thread");
        }

        assert!(fx.fs.peak_open_handles() <= 1);

        let mut lines = Vec::new();
        for name in ["app-2024-01-10.log", "app-2024-01-11.log"] {
            if let Some(data) = fx.file(name) {
                let text = String::from_utf8(data).expect("utf8");
                lines.extend(text.lines().map(str::to_string));
            }
        }
        assert_eq!(lines.len(), 8 * 200);
        assert!(lines.iter().all(|l| l.starts_with("writer-") && l.contains("-line-")));
    }

    // --- Fallback ---

    #[test]
    fn test_fallback_when_dir_cannot_be_created() {
        let fx = Fixture::new();
        fx.fs.fail_create_dir(true);
        let rotor = fx.open(fx.options());

        let err = rotor.write(b"payload").unwrap_err();
        assert!(err.is_fallback());
        assert_eq!(err.written(), 7);
        assert!(err.to_string().contains("failed to create directory /logs"));
        assert_eq!(fx.fallback.contents(), b"payload");
        assert!(rotor.is_degraded());
        assert!(rotor.active_path().is_none());
    }

    #[test]
    fn test_fallback_when_open_fails_then_recovers() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"a").expect("write");

        fx.fs.fail_open(true);
        fx.next_day();
        let err = rotor.write(b"b").unwrap_err();
        assert_eq!(err.written(), 1);
        assert_eq!(fx.fallback.contents(), b"b");
        assert_eq!(fx.fs.open_handles(), 0);

        fx.fs.fail_open(false);
        rotor.write(b"c").expect("write");
        assert!(!rotor.is_degraded());
        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"a".to_vec()));
        assert_eq!(fx.file("app-2024-01-11.log"), Some(b"c".to_vec()));
    }

    #[test]
    fn test_failed_write_on_open_file_goes_to_fallback() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"stored ").expect("write");

        fx.fs.fail_write(true);
        let err = rotor.write(b"payload").unwrap_err();
        assert!(err.is_fallback());
        assert_eq!(err.written(), 7);
        assert!(err.to_string().contains("no space left on device"));
        assert_eq!(fx.fallback.contents(), b"payload");
        assert!(rotor.is_degraded());
        assert!(rotor.active_path().is_none());

        fx.fs.fail_write(false);
        rotor.write(b"again").expect("write after recovery");
        assert!(!rotor.is_degraded());
        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"stored again".to_vec()));
        assert_eq!(fx.fs.opens(), 2);
    }

    #[test]
    fn test_fallback_through_io_write_is_error() {
        let fx = Fixture::new();
        fx.fs.fail_open(true);
        let rotor = fx.open(fx.options());

        let mut sink = &rotor;
        let err = Write::write(&mut sink, b"xyz").unwrap_err();
        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<RotorError>())
            .expect("RotorError");
        assert_eq!(inner.written(), 3);
        assert_eq!(fx.fallback.contents(), b"xyz");
    }

    #[test]
    fn test_make_dir_disabled_falls_back() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options().with_make_dir(false));

        let err = rotor.write(b"x").unwrap_err();
        assert!(err.is_fallback());
        assert!(!fx.fs.exists(Path::new("/logs")));
    }

    // --- Sync / close / stop ---

    #[test]
    fn test_sync_without_open_file_is_noop() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.sync().expect("sync");
        rotor.write(b"x").expect("write");
        rotor.sync().expect("sync");
    }

    #[test]
    fn test_close_is_idempotent() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"x").expect("write");

        rotor.close().expect("close");
        rotor.close().expect("close again");
        assert_eq!(fx.fs.open_handles(), 0);
        assert!(!rotor.is_armed());
    }

    #[test]
    fn test_write_after_close_reopens_in_append_mode() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"first ").expect("write");
        rotor.close().expect("close");

        rotor.write(b"second").expect("write after close");

        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"first second".to_vec()));
        assert_eq!(fx.fs.opens(), 2);
        assert!(rotor.is_armed());
    }

    #[test]
    fn test_stop_reports_armed_state() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());

        assert!(rotor.stop());
        assert!(!rotor.stop());
        assert!(!rotor.is_armed());

        // Writes still work and do not re-arm.
        rotor.write(b"x").expect("write");
        assert!(!rotor.is_armed());
    }

    #[test]
    fn test_drop_closes_handle() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"x").expect("write");
        assert_eq!(fx.fs.open_handles(), 1);

        drop(rotor);
        assert_eq!(fx.fs.open_handles(), 0);
    }

    // --- Rotation and retention ---

    #[test]
    fn test_manual_rotate_closes_and_reopens() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options());
        rotor.write(b"a").expect("write");

        rotor.rotate();
        rotor.wait_retention();
        assert!(rotor.active_path().is_none());
        assert_eq!(fx.fs.open_handles(), 0);

        rotor.write(b"b").expect("write");
        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"ab".to_vec()));
    }

    #[test]
    fn test_rotation_prunes_by_count() {
        let fx = Fixture::new();
        for day in 1..=5 {
            fx.fs.add_file(PathBuf::from(format!("/logs/app-2024-01-0{day}.log")), vec![]);
        }
        fx.fs.create_dir_all(Path::new("/logs")).unwrap();
        let rotor = fx.open(fx.options().with_keep_files(3));

        rotor.write(b"today").expect("write");
        rotor.rotate();
        rotor.wait_retention();

        let mut names: Vec<String> = fx
            .fs
            .list_dir(Path::new("/logs"))
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["app-2024-01-04.log", "app-2024-01-05.log", "app-2024-01-10.log"]
        );
    }

    #[test]
    fn test_boundary_switch_prunes_by_age() {
        let fx = Fixture::new();
        let now = std::time::SystemTime::from(fx.clock.now());
        let day = Duration::from_secs(86400);
        fx.fs.add_file_modified(PathBuf::from("/logs/app-2023-12-31.log"), vec![], now - 10 * day);
        fx.fs.add_file_modified(PathBuf::from("/logs/app-2024-01-09.log"), vec![], now - day);
        let rotor = fx.open(fx.options().with_max_age(7 * day));

        rotor.write(b"a").expect("write");
        fx.next_day();
        rotor.write(b"b").expect("write");
        rotor.wait_retention();

        assert!(!fx.fs.exists(Path::new("/logs/app-2023-12-31.log")));
        assert!(fx.fs.exists(Path::new("/logs/app-2024-01-09.log")));
        assert!(fx.fs.exists(Path::new("/logs/app-2024-01-10.log")));
        assert!(fx.fs.exists(Path::new("/logs/app-2024-01-11.log")));
    }

    #[test]
    fn test_retention_never_removes_active_file() {
        let fx = Fixture::new();
        let rotor = fx.open(fx.options().with_keep_files(1));
        rotor.write(b"a").expect("write");
        fx.next_day();
        rotor.write(b"b").expect("write");
        rotor.wait_retention();

        assert!(fx.fs.exists(Path::new("/logs/app-2024-01-11.log")));
        assert!(!fx.fs.exists(Path::new("/logs/app-2024-01-10.log")));
    }

    #[test]
    fn test_scheduled_rotation_fires_and_rearms() {
        let fx = Fixture::new();
        let rotor = fx.open(
            fx.options()
                .with_boundary(Boundary::Interval(Duration::from_millis(20))),
        );
        rotor.write(b"a").expect("write");

        assert!(wait_until(|| fx.fs.open_handles() == 0), "trigger never fired");
        assert!(wait_until(|| rotor.is_armed()), "trigger not re-armed");

        rotor.write(b"b").expect("write");
        assert_eq!(fx.file("app-2024-01-10.log"), Some(b"ab".to_vec()));
        rotor.stop();
    }

    #[test]
    fn test_stopped_rotor_does_not_rotate() {
        let fx = Fixture::new();
        let rotor = fx.open(
            fx.options()
                .with_boundary(Boundary::Interval(Duration::from_millis(20))),
        );
        assert!(rotor.stop());
        rotor.write(b"a").expect("write");

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fx.fs.open_handles(), 1);
        assert_eq!(fx.fs.opens(), 1);
    }
}
