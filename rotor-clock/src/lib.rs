//! Clock abstraction for rotor.
//!
//! Provides a trait for getting the current local time, with real and mock
//! implementations, plus the calendar arithmetic that decides when the next
//! rotation boundary falls.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Delay added after a calendar boundary so the trigger fires once the
/// formatted time component has already changed.
pub const GUARD_OFFSET: Duration = Duration::from_secs(1);

/// Trait for getting the current time.
pub trait Clock: Send + Sync {
    /// Returns the current local time.
    fn now(&self) -> DateTime<Local>;
}

/// Real system clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Mock clock for testing.
///
/// Cloning creates a new handle to the same instant, so a test can keep one
/// handle and move time forward under a writer that owns another.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl MockClock {
    /// Create a mock clock fixed at `now`.
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Create a mock clock at the given local wall-clock time.
    ///
    /// Returns `None` when that wall-clock time does not exist locally.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Local
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .earliest()
            .map(Self::new)
    }

    /// Jump to a new instant.
    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            if let Some(next) = now.checked_add_signed(delta) {
                *now = next;
            }
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rule deciding when the active file should change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Next local midnight.
    Daily,
    /// Next top of the hour.
    Hourly,
    /// Fixed period measured from the moment the trigger is armed.
    Interval(Duration),
}

impl Default for Boundary {
    fn default() -> Self {
        Boundary::Daily
    }
}

impl Boundary {
    /// The next boundary strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Local>) -> DateTime<Local> {
        match self {
            Boundary::Daily => {
                let date = now.date_naive();
                let next = date
                    .succ_opt()
                    .unwrap_or(date)
                    .and_hms_opt(0, 0, 0)
                    .unwrap_or_else(|| now.naive_local());
                resolve_local(next)
            }
            Boundary::Hourly => {
                let top = now
                    .date_naive()
                    .and_hms_opt(now.hour(), 0, 0)
                    .unwrap_or_else(|| now.naive_local());
                resolve_local(top + chrono::Duration::hours(1))
            }
            Boundary::Interval(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(now),
        }
    }

    /// How long to wait from `now` before the trigger should fire.
    ///
    /// Recomputed on every re-arm, so drift and clock adjustments are
    /// absorbed at the next boundary instead of accumulating.
    pub fn duration_until_next(&self, now: DateTime<Local>) -> Duration {
        match self {
            Boundary::Interval(period) => *period,
            Boundary::Daily | Boundary::Hourly => {
                let wait = (self.next_boundary(now) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                wait + GUARD_OFFSET
            }
        }
    }
}

/// Map a local wall-clock time onto an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap move forward to the first minute that exists.
fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    let mut probe = naive;
    for _ in 0..=180 {
        match Local.from_local_datetime(&probe) {
            LocalResult::Single(t) => return t,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => probe += chrono::Duration::minutes(1),
        }
    }
    Local.from_utc_datetime(&naive)
}
