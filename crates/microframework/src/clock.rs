//! High-resolution marks and wall-clock time.

use chrono::Utc;
use std::sync::OnceLock;
use std::time::Instant;

/// A high-resolution timestamp in nanoseconds.
///
/// Marks taken by this process are integers. Marks supplied from outside
/// (or on platforms without a 64-bit counter) may be floating point; the
/// two forms can be mixed when computing elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HrTime {
    Nanos(u64),
    Float(f64),
}

impl HrTime {
    pub fn as_f64(self) -> f64 {
        match self {
            HrTime::Nanos(n) => n as f64,
            HrTime::Float(f) => f,
        }
    }

    /// Nanoseconds from `self` to `now`.
    ///
    /// Integer marks are subtracted exactly before conversion, so large
    /// counter values lose no precision; negative results are kept.
    pub fn elapsed_nanos(self, now: HrTime) -> f64 {
        match (self, now) {
            (HrTime::Nanos(start), HrTime::Nanos(now)) => {
                (i128::from(now) - i128::from(start)) as f64
            }
            _ => now.as_f64() - self.as_f64(),
        }
    }
}

impl From<u64> for HrTime {
    fn from(nanos: u64) -> Self {
        HrTime::Nanos(nanos)
    }
}

impl From<f64> for HrTime {
    fn from(nanos: f64) -> Self {
        HrTime::Float(nanos)
    }
}

/// Source of both time bases used for latency.
pub trait Clock: Send + Sync {
    /// Monotonic high-resolution mark.
    fn hr_time(&self) -> HrTime;

    /// Wall-clock time as fractional unix seconds.
    fn wall_clock(&self) -> f64;
}

/// The real clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

fn process_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

impl SystemClock {
    /// Take a mark now. Intended as the very first thing an entry point does.
    pub fn mark() -> HrTime {
        let nanos = process_anchor().elapsed().as_nanos();
        HrTime::Nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Clock for SystemClock {
    fn hr_time(&self) -> HrTime {
        SystemClock::mark()
    }

    fn wall_clock(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that always reads the same values.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub hr_time: HrTime,
    pub wall_clock: f64,
}

impl Clock for FixedClock {
    fn hr_time(&self) -> HrTime {
        self.hr_time
    }

    fn wall_clock(&self) -> f64 {
        self.wall_clock
    }
}
