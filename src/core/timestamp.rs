use ffmpeg_next::{Rational, Rescale};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A point in presentation time, in microseconds.
///
/// Frame timestamps of both streams and the deadlines handed to the
/// queries share this type, so comparing a frame against "now" is a plain
/// integer comparison. The value is signed: a start offset larger than the
/// first raw timestamp legitimately produces negative times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

const MICROSECONDS: Rational = Rational(1, 1_000_000);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1000))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Timestamp(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
    }

    /// Converts `ticks` expressed in `time_base` units, rounding to the
    /// nearest microsecond. A degenerate time base (zero denominator) maps
    /// every tick count to zero.
    pub fn from_ticks(ticks: i64, time_base: Rational) -> Self {
        if time_base.denominator() == 0 {
            return Timestamp::ZERO;
        }
        Timestamp(ticks.rescale(time_base, MICROSECONDS))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(Timestamp::from_duration(rhs).0))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(Timestamp::from_duration(rhs).0))
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Self {
        Timestamp::from_duration(duration)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
