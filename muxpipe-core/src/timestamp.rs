//! Time bases, timestamps and durations.
//!
//! A timestamp is meaningless without its time base, so the two travel
//! together. Streams keep their own bases end to end; the scheduler
//! compares across tracks in microseconds.

use crate::rational::Rational;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

/// Seconds-per-tick unit of a stream's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBase(pub Rational);

impl TimeBase {
    /// Create a time base from numerator and denominator.
    pub fn new(num: i64, den: i64) -> Self {
        Self(Rational::new(num, den))
    }

    /// MPEG transport tick rate (1/90000).
    pub const MPEG: Self = Self(Rational { num: 1, den: 90000 });

    /// Milliseconds (1/1000), the Matroska convention.
    pub const MILLISECONDS: Self = Self(Rational { num: 1, den: 1000 });

    /// Microseconds (1/1000000).
    ///
    /// The scheduler's native exchange unit: inter-track dts comparison
    /// happens in these ticks.
    pub const MICROSECONDS: Self = Self(Rational { num: 1, den: 1_000_000 });

    /// One tick per audio sample at `rate` Hz.
    pub fn per_sample(rate: u32) -> Self {
        Self(Rational::new(1, rate.max(1) as i64))
    }

    /// Map a tick count of this base into ticks of `target`.
    pub fn convert(&self, value: i64, target: TimeBase) -> i64 {
        self.0.rescale(value, target.0)
    }

    /// A tick count as seconds.
    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.0.to_f64()
    }

    /// The underlying ratio.
    pub fn as_rational(&self) -> Rational {
        self.0
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MICROSECONDS
    }
}

impl From<Rational> for TimeBase {
    fn from(r: Rational) -> Self {
        Self(r)
    }
}

/// A tick count paired with its time base.
///
/// The sentinel [`Timestamp::NONE`] marks "no timestamp"; every operation
/// passes it through untouched.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    /// Tick count.
    pub value: i64,
    /// Unit of `value`.
    pub time_base: TimeBase,
}

impl Timestamp {
    /// Sentinel tick count of an undefined timestamp.
    pub const NONE: i64 = i64::MIN;

    /// Create a timestamp.
    pub fn new(value: i64, time_base: TimeBase) -> Self {
        Self { value, time_base }
    }

    /// An undefined timestamp.
    pub fn none() -> Self {
        Self {
            value: Self::NONE,
            time_base: TimeBase::default(),
        }
    }

    /// Whether this timestamp carries a value.
    pub fn is_valid(&self) -> bool {
        self.value != Self::NONE
    }

    /// Re-express in another time base; undefined stays undefined.
    pub fn rescale(&self, target: TimeBase) -> Self {
        if !self.is_valid() {
            return Self::none();
        }
        Self {
            value: self.time_base.convert(self.value, target),
            time_base: target,
        }
    }

    /// Raise a negative value to zero; undefined stays undefined.
    pub fn clamp_non_negative(&self) -> Self {
        if self.is_valid() && self.value < 0 {
            Self {
                value: 0,
                time_base: self.time_base,
            }
        } else {
            *self
        }
    }

    /// As seconds, when defined.
    pub fn to_seconds(&self) -> Option<f64> {
        self.is_valid().then(|| self.time_base.to_seconds(self.value))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::none()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                // compare in whichever base is finer
                let tb = if self.time_base.0.den > other.time_base.0.den {
                    self.time_base
                } else {
                    other.time_base
                };
                self.rescale(tb).value.cmp(&other.rescale(tb).value)
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_seconds() {
            Some(secs) => {
                let hours = (secs / 3600.0) as u32;
                let mins = ((secs % 3600.0) / 60.0) as u32;
                write!(f, "{:02}:{:02}:{:06.3}", hours, mins, secs % 60.0)
            }
            None => write!(f, "NONE"),
        }
    }
}

/// A span of ticks paired with its time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    /// Tick count.
    pub value: i64,
    /// Unit of `value`.
    pub time_base: TimeBase,
}

impl Duration {
    /// Create a duration.
    pub fn new(value: i64, time_base: TimeBase) -> Self {
        Self { value, time_base }
    }

    /// A zero-length duration.
    pub fn zero() -> Self {
        Self {
            value: 0,
            time_base: TimeBase::default(),
        }
    }

    /// Whether the span is empty.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Re-express in another time base.
    pub fn rescale(&self, target: TimeBase) -> Self {
        Self {
            value: self.time_base.convert(self.value, target),
            time_base: target,
        }
    }

    /// As seconds.
    pub fn to_seconds(&self) -> f64 {
        self.time_base.to_seconds(self.value)
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        if !self.is_valid() {
            return self;
        }
        Timestamp {
            value: self.value + rhs.rescale(self.time_base).value,
            time_base: self.time_base,
        }
    }
}
