//! Newtype-wrapped scalar units used throughout the simulator.
//!
//! All units wrap `f64` and provide the arithmetic that makes sense for the
//! quantity: rates add up, a rate integrated over a time delta yields an
//! amount of data, power integrated over a time delta yields energy.
//! Equality of measured quantities is approximate within [`EPSILON`]
//! (see [`DataRate::approx_eq`]); ordering comparisons are strict.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

use serde::Serialize;

/// Relative tolerance used for approximate equality of unit values.
pub const EPSILON: f64 = 1e-9;

/// Approximate equality: `|a - b| <= EPSILON * max(|a|, |b|, 1)`.
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    if a == b {
        // covers infinities
        return true;
    }
    (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.)
}

/// A non-negative data rate in bits per second.
///
/// Used for both flow demands and realized throughputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct DataRate(f64);

impl DataRate {
    /// Zero rate.
    pub const ZERO: DataRate = DataRate(0.);
    /// Unbounded rate, used for the internet node's ports.
    pub const UNLIMITED: DataRate = DataRate(f64::INFINITY);

    /// Creates a rate from a raw bits-per-second value.
    pub fn from_bits_per_sec(value: f64) -> Self {
        debug_assert!(value >= 0., "data rate must be non-negative");
        Self(value)
    }

    /// Creates a rate from a Kbps value.
    pub fn from_kbps(value: f64) -> Self {
        Self::from_bits_per_sec(value * 1e3)
    }

    /// Creates a rate from a Mbps value.
    pub fn from_mbps(value: f64) -> Self {
        Self::from_bits_per_sec(value * 1e6)
    }

    /// Raw value in bits per second.
    pub fn bits_per_sec(&self) -> f64 {
        self.0
    }

    /// Value in Kbps.
    pub fn to_kbps(&self) -> f64 {
        self.0 / 1e3
    }

    /// Value in Mbps.
    pub fn to_mbps(&self) -> f64 {
        self.0 / 1e6
    }

    /// Approximate equality within [`EPSILON`].
    pub fn approx_eq(&self, other: DataRate) -> bool {
        approx_eq(self.0, other.0)
    }

    /// Whether the rate is approximately zero.
    pub fn is_zero(&self) -> bool {
        self.approx_eq(Self::ZERO)
    }

    /// Whether the rate is unbounded.
    pub fn is_unlimited(&self) -> bool {
        self.0.is_infinite()
    }

    /// The smaller of two rates.
    pub fn min(self, other: DataRate) -> DataRate {
        DataRate(self.0.min(other.0))
    }

    /// The larger of two rates.
    pub fn max(self, other: DataRate) -> DataRate {
        DataRate(self.0.max(other.0))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: DataRate) -> DataRate {
        DataRate((self.0 - other.0).max(0.))
    }

    /// Ratio of two rates, `None` when the divisor is zero or unbounded.
    ///
    /// Used for throughput/demand and throughput/capacity ratios, which are
    /// undefined rather than NaN when the denominator vanishes.
    pub fn checked_ratio(&self, other: DataRate) -> Option<f64> {
        if other.is_zero() || other.is_unlimited() {
            None
        } else {
            Some(self.0 / other.0)
        }
    }
}

impl Add for DataRate {
    type Output = DataRate;
    fn add(self, rhs: DataRate) -> DataRate {
        DataRate(self.0 + rhs.0)
    }
}

impl AddAssign for DataRate {
    fn add_assign(&mut self, rhs: DataRate) {
        self.0 += rhs.0;
    }
}

impl Sub for DataRate {
    type Output = DataRate;
    fn sub(self, rhs: DataRate) -> DataRate {
        DataRate(self.0 - rhs.0)
    }
}

impl SubAssign for DataRate {
    fn sub_assign(&mut self, rhs: DataRate) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for DataRate {
    type Output = DataRate;
    fn mul(self, rhs: f64) -> DataRate {
        DataRate(self.0 * rhs)
    }
}

impl Div<f64> for DataRate {
    type Output = DataRate;
    fn div(self, rhs: f64) -> DataRate {
        DataRate(self.0 / rhs)
    }
}

impl Mul<TimeDelta> for DataRate {
    type Output = DataSize;
    fn mul(self, rhs: TimeDelta) -> DataSize {
        DataSize(self.0 * rhs.as_secs_f64())
    }
}

impl Sum for DataRate {
    fn sum<I: Iterator<Item = DataRate>>(iter: I) -> DataRate {
        iter.fold(DataRate::ZERO, |acc, r| acc + r)
    }
}

/// An amount of data in bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct DataSize(f64);

impl DataSize {
    /// Zero bits.
    pub const ZERO: DataSize = DataSize(0.);

    /// Creates a size from a raw value in bits.
    pub fn from_bits(value: f64) -> Self {
        debug_assert!(value >= 0., "data size must be non-negative");
        Self(value)
    }

    /// Raw value in bits.
    pub fn bits(&self) -> f64 {
        self.0
    }

    /// Value in megabytes.
    pub fn to_megabytes(&self) -> f64 {
        self.0 / 8e6
    }

    /// Approximate equality within [`EPSILON`].
    pub fn approx_eq(&self, other: DataSize) -> bool {
        approx_eq(self.0, other.0)
    }
}

impl Add for DataSize {
    type Output = DataSize;
    fn add(self, rhs: DataSize) -> DataSize {
        DataSize(self.0 + rhs.0)
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        self.0 += rhs.0;
    }
}

/// Instantaneous power draw in watts.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Power(f64);

impl Power {
    /// Zero watts.
    pub const ZERO: Power = Power(0.);

    /// Creates a power value from watts.
    pub fn from_watts(value: f64) -> Self {
        debug_assert!(value >= 0., "power must be non-negative");
        Self(value)
    }

    /// Raw value in watts.
    pub fn watts(&self) -> f64 {
        self.0
    }

    /// Approximate equality within [`EPSILON`].
    pub fn approx_eq(&self, other: Power) -> bool {
        approx_eq(self.0, other.0)
    }
}

impl Add for Power {
    type Output = Power;
    fn add(self, rhs: Power) -> Power {
        Power(self.0 + rhs.0)
    }
}

impl Mul<TimeDelta> for Power {
    type Output = Energy;
    fn mul(self, rhs: TimeDelta) -> Energy {
        Energy(self.0 * rhs.as_secs_f64())
    }
}

impl Sum for Power {
    fn sum<I: Iterator<Item = Power>>(iter: I) -> Power {
        iter.fold(Power::ZERO, |acc, p| acc + p)
    }
}

/// Consumed energy in joules.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Energy(f64);

impl Energy {
    /// Zero joules.
    pub const ZERO: Energy = Energy(0.);

    /// Raw value in joules.
    pub fn joules(&self) -> f64 {
        self.0
    }

    /// Approximate equality within [`EPSILON`].
    pub fn approx_eq(&self, other: Energy) -> bool {
        approx_eq(self.0, other.0)
    }
}

impl Add for Energy {
    type Output = Energy;
    fn add(self, rhs: Energy) -> Energy {
        Energy(self.0 + rhs.0)
    }
}

impl AddAssign for Energy {
    fn add_assign(&mut self, rhs: Energy) {
        self.0 += rhs.0;
    }
}

impl Sum for Energy {
    fn sum<I: Iterator<Item = Energy>>(iter: I) -> Energy {
        iter.fold(Energy::ZERO, |acc, e| acc + e)
    }
}

/// A point in wall-clock time, in milliseconds since an arbitrary origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TimePoint(f64);

impl TimePoint {
    /// Creates a time point from milliseconds.
    pub fn from_millis(value: f64) -> Self {
        Self(value)
    }

    /// Milliseconds since the origin, truncated.
    pub fn as_millis(&self) -> u64 {
        self.0 as u64
    }

    /// Seconds since the origin.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 / 1e3
    }
}

impl Sub for TimePoint {
    type Output = TimeDelta;
    fn sub(self, rhs: TimePoint) -> TimeDelta {
        TimeDelta(self.0 - rhs.0)
    }
}

/// A span of wall-clock time in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TimeDelta(f64);

impl TimeDelta {
    /// Zero span.
    pub const ZERO: TimeDelta = TimeDelta(0.);

    /// Creates a span from milliseconds.
    pub fn from_millis(value: f64) -> Self {
        Self(value)
    }

    /// The span in seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 / 1e3
    }

    /// Span clamped at zero (clocks are expected to be monotonic, but a
    /// misbehaving instant source must not produce negative energy).
    pub fn max_zero(self) -> TimeDelta {
        TimeDelta(self.0.max(0.))
    }
}
