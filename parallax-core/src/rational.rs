//! Rational time bases and timestamp rescaling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rational number, used for stream time bases and aspect ratios.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    /// Create a new rational. A negative denominator is normalized into the numerator.
    pub const fn new(num: i64, den: i64) -> Self {
        if den < 0 {
            Self { num: -num, den: -den }
        } else {
            Self { num, den }
        }
    }

    /// A zero or degenerate rational, as found in unset aspect ratios.
    pub fn is_unset(&self) -> bool {
        self.num == 0 || self.den == 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Convert time units of this base into seconds.
    pub fn units_to_seconds(&self, units: i64) -> f64 {
        units as f64 * self.to_f64()
    }

    /// Rescale `value` from this time base into `target`, rounding to nearest
    /// (halves away from zero).
    pub fn rescale(&self, value: i64, target: Rational) -> i64 {
        let num = value as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        if den == 0 {
            return value;
        }
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        rounded.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
    }

    /// Like [`Rational::rescale`], but a missing timestamp passes through untouched.
    pub fn rescale_opt(&self, value: Option<i64>, target: Rational) -> Option<i64> {
        value.map(|v| self.rescale(v, target))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
