//! Rational numbers for frame rates and time bases.

use std::cmp::Ordering;
use std::fmt;

/// An exact `num/den` ratio.
///
/// The denominator is kept positive; the sign lives on the numerator.
/// Timestamp conversion between time bases goes through [`Rational::rescale`],
/// which is the single place the pipeline's rounding policy is defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator
    pub num: i64,
    /// Denominator (always positive)
    pub den: i64,
}

impl Rational {
    /// Create a ratio, normalizing the sign onto the numerator.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Denominator cannot be zero");
        if den < 0 {
            Self { num: -num, den: -den }
        } else {
            Self { num, den }
        }
    }

    /// The inverse ratio: a frame rate becomes a frame duration.
    ///
    /// # Panics
    ///
    /// Panics if the numerator is zero.
    pub fn recip(&self) -> Self {
        assert!(self.num != 0, "Cannot take reciprocal of zero");
        Self::new(self.den, self.num)
    }

    /// Scale the numerator by an integer (e.g. fps to field rate).
    pub fn mul_int(&self, n: i64) -> Self {
        Self::new(self.num * n, self.den)
    }

    /// Scale the denominator by an integer (e.g. frame to field duration).
    pub fn div_int(&self, n: i64) -> Self {
        Self::new(self.num, self.den * n)
    }

    /// Approximate as a float, for rate estimates only.
    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Map `value` ticks of this unit into ticks of `target`.
    ///
    /// Rounds to the nearest target tick, ties away from zero. Every
    /// timestamp in the pipeline converts through here so video, audio and
    /// subtitle paths share one rounding behavior.
    pub fn rescale(&self, value: i64, target: Rational) -> i64 {
        let num = value as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let rounded = if num >= 0 {
            (num + den / 2) / den
        } else {
            (num - den / 2) / den
        };
        rounded as i64
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num as i64, den as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_normalization() {
        let r = Rational::new(1, -2);
        assert_eq!((r.num, r.den), (-1, 2));
        assert_eq!(Rational::new(-3, -4), Rational::new(3, 4));
    }

    #[test]
    fn test_recip_and_scaling() {
        assert_eq!(Rational::new(30, 1).recip(), Rational::new(1, 30));
        assert_eq!(Rational::new(-2, 3).recip(), Rational::new(-3, 2));
        assert_eq!(Rational::new(30, 1).mul_int(2), Rational::new(60, 1));
        assert_eq!(Rational::new(1, 30).div_int(2), Rational::new(1, 60));
    }

    #[test]
    fn test_rescale_exact() {
        // 1000 ms = 90000 ticks at 1/90000
        let ms = Rational::new(1, 1000);
        assert_eq!(ms.rescale(1000, Rational::new(1, 90000)), 90000);
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        // one 30fps frame in milliseconds: 33.33 -> 33, two frames -> 67
        let fps = Rational::new(1, 30);
        assert_eq!(fps.rescale(1, Rational::new(1, 1000)), 33);
        assert_eq!(fps.rescale(2, Rational::new(1, 1000)), 67);
    }

    #[test]
    fn test_rescale_ties_away_from_zero() {
        let half = Rational::new(1, 2);
        assert_eq!(half.rescale(1, Rational::new(1, 1)), 1);
        assert_eq!(half.rescale(-1, Rational::new(1, 1)), -1);
    }

    #[test]
    fn test_rescale_negative() {
        let fps = Rational::new(1, 30);
        assert_eq!(fps.rescale(-3, Rational::new(1, 1000)), -100);
    }

    #[test]
    fn test_ordering() {
        assert!(Rational::new(1, 2) > Rational::new(1, 3));
        assert!(Rational::new(-1, 2) < Rational::new(1, 3));
    }
}
