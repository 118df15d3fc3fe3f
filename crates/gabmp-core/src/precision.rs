//! Extended-precision error accumulator
//!
//! The pursuit tracks the residual energy by subtracting the energy removed by
//! every projection. Over many thousands of iterations the subtracted terms are
//! tiny compared with the running value, so a plain `f64` loses the low bits
//! that decide whether a refinement step made things better or worse.
//!
//! [`ExtendedAccumulator`] keeps the value as an unevaluated sum `hi + lo` of
//! two doubles (double-double arithmetic), which gives roughly a 106-bit
//! significand. Coefficients themselves stay `f64`.

use std::fmt;

/// Double-double accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtendedAccumulator {
    hi: f64,
    lo: f64,
}

/// Error-free sum: returns `(s, e)` with `s + e == a + b` exactly.
#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let e = (a - (s - bb)) + (b - bb);
    (s, e)
}

impl ExtendedAccumulator {
    pub fn new(value: f64) -> Self {
        Self { hi: value, lo: 0.0 }
    }

    /// Add a double.
    #[inline]
    pub fn add(&mut self, value: f64) {
        let (s, e) = two_sum(self.hi, value);
        let lo = e + self.lo;
        let (hi, lo) = two_sum(s, lo);
        self.hi = hi;
        self.lo = lo;
    }

    /// Subtract a double.
    #[inline]
    pub fn sub(&mut self, value: f64) {
        self.add(-value);
    }

    /// Best `f64` approximation of the accumulated value.
    #[inline]
    pub fn value(&self) -> f64 {
        self.hi + self.lo
    }

    /// `self - other` evaluated in extended precision, rounded to `f64`.
    pub fn diff(&self, other: &ExtendedAccumulator) -> f64 {
        let (s, e) = two_sum(self.hi, -other.hi);
        s + (e + (self.lo - other.lo))
    }

    /// Ratio to a reference energy in decibels.
    ///
    /// Non-positive values map to negative infinity.
    pub fn db_relative_to(&self, reference: f64) -> f64 {
        let v = self.value();
        if v <= 0.0 || reference <= 0.0 {
            return f64::NEG_INFINITY;
        }
        10.0 * (v / reference).log10()
    }
}

impl fmt::Display for ExtendedAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.12e}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_small_increments() {
        let mut acc = ExtendedAccumulator::new(1.0);
        for _ in 0..1000 {
            acc.add(1e-17);
        }
        // A plain f64 would still read exactly 1.0 here.
        let plain = (0..1000).fold(1.0f64, |s, _| s + 1e-17);
        assert_eq!(plain, 1.0);
        assert!((acc.diff(&ExtendedAccumulator::new(1.0)) - 1e-14).abs() < 1e-20);
    }

    #[test]
    fn test_add_sub_roundtrip() {
        let mut acc = ExtendedAccumulator::new(3.5);
        acc.sub(0.25);
        acc.add(0.25);
        assert_eq!(acc.value(), 3.5);
    }

    #[test]
    fn test_db() {
        let acc = ExtendedAccumulator::new(0.01);
        assert!((acc.db_relative_to(1.0) + 20.0).abs() < 1e-12);
        let zero = ExtendedAccumulator::new(0.0);
        assert_eq!(zero.db_relative_to(1.0), f64::NEG_INFINITY);
    }
}
