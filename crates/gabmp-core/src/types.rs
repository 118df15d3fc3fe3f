//! Core types for multi-Gabor matching pursuit
//!
//! This module defines the scalar types, atom positions and the error taxonomy
//! shared by every other module.
//!
//! ## Atom positions
//!
//! An atom is addressed by a time frame `n`, a frequency channel `m` and the
//! dictionary `w` it belongs to. Coefficients of one dictionary are stored
//! column-major by time, so the linear index of `(m, n)` is `n * bins + m`
//! where `bins = M/2 + 1` is the size of the real-signal half spectrum.
//!
//! ```text
//!         n = 0    n = 1    n = 2          (time frames, N = L/a)
//!       +--------+--------+--------+
//! m = 0 |  c00   |  c01   |  c02   |
//! m = 1 |  c10   |  c11   |  c12   |  ...
//!  ...  |        |        |        |
//! m = M/2        (Nyquist when M is even)
//!       +--------+--------+--------+
//! ```

use num_complex::Complex64;
use std::fmt;

/// Type alias for complex coefficients using f64 precision
pub type Complex = Complex64;

/// A floating point sample (for real-valued signals)
pub type Sample = f64;

/// Result type for pursuit operations
pub type MpResult<T> = Result<T, MpError>;

/// Errors that can occur while building or running a pursuit
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MpError {
    #[error("{name} must be positive (got {value})")]
    NotPositive { name: &'static str, value: usize },

    #[error("Signal length {length} must be divisible by lcm(a, M) = {lcm}")]
    BadSignalLength { length: usize, lcm: usize },

    #[error("Window of length {window} does not fit into signal length {length}")]
    WindowTooLong { window: usize, length: usize },

    #[error("Window {0} has zero energy")]
    ZeroEnergyWindow(usize),

    #[error("Dictionary {index} is not a frame: {reason}")]
    NotAFrame { index: usize, reason: String },

    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("At least one dictionary is required")]
    NoDictionaries,

    #[error("Kernel between dictionaries {0} and {1} is empty")]
    EmptyKernel(usize, usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Position of one atom in the union of dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AtomPos {
    /// Frequency channel within the half spectrum
    pub m: usize,
    /// Time frame, wrapped into `0..N`
    pub n: usize,
    /// Dictionary index
    pub w: usize,
}

impl AtomPos {
    pub fn new(m: usize, n: usize, w: usize) -> Self {
        Self { m, n, w }
    }

    /// Linear index into a dictionary's coefficient plane.
    #[inline]
    pub fn index(&self, bins: usize) -> usize {
        self.n * bins + self.m
    }
}

impl fmt::Display for AtomPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(m={}, n={}, w={})", self.m, self.n, self.w)
    }
}

/// Phase convention of the Gabor atoms.
///
/// Frequency-invariant atoms carry the phase of an absolute time reference,
/// `g(l - na) exp(2 pi i m l / M)`. Time-invariant atoms are modulated
/// relative to their own centre, `g(l - na) exp(2 pi i m (l - na) / M)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseConvention {
    FrequencyInvariant,
    TimeInvariant,
}

impl Default for PhaseConvention {
    fn default() -> Self {
        PhaseConvention::FrequencyInvariant
    }
}

impl fmt::Display for PhaseConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseConvention::FrequencyInvariant => write!(f, "freqinv"),
            PhaseConvention::TimeInvariant => write!(f, "timeinv"),
        }
    }
}

/// Greatest common divisor
pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple
pub fn lcm(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

/// Ceiling division for signed integers with a positive divisor.
#[inline]
pub(crate) fn div_ceil_i64(num: i64, den: i64) -> i64 {
    -((-num).div_euclid(den))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(16, 64), 16);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(lcm(16, 64), 64);
        assert_eq!(lcm(12, 18), 36);
        assert_eq!(lcm(0, 5), 0);
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil_i64(7, 2), 4);
        assert_eq!(div_ceil_i64(8, 2), 4);
        assert_eq!(div_ceil_i64(-7, 2), -3);
        assert_eq!(div_ceil_i64(-8, 2), -4);
        assert_eq!(div_ceil_i64(0, 3), 0);
    }

    #[test]
    fn test_atom_index() {
        let pos = AtomPos::new(3, 2, 0);
        assert_eq!(pos.index(33), 2 * 33 + 3);
        assert_eq!(AtomPos::new(0, 0, 1).index(33), 0);
        assert_ne!(pos, AtomPos::new(3, 2, 1));
    }

    #[test]
    fn test_error_display() {
        let err = MpError::BadSignalLength { length: 100, lcm: 64 };
        assert!(err.to_string().contains("lcm"));
        let err = MpError::NotPositive { name: "hop", value: 0 };
        assert_eq!(err.to_string(), "hop must be positive (got 0)");
    }
}
