//! Analysis Windows for Gabor Dictionaries
//!
//! Generates the finite windows that define each Gabor dictionary.
//!
//! ## Layout
//!
//! Windows are whole-point centred: sample `j` of a window of length `gl`
//! sits at time offset `j - gl/2` relative to the atom centre. Each shape is
//! evaluated at `x = (j - gl/2) / gl`, which runs over `[-0.5, 0.5)`.
//!
//! ```text
//!  j:   0   1   2   3  [4]  5   6   7        (gl = 8, centre at j = 4)
//!  x: -.5      ...      0       ...  .375
//! ```
//!
//! ## Window Selection Guide
//!
//! | Window     | Main Lobe Width | Sidelobe Level | Kernel size |
//! |------------|-----------------|----------------|-------------|
//! | Rect       | Narrowest       | -13 dB         | Largest     |
//! | Hann       | Medium          | -31 dB         | Medium      |
//! | Hamming    | Medium          | -43 dB         | Large       |
//! | Blackman   | Wide            | -58 dB         | Small       |
//! | Nuttall    | Wide            | -93 dB         | Smallest    |
//!
//! Fast sidelobe decay keeps the Gram kernels compact, which is what makes the
//! residual update local.
//!
//! ## Example
//!
//! ```rust
//! use gabmp_core::windows::{FirWindow, normalize_energy};
//!
//! let mut g = FirWindow::Blackman.generate(64);
//! normalize_energy(&mut g);
//! let energy: f64 = g.iter().map(|x| x * x).sum();
//! assert!((energy - 1.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirWindow {
    /// 0.5 + 0.5 cos(2πx)
    Hann,
    /// Square root of Hann
    SqrtHann,
    /// 0.54 + 0.46 cos(2πx)
    Hamming,
    /// 0.53836 + 0.46164 cos(2πx)
    Nuttall01,
    /// 0.42 + 0.5 cos(2πx) + 0.08 cos(4πx)
    Blackman,
    /// Exact Blackman (7938 + 9240 cos(2πx) + 1430 cos(4πx)) / 18608
    Blackman2,
    /// 4-term Nuttall, -93 dB sidelobes
    Nuttall,
    /// Boxcar
    Rect,
    /// 1 - 2|x|
    Triangular,
    /// Square root of the triangular window
    SqrtTriangular,
}

impl Default for FirWindow {
    fn default() -> Self {
        FirWindow::Blackman
    }
}

impl FirWindow {
    /// Evaluate the shape at normalised position `x` in `[-0.5, 0.5)`.
    pub fn eval(&self, x: f64) -> f64 {
        let c1 = (2.0 * PI * x).cos();
        match self {
            FirWindow::Hann => 0.5 + 0.5 * c1,
            FirWindow::SqrtHann => (0.5 + 0.5 * c1).max(0.0).sqrt(),
            FirWindow::Hamming => 0.54 + 0.46 * c1,
            FirWindow::Nuttall01 => 0.53836 + 0.46164 * c1,
            FirWindow::Blackman => 0.42 + 0.5 * c1 + 0.08 * (4.0 * PI * x).cos(),
            FirWindow::Blackman2 => {
                (7938.0 + 9240.0 * c1 + 1430.0 * (4.0 * PI * x).cos()) / 18608.0
            }
            FirWindow::Nuttall => {
                0.355768 + 0.487396 * c1
                    + 0.144232 * (4.0 * PI * x).cos()
                    + 0.012604 * (6.0 * PI * x).cos()
            }
            FirWindow::Rect => {
                if x.abs() < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            FirWindow::Triangular => 1.0 - 2.0 * x.abs(),
            FirWindow::SqrtTriangular => (1.0 - 2.0 * x.abs()).max(0.0).sqrt(),
        }
    }

    /// Generate a centred window of length `gl`.
    pub fn generate(&self, gl: usize) -> Vec<f64> {
        if gl == 0 {
            return vec![];
        }
        let half = (gl / 2) as f64;
        let step = 1.0 / gl as f64;
        (0..gl)
            .map(|j| self.eval((j as f64 - half) * step).max(0.0))
            .collect()
    }

    /// Generate a centred window of length `gl` with unit energy.
    pub fn generate_normalized(&self, gl: usize) -> Vec<f64> {
        let mut g = self.generate(gl);
        normalize_energy(&mut g);
        g
    }

    /// Parse a window name as used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Some(FirWindow::Hann),
            "sqrthann" | "sqrt_hann" | "cosine" | "sine" => Some(FirWindow::SqrtHann),
            "hamming" => Some(FirWindow::Hamming),
            "nuttall01" => Some(FirWindow::Nuttall01),
            "blackman" => Some(FirWindow::Blackman),
            "blackman2" => Some(FirWindow::Blackman2),
            "nuttall" => Some(FirWindow::Nuttall),
            "rect" | "square" => Some(FirWindow::Rect),
            "tria" | "triangular" | "bartlett" => Some(FirWindow::Triangular),
            "sqrttria" | "sqrt_triangular" => Some(FirWindow::SqrtTriangular),
            _ => None,
        }
    }
}

/// Scale a window to unit energy in place.
///
/// Returns the energy before scaling. A zero-energy window is left untouched.
pub fn normalize_energy(g: &mut [f64]) -> f64 {
    let energy: f64 = g.iter().map(|x| x * x).sum();
    if energy > 0.0 {
        let scale = 1.0 / energy.sqrt();
        for x in g.iter_mut() {
            *x *= scale;
        }
    }
    energy
}

/// Offset of the window centre, `gl / 2`.
#[inline]
pub fn center(gl: usize) -> usize {
    gl / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centre_is_peak() {
        for win in [FirWindow::Hann, FirWindow::Hamming, FirWindow::Blackman, FirWindow::Nuttall] {
            let g = win.generate(16);
            let peak = g
                .iter()
                .enumerate()
                .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            assert_eq!(peak.0, center(16), "{:?}", win);
            assert!((peak.1 - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_hann_even_starts_at_zero() {
        let g = FirWindow::Hann.generate(8);
        assert!(g[0].abs() < 1e-12);
        // Symmetric around the centre sample
        for k in 1..4 {
            assert!((g[4 - k] - g[4 + k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_odd_length_symmetry() {
        let g = FirWindow::Blackman.generate(9);
        for k in 1..=4 {
            assert!((g[4 - k] - g[4 + k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normalize_energy() {
        let mut g = FirWindow::Hamming.generate(32);
        let before = normalize_energy(&mut g);
        assert!(before > 1.0);
        let after: f64 = g.iter().map(|x| x * x).sum();
        assert!((after - 1.0).abs() < 1e-12);

        let mut zeros = vec![0.0; 4];
        assert_eq!(normalize_energy(&mut zeros), 0.0);
        assert!(zeros.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_sqrt_variants() {
        let hann = FirWindow::Hann.generate(12);
        let sqrt_hann = FirWindow::SqrtHann.generate(12);
        for (a, b) in hann.iter().zip(sqrt_hann.iter()) {
            assert!((a - b * b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(FirWindow::from_name("Blackman"), Some(FirWindow::Blackman));
        assert_eq!(FirWindow::from_name("hanning"), Some(FirWindow::Hann));
        assert_eq!(FirWindow::from_name("kaiser"), None);
    }

    #[test]
    fn test_empty_window() {
        assert!(FirWindow::Hann.generate(0).is_empty());
    }
}
