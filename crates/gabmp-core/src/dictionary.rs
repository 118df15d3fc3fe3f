//! Gabor dictionary descriptors
//!
//! A dictionary is one Gabor system: a window `g` of length `gl`, a hop `a`
//! and `M` frequency channels over a signal of length `L`. Only the real-signal
//! half spectrum `M2 = M/2 + 1` is stored.
//!
//! ```text
//!   N = L / a frames, M2 = M/2 + 1 bins
//!
//!   atom (m, n):  g(l - n a) exp(2 pi i m l / M)      (frequency-invariant)
//! ```
//!
//! Construction validates the geometry and normalises the window to unit
//! energy, so every atom has unit norm and the Gram kernels have a diagonal of 1.

use crate::types::{lcm, MpError, MpResult};
use crate::windows::{normalize_energy, FirWindow};

/// Unvalidated window description, turned into a [`Dictionary`] once the
/// signal length is known.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub samples: Vec<f64>,
    pub hop: usize,
    pub channels: usize,
}

impl WindowSpec {
    pub fn new(samples: Vec<f64>, hop: usize, channels: usize) -> Self {
        Self { samples, hop, channels }
    }

    /// Window of a named shape and length `window_len`.
    pub fn fir(shape: FirWindow, window_len: usize, hop: usize, channels: usize) -> Self {
        Self::new(shape.generate(window_len), hop, channels)
    }

    pub fn build(&self, signal_len: usize, index: usize) -> MpResult<Dictionary> {
        Dictionary::new(&self.samples, self.hop, self.channels, signal_len, index)
    }
}

/// One Gabor system of the union.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    window: Vec<f64>,
    hop: usize,
    channels: usize,
    signal_len: usize,
}

impl Dictionary {
    /// Build a dictionary from window samples.
    ///
    /// `index` is only used to label errors.
    pub fn new(
        window: &[f64],
        hop: usize,
        channels: usize,
        signal_len: usize,
        index: usize,
    ) -> MpResult<Self> {
        if hop == 0 {
            return Err(MpError::NotPositive { name: "hop", value: hop });
        }
        if channels == 0 {
            return Err(MpError::NotPositive { name: "channels", value: channels });
        }
        if window.is_empty() {
            return Err(MpError::NotPositive { name: "window length", value: 0 });
        }
        if signal_len == 0 {
            return Err(MpError::NotPositive { name: "signal length", value: 0 });
        }
        if window.len() > signal_len {
            return Err(MpError::WindowTooLong { window: window.len(), length: signal_len });
        }
        let l = lcm(hop, channels);
        if signal_len % l != 0 {
            return Err(MpError::BadSignalLength { length: signal_len, lcm: l });
        }
        if hop > channels {
            return Err(MpError::NotAFrame {
                index,
                reason: format!("hop {} exceeds channel count {}", hop, channels),
            });
        }
        if window.len() < hop {
            return Err(MpError::NotAFrame {
                index,
                reason: format!("window length {} is shorter than hop {}", window.len(), hop),
            });
        }

        let mut g = window.to_vec();
        if normalize_energy(&mut g) <= 0.0 {
            return Err(MpError::ZeroEnergyWindow(index));
        }

        Ok(Self { window: g, hop, channels, signal_len })
    }

    /// Build a dictionary from a named window shape.
    pub fn from_fir(
        shape: FirWindow,
        window_len: usize,
        hop: usize,
        channels: usize,
        signal_len: usize,
        index: usize,
    ) -> MpResult<Self> {
        Self::new(&shape.generate(window_len), hop, channels, signal_len, index)
    }

    /// Unit-energy window samples, centred at `len / 2`.
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Hop size `a`
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Channel count `M`
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Half-spectrum size `M2`
    pub fn bins(&self) -> usize {
        self.channels / 2 + 1
    }

    /// Number of time frames `N`
    pub fn frames(&self) -> usize {
        self.signal_len / self.hop
    }

    pub fn signal_len(&self) -> usize {
        self.signal_len
    }

    /// Number of stored coefficients, `M2 * N`.
    pub fn coefficient_count(&self) -> usize {
        self.bins() * self.frames()
    }

    /// Frequency spacing `L / M` in units of `1 / L`.
    pub fn freq_step(&self) -> usize {
        self.signal_len / self.channels
    }

    /// Whether bin `m` has a distinct conjugate partner in the full spectrum.
    ///
    /// False for DC and, with an even channel count, for Nyquist.
    #[inline]
    pub fn has_conjugate(&self, m: usize) -> bool {
        !(m == 0 || (self.channels % 2 == 0 && m == self.channels / 2))
    }

    /// Linear index of `(m, n)` in a coefficient plane.
    #[inline]
    pub fn index(&self, m: usize, n: usize) -> usize {
        n * self.bins() + m
    }
}
