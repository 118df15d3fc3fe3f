//! Real-signal Discrete Gabor Transform
//!
//! Analysis and synthesis for one [`Dictionary`] on the half spectrum. The
//! pursuit uses analysis to seed its residual field and synthesis to turn the
//! sparse coefficients back into a signal.
//!
//! ## Analysis
//!
//! For each frame `n` the windowed segment is folded modulo `M` and passed
//! through one length-`M` FFT:
//!
//! ```text
//!   c(m, n) = sum_l f(l) g(l - n a) exp(-2 pi i m l / M)
//!
//!   f ──► window at n a ──► fold mod M ──► FFT(M) ──► keep 0..=M/2
//! ```
//!
//! The time-invariant convention multiplies column `n` by
//! `exp(2 pi i m n a / M)`.
//!
//! ## Synthesis
//!
//! The inverse rebuilds the full Hermitian spectrum of every column, runs an
//! unnormalised inverse FFT and overlap-adds `g(l - n a) Re(y(l mod M))`.
//! With the same window this is the adjoint of analysis, which is exactly
//! the atom expansion `sum c(m,n) g_(m,n) + conj` the pursuit needs.

use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::types::{lcm, Complex, MpError, MpResult, PhaseConvention, Sample};

/// FFT-based real DGT bound to one dictionary.
pub struct DgtReal {
    window: Vec<f64>,
    hop: usize,
    channels: usize,
    signal_len: usize,
    phase: PhaseConvention,
    fft_forward: Arc<dyn Fft<f64>>,
    fft_inverse: Arc<dyn Fft<f64>>,
    buf: Vec<Complex>,
    scratch: Vec<Complex>,
}

impl fmt::Debug for DgtReal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DgtReal")
            .field("gl", &self.window.len())
            .field("a", &self.hop)
            .field("M", &self.channels)
            .field("L", &self.signal_len)
            .field("phase", &self.phase)
            .finish()
    }
}

impl DgtReal {
    pub fn new(dict: &Dictionary, phase: PhaseConvention) -> Self {
        let m = dict.channels();
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(m);
        let fft_inverse = planner.plan_fft_inverse(m);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Self {
            window: dict.window().to_vec(),
            hop: dict.hop(),
            channels: m,
            signal_len: dict.signal_len(),
            phase,
            fft_forward,
            fft_inverse,
            buf: vec![Complex::new(0.0, 0.0); m],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    fn bins(&self) -> usize {
        self.channels / 2 + 1
    }

    fn frames(&self) -> usize {
        self.signal_len / self.hop
    }

    /// Number of coefficients produced by [`analysis`](Self::analysis).
    pub fn coefficient_count(&self) -> usize {
        self.bins() * self.frames()
    }

    /// `exp(sign 2 pi i m n a / M)` for the time-invariant phase shift.
    #[inline]
    fn phase_factor(&self, m: usize, n: usize, sign: f64) -> Complex {
        let k = ((m * ((n * self.hop) % self.channels)) % self.channels) as f64;
        Complex::from_polar(1.0, sign * 2.0 * PI * k / self.channels as f64)
    }

    /// Forward transform of a real signal into `c` (column-major by frame).
    pub fn analysis(&mut self, f: &[Sample], c: &mut [Complex]) -> MpResult<()> {
        if f.len() != self.signal_len {
            return Err(MpError::LengthMismatch { expected: self.signal_len, actual: f.len() });
        }
        if c.len() != self.coefficient_count() {
            return Err(MpError::LengthMismatch {
                expected: self.coefficient_count(),
                actual: c.len(),
            });
        }

        let l = self.signal_len as i64;
        let m = self.channels;
        let bins = self.bins();
        let half = (self.window.len() / 2) as i64;

        for n in 0..self.frames() {
            self.buf.iter_mut().for_each(|x| *x = Complex::new(0.0, 0.0));
            let origin = (n * self.hop) as i64 - half;
            for (j, &g) in self.window.iter().enumerate() {
                let t = (origin + j as i64).rem_euclid(l) as usize;
                self.buf[t % m].re += f[t] * g;
            }
            self.fft_forward.process_with_scratch(&mut self.buf, &mut self.scratch);

            let col = &mut c[n * bins..(n + 1) * bins];
            col.copy_from_slice(&self.buf[..bins]);
            if self.phase == PhaseConvention::TimeInvariant {
                for (k, v) in col.iter_mut().enumerate() {
                    *v *= self.phase_factor(k, n, 1.0);
                }
            }
        }
        Ok(())
    }

    /// Inverse transform with the analysis window, overwriting `f`.
    pub fn synthesis(&mut self, c: &[Complex], f: &mut [Sample]) -> MpResult<()> {
        if f.len() != self.signal_len {
            return Err(MpError::LengthMismatch { expected: self.signal_len, actual: f.len() });
        }
        if c.len() != self.coefficient_count() {
            return Err(MpError::LengthMismatch {
                expected: self.coefficient_count(),
                actual: c.len(),
            });
        }

        let l = self.signal_len as i64;
        let m = self.channels;
        let bins = self.bins();
        let half = (self.window.len() / 2) as i64;
        f.iter_mut().for_each(|x| *x = 0.0);

        for n in 0..self.frames() {
            let col = &c[n * bins..(n + 1) * bins];
            if col.iter().all(|v| v.re == 0.0 && v.im == 0.0) {
                continue;
            }
            for k in 0..bins {
                let v = match self.phase {
                    PhaseConvention::FrequencyInvariant => col[k],
                    PhaseConvention::TimeInvariant => col[k] * self.phase_factor(k, n, -1.0),
                };
                self.buf[k] = v;
            }
            for k in bins..m {
                self.buf[k] = self.buf[m - k].conj();
            }
            self.fft_inverse.process_with_scratch(&mut self.buf, &mut self.scratch);

            let origin = (n * self.hop) as i64 - half;
            for (j, &g) in self.window.iter().enumerate() {
                let t = (origin + j as i64).rem_euclid(l) as usize;
                f[t] += g * self.buf[t % m].re;
            }
        }
        Ok(())
    }
}

/// Smallest valid transform length `L >= ls` for every `(a, M)` pair.
pub fn dgt_length(ls: usize, geometry: &[(usize, usize)]) -> usize {
    let step = geometry
        .iter()
        .fold(1usize, |acc, &(a, m)| lcm(acc, lcm(a, m)));
    if step == 0 {
        return ls;
    }
    let ls = ls.max(1);
    ls.div_ceil(step) * step
}

/// Zero-pad (or truncate) a signal to length `len`.
pub fn postpad(f: &[Sample], len: usize) -> Vec<Sample> {
    let mut out = vec![0.0; len];
    let n = f.len().min(len);
    out[..n].copy_from_slice(&f[..n]);
    out
}

/// Signal energy `sum f(l)^2`.
pub fn energy(f: &[Sample]) -> f64 {
    f.iter().map(|x| x * x).sum()
}

/// Signal-to-noise ratio of an approximation in dB.
///
/// Returns infinity for an exact approximation.
pub fn snr_db(original: &[Sample], approx: &[Sample]) -> f64 {
    let signal = energy(original);
    let noise: f64 = original
        .iter()
        .zip(approx.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    if noise == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (signal / noise).log10()
}
