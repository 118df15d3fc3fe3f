//! Gram Kernel Cache
//!
//! Inner products between atoms of two dictionaries depend only on their
//! relative time and frequency offset, up to a phase factor. This module
//! precomputes those inner products once per ordered dictionary pair so the
//! residual update touches a bounded neighbourhood instead of the whole
//! coefficient field.
//!
//! ## Offsets
//!
//! For origin atom `(m1, n1)` of dictionary `w1` and target `(m2, n2)` of `w2`
//! let `dt = n2 a2 - n1 a1` and `dv = m2 L/M2 - m1 L/M1`. Both live on coarse
//! common grids:
//!
//! ```text
//!   ta = gcd(a1, a2)               time step of the kernel
//!   fb = gcd(L/M1, L/M2)           frequency step of the kernel
//!
//!   B(dt, dv) = sum_t g1(t) g2(t - dt) exp(-2 pi i dv t / L)
//! ```
//!
//! `B` is evaluated column by column: the product `g1(t) g2(t - dt)` is folded
//! modulo `L / fb` and one FFT yields every frequency offset at once.
//!
//! ## Phase
//!
//! ```text
//!   frequency-invariant:  <g1, g2> = exp(-2 pi i n1 a1 dv / L)          B
//!   time-invariant:       <g1, g2> = exp( 2 pi i m1 (L/M1) dt / L)  *   K
//!                         K        = exp( 2 pi i dv dt / L)             B
//! ```
//!
//! The origin-dependent factor only takes `k_no` distinct values, kept in
//! `mods[r]`, one vector per residue, indexed by kernel row (frequency-
//! invariant) or kernel column (time-invariant).
//!
//! ## Layout
//!
//! ```text
//!            column j  (dt = (j - wmid) ta)
//!          ┌───────────────────────┐
//!  row i   │            .          │
//!  (dv =   │        .   X   .      │  X = (hmid, wmid), zero offset
//!  (i-hmid)│            .          │
//!   fb)    └───────────────────────┘
//!            stored column-major
//! ```
//!
//! Entries below `rel_threshold` times the peak are dropped and the block is
//! trimmed to the smallest rectangle holding the rest.

use rustfft::FftPlanner;
use std::f64::consts::PI;
use tracing::{debug, warn};

use crate::dictionary::Dictionary;
use crate::range::WrappedRange;
use crate::types::{div_ceil_i64, gcd, Complex, MpError, MpResult, PhaseConvention};

const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

/// Self-overlap between an atom and its conjugate partner.
///
/// Only present on kernels of a dictionary with itself.
#[derive(Debug, Clone)]
pub(crate) struct ConjPairTable {
    /// `<conj(g_m), g_m>` at frame 0, one per half-spectrum bin
    pub(crate) atprods: Vec<Complex>,
    /// `1 / (1 - |atprods[m]|^2)`
    pub(crate) oneover1minatprodnorms: Vec<f64>,
    /// Kernel row holding `atprods[m]`, if any
    rows: Vec<Option<usize>>,
}

/// Where one origin atom lands on a target dictionary's grid.
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    /// Target frames, wrapped modulo `N2`
    pub cols: WrappedRange,
    /// Kernel column of the first target frame
    pub col0: usize,
    /// Target channels over the full spectrum, wrapped modulo `M2`
    pub rows: WrappedRange,
    /// Kernel row of the first target channel
    pub row0: usize,
}

/// Precomputed inner products for one ordered dictionary pair.
#[derive(Debug, Clone)]
pub struct GramKernel {
    height: usize,
    width: usize,
    hmid: i64,
    wmid: i64,
    /// Common time step `ta`
    ta: usize,
    /// Common frequency step `fb`
    fb: usize,
    /// Kernel columns per target frame, `a2 / ta`
    astep: usize,
    /// Kernel rows per target channel, `(L/M2) / fb`
    mstep: usize,
    a1: usize,
    b1: usize,
    a2: usize,
    b2: usize,
    frames2: usize,
    channels2: usize,
    signal_len: usize,
    phase: PhaseConvention,
    vals: Vec<Complex>,
    /// Non-zero rows `[start, end)` per column
    col_rows: Vec<(usize, usize)>,
    k_no: usize,
    mods: Vec<Vec<Complex>>,
    conj_pair: Option<ConjPairTable>,
}

impl GramKernel {
    /// Compute the kernel between `d1` (origin) and `d2` (target).
    ///
    /// `pair` labels errors. Fails with [`MpError::EmptyKernel`] when no atom
    /// of `d2` overlaps an atom of `d1`.
    pub fn build(
        d1: &Dictionary,
        d2: &Dictionary,
        phase: PhaseConvention,
        rel_threshold: f64,
        pair: (usize, usize),
    ) -> MpResult<Self> {
        let l = d1.signal_len();
        if d2.signal_len() != l {
            return Err(MpError::LengthMismatch { expected: l, actual: d2.signal_len() });
        }
        let li = l as i64;
        let (a1, a2) = (d1.hop(), d2.hop());
        let (b1, b2) = (d1.freq_step(), d2.freq_step());
        let ta = gcd(a1, a2);
        let fb = gcd(b1, b2);
        let fperiod = l / fb;
        let tperiod = l / ta;

        let g1 = d1.window();
        let g2 = d2.window();
        let h1 = (g1.len() / 2) as i64;
        let h2 = (g2.len() / 2) as i64;
        let gl2 = g2.len() as i64;
        let g2_at = |u: i64| -> f64 {
            let j = (u + h2).rem_euclid(li);
            if j < gl2 {
                g2[j as usize]
            } else {
                0.0
            }
        };

        // Column range with possible overlap, one representative per class mod L
        let dmin = -((gl2 - h2 - 1) + h1);
        let dmax = (g1.len() as i64 - h1 - 1) + h2;
        let jmin = div_ceil_i64(dmin, ta as i64);
        let jmax = dmax.div_euclid(ta as i64);
        let jcount = ((jmax - jmin + 1).max(0) as usize).min(tperiod);

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fperiod);
        let mut scratch = vec![ZERO; fft.get_inplace_scratch_len()];

        let mut columns: Vec<Vec<Complex>> = Vec::with_capacity(jcount);
        let mut peak = 0.0f64;
        for jc in 0..jcount {
            let j = jmin + jc as i64;
            let dt = j * ta as i64;
            let mut buf = vec![ZERO; fperiod];
            for (idx, &v1) in g1.iter().enumerate() {
                let t = idx as i64 - h1;
                let p = v1 * g2_at(t - dt);
                if p != 0.0 {
                    buf[t.rem_euclid(fperiod as i64) as usize].re += p;
                }
            }
            fft.process_with_scratch(&mut buf, &mut scratch);

            if phase == PhaseConvention::TimeInvariant {
                let step = ((j.rem_euclid(tperiod as i64) as usize * ta) % l * fb) % l;
                for (k, v) in buf.iter_mut().enumerate() {
                    let e = (k * step) % l;
                    *v *= Complex::from_polar(1.0, 2.0 * PI * e as f64 / l as f64);
                }
            }
            peak = buf.iter().fold(peak, |acc, v| acc.max(v.norm()));
            columns.push(buf);
        }

        if peak == 0.0 {
            return Err(MpError::EmptyKernel(pair.0, pair.1));
        }
        let thr = rel_threshold * peak;
        let keep = |v: &Complex| {
            let n = v.norm();
            n > 0.0 && n >= thr
        };

        // Trim columns and rows to the significant rectangle
        let sig_cols: Vec<usize> = (0..jcount)
            .filter(|&jc| columns[jc].iter().any(keep))
            .collect();
        let (jlo, jhi) = match (sig_cols.first(), sig_cols.last()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => return Err(MpError::EmptyKernel(pair.0, pair.1)),
        };
        let half = (fperiod / 2) as i64;
        let centred = |k: usize| -> i64 {
            let k = k as i64;
            if k < fperiod as i64 - half {
                k
            } else {
                k - fperiod as i64
            }
        };
        let mut klo = i64::MAX;
        let mut khi = i64::MIN;
        for col in &columns[jlo..=jhi] {
            for (k, v) in col.iter().enumerate() {
                if keep(v) {
                    klo = klo.min(centred(k));
                    khi = khi.max(centred(k));
                }
            }
        }

        let width = jhi - jlo + 1;
        let height = (khi - klo + 1) as usize;
        let hmid = -klo;
        let wmid = -(jmin + jlo as i64);

        let mut vals = vec![ZERO; width * height];
        let mut col_rows = vec![(0usize, 0usize); width];
        for jj in 0..width {
            let col = &columns[jlo + jj];
            let mut first = None;
            let mut last = 0;
            for ii in 0..height {
                let k = (klo + ii as i64).rem_euclid(fperiod as i64) as usize;
                let v = col[k];
                if keep(&v) {
                    vals[jj * height + ii] = v;
                    first.get_or_insert(ii);
                    last = ii + 1;
                }
            }
            if let Some(f) = first {
                col_rows[jj] = (f, last);
            }
        }

        // Origin-dependent modulation
        let (k_no, mods) = match phase {
            PhaseConvention::FrequencyInvariant => {
                let step = (a1 * fb) % l;
                let k_no = l / gcd(step, l);
                let mods = (0..k_no)
                    .map(|r| {
                        let q = (r * step) % l;
                        (0..height)
                            .map(|ii| {
                                let e = (q as i64 * (ii as i64 - hmid)).rem_euclid(li);
                                Complex::from_polar(1.0, -2.0 * PI * e as f64 / l as f64)
                            })
                            .collect()
                    })
                    .collect();
                (k_no, mods)
            }
            PhaseConvention::TimeInvariant => {
                let step = (b1 * ta) % l;
                let k_no = l / gcd(step, l);
                let mods = (0..k_no)
                    .map(|r| {
                        let q = (r * step) % l;
                        (0..width)
                            .map(|jj| {
                                let e = (q as i64 * (jj as i64 - wmid)).rem_euclid(li);
                                Complex::from_polar(1.0, 2.0 * PI * e as f64 / l as f64)
                            })
                            .collect()
                    })
                    .collect();
                (k_no, mods)
            }
        };

        let mut kernel = Self {
            height,
            width,
            hmid,
            wmid,
            ta,
            fb,
            astep: a2 / ta,
            mstep: b2 / fb,
            a1,
            b1,
            a2,
            b2,
            frames2: d2.frames(),
            channels2: d2.channels(),
            signal_len: l,
            phase,
            vals,
            col_rows,
            k_no,
            mods,
            conj_pair: None,
        };

        if pair.0 == pair.1 {
            kernel.conj_pair = Some(kernel.conj_pair_table(d1, pair.0)?);
        }

        debug!(
            w1 = pair.0,
            w2 = pair.1,
            height,
            width,
            k_no,
            "kernel built"
        );
        Ok(kernel)
    }

    /// A kernel with no support: every overlap is zero.
    pub fn empty(d1: &Dictionary, d2: &Dictionary, phase: PhaseConvention) -> Self {
        let ta = gcd(d1.hop(), d2.hop());
        let fb = gcd(d1.freq_step(), d2.freq_step());
        Self {
            height: 0,
            width: 0,
            hmid: 0,
            wmid: 0,
            ta,
            fb,
            astep: d2.hop() / ta,
            mstep: d2.freq_step() / fb,
            a1: d1.hop(),
            b1: d1.freq_step(),
            a2: d2.hop(),
            b2: d2.freq_step(),
            frames2: d2.frames(),
            channels2: d2.channels(),
            signal_len: d1.signal_len(),
            phase,
            vals: Vec::new(),
            col_rows: Vec::new(),
            k_no: 1,
            mods: vec![Vec::new()],
            conj_pair: None,
        }
    }

    fn conj_pair_table(&self, d: &Dictionary, w: usize) -> MpResult<ConjPairTable> {
        let bins = d.bins();
        let mut atprods = vec![ZERO; bins];
        let mut inv = vec![1.0; bins];
        let mut rows = vec![None; bins];
        let jj = self.wmid;
        if jj < 0 || jj >= self.width as i64 {
            return Ok(ConjPairTable { atprods, oneover1minatprodnorms: inv, rows });
        }
        let jj = jj as usize;
        let fperiod = (self.signal_len / self.fb) as i64;
        for m in (0..bins).filter(|&m| d.has_conjugate(m)) {
            let ii = (2 * m as i64 + self.hmid).rem_euclid(fperiod);
            if ii >= self.height as i64 {
                continue;
            }
            let ii = ii as usize;
            let v = self.vals[jj * self.height + ii];
            if v == ZERO {
                continue;
            }
            let denom = 1.0 - v.norm_sqr();
            if denom < 1e-12 {
                return Err(MpError::NotAFrame {
                    index: w,
                    reason: format!("atom at bin {} is collinear with its conjugate", m),
                });
            }
            atprods[m] = v;
            inv[m] = 1.0 / denom;
            rows[m] = Some(ii);
        }
        Ok(ConjPairTable { atprods, oneover1minatprodnorms: inv, rows })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Raw stored entry at kernel row `ii`, column `jj`.
    pub fn value(&self, ii: usize, jj: usize) -> Complex {
        self.vals[jj * self.height + ii]
    }

    /// Largest number of target atoms one origin can reach.
    pub fn reach(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.width.div_ceil(self.astep).min(self.frames2)
            * self.height.div_ceil(self.mstep).min(self.channels2)
    }

    /// `<conj(g_m,n), g_m,n>` and `1 / (1 - |.|^2)` for a half-spectrum bin.
    ///
    /// Returns `(0, 1)` for bins without a conjugate partner or when the
    /// partner lies outside the kernel.
    #[inline]
    pub fn conj_atom_product(&self, m: usize, n: usize) -> (Complex, f64) {
        let table = match self.conj_pair {
            Some(ref t) if m < t.atprods.len() => t,
            _ => return (ZERO, 1.0),
        };
        let row = match table.rows[m] {
            Some(r) => r,
            None => return (ZERO, 1.0),
        };
        let mut a = table.atprods[m];
        if self.phase == PhaseConvention::FrequencyInvariant {
            a *= self.mods[n % self.k_no][row];
        }
        (a, table.oneover1minatprodnorms[m])
    }

    /// Map origin `(m1, n1)` onto the target grid.
    ///
    /// `m1` is a full-spectrum channel, so conjugate partners `M1 - m` are
    /// valid origins.
    pub fn footprint(&self, m1: usize, n1: usize) -> Footprint {
        if self.is_empty() {
            return Footprint {
                cols: WrappedRange::new(0, 0, self.frames2.max(1)),
                col0: 0,
                rows: WrappedRange::new(0, 0, self.channels2.max(1)),
                row0: 0,
            };
        }
        let (ta, fb) = (self.ta as i64, self.fb as i64);

        let t1 = (n1 * self.a1) as i64;
        let n_lo = div_ceil_i64(t1 - self.wmid * ta, self.a2 as i64);
        let col0 = ((n_lo * self.a2 as i64 - t1) / ta + self.wmid) as usize;
        let ncols = if col0 < self.width {
            (self.width - col0).div_ceil(self.astep)
        } else {
            0
        };

        let v1 = (m1 * self.b1) as i64;
        let m_lo = div_ceil_i64(v1 - self.hmid * fb, self.b2 as i64);
        let row0 = ((m_lo * self.b2 as i64 - v1) / fb + self.hmid) as usize;
        let nrows = if row0 < self.height {
            (self.height - row0).div_ceil(self.mstep)
        } else {
            0
        };

        Footprint {
            cols: WrappedRange::new(n_lo, ncols, self.frames2),
            col0,
            rows: WrappedRange::new(m_lo, nrows, self.channels2),
            row0,
        }
    }

    /// Inner product `<g1_(m1,n1), g2_(m2,n2)>` from the cache.
    ///
    /// `m1` and `m2` are full-spectrum channels; zero outside the kernel.
    pub fn overlap(&self, m1: usize, n1: usize, m2: usize, n2: usize) -> Complex {
        if self.is_empty() {
            return ZERO;
        }
        let l = self.signal_len as i64;
        let dt = (n2 * self.a2) as i64 - (n1 * self.a1) as i64;
        let jj = (dt.rem_euclid(l) / self.ta as i64 + self.wmid)
            .rem_euclid(l / self.ta as i64);
        let dv = (m2 * self.b2) as i64 - (m1 * self.b1) as i64;
        let ii = (dv.rem_euclid(l) / self.fb as i64 + self.hmid)
            .rem_euclid(l / self.fb as i64);
        if jj >= self.width as i64 || ii >= self.height as i64 {
            return ZERO;
        }
        let (ii, jj) = (ii as usize, jj as usize);
        let v = self.vals[jj * self.height + ii];
        if v == ZERO {
            return ZERO;
        }
        v * self.modulation(m1, n1, ii, jj)
    }

    #[inline]
    fn modulation(&self, m1: usize, n1: usize, ii: usize, jj: usize) -> Complex {
        match self.phase {
            PhaseConvention::FrequencyInvariant => self.mods[n1 % self.k_no][ii],
            PhaseConvention::TimeInvariant => self.mods[m1 % self.k_no][jj],
        }
    }

    /// Add `coef * <g1_(m1,n1), g2_(m2,n2)>` to every affected target
    /// coefficient on the half spectrum.
    ///
    /// `c2` is the target plane with `bins2` rows per frame. `mark(n2, lo, hi)`
    /// is called once per touched frame with the inclusive row span. Returns
    /// the number of coefficients written.
    pub fn accumulate<F>(
        &self,
        m1: usize,
        n1: usize,
        coef: Complex,
        c2: &mut [Complex],
        bins2: usize,
        mut mark: F,
    ) -> usize
    where
        F: FnMut(usize, usize, usize),
    {
        let fp = self.footprint(m1, n1);
        let mut written = 0;
        for (k, n2) in fp.cols.iter().enumerate() {
            let jj = fp.col0 + k * self.astep;
            let (rs, re) = self.col_rows[jj];
            if rs >= re {
                continue;
            }
            let colvals = &self.vals[jj * self.height..(jj + 1) * self.height];
            let colcoef = match self.phase {
                PhaseConvention::FrequencyInvariant => coef,
                PhaseConvention::TimeInvariant => coef * self.mods[m1 % self.k_no][jj],
            };
            let rowmods = &self.mods[n1 % self.k_no];
            let target = &mut c2[n2 * bins2..(n2 + 1) * bins2];

            let mut lo = usize::MAX;
            let mut hi = 0;
            for (q, m2) in fp.rows.iter().enumerate() {
                let ii = fp.row0 + q * self.mstep;
                if ii < rs || ii >= re || m2 >= bins2 {
                    continue;
                }
                let kv = colvals[ii];
                if kv == ZERO {
                    continue;
                }
                let v = match self.phase {
                    PhaseConvention::FrequencyInvariant => colcoef * kv * rowmods[ii],
                    PhaseConvention::TimeInvariant => colcoef * kv,
                };
                target[m2] += v;
                lo = lo.min(m2);
                hi = hi.max(m2);
                written += 1;
            }
            if lo <= hi {
                mark(n2, lo, hi);
            }
        }
        written
    }
}

/// Kernels for every ordered pair of dictionaries.
#[derive(Debug, Clone)]
pub struct KernelSet {
    count: usize,
    kernels: Vec<GramKernel>,
}

impl KernelSet {
    pub fn build(dicts: &[Dictionary], phase: PhaseConvention, rel_threshold: f64) -> MpResult<Self> {
        if dicts.is_empty() {
            return Err(MpError::NoDictionaries);
        }
        let p = dicts.len();
        let mut kernels = Vec::with_capacity(p * p);
        for (w1, d1) in dicts.iter().enumerate() {
            for (w2, d2) in dicts.iter().enumerate() {
                let k = match GramKernel::build(d1, d2, phase, rel_threshold, (w1, w2)) {
                    Ok(k) => k,
                    Err(MpError::EmptyKernel(a, b)) if a != b => {
                        warn!(w1 = a, w2 = b, "dictionaries share no support, overlaps treated as zero");
                        GramKernel::empty(d1, d2, phase)
                    }
                    Err(e) => return Err(e),
                };
                kernels.push(k);
            }
        }
        Ok(Self { count: p, kernels })
    }

    /// Number of dictionaries
    pub fn count(&self) -> usize {
        self.count
    }

    /// Kernel from origin dictionary `w1` into target dictionary `w2`.
    #[inline]
    pub fn get(&self, w1: usize, w2: usize) -> &GramKernel {
        &self.kernels[w1 * self.count + w2]
    }

    /// Bound on the number of atoms overlapping any single atom, itself included.
    pub fn neighbourhood_capacity(&self) -> usize {
        (0..self.count)
            .map(|w1| (0..self.count).map(|w2| self.get(w1, w2).reach()).sum::<usize>())
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Largest kernel block, `(height, width)`.
    pub fn max_size(&self) -> (usize, usize) {
        self.kernels
            .iter()
            .fold((0, 0), |acc, k| (acc.0.max(k.height), acc.1.max(k.width)))
    }
}
