//! # Multi-Gabor Matching Pursuit
//!
//! The engine that decomposes a real signal over a union of Gabor
//! dictionaries.
//!
//! ## Iteration
//!
//! ```text
//!   ┌──────────────┐   best (m, n, w)   ┌────────────┐
//!   │  PlaneMax    │ ─────────────────► │  project   │  x = dual of c
//!   │  (per dict)  │                    └─────┬──────┘
//!   └──────▲───────┘                          │ x
//!          │ dirty rows                       ▼
//!   ┌──────┴───────┐   x * <g, g'>      ┌────────────┐
//!   │ residual c   │ ◄───────────────── │ propagate  │  kernel cache
//!   └──────────────┘                    └────────────┘
//!                                        (+ locomp / cyclic refinement)
//! ```
//!
//! The residual field `c[w]` always holds `<r, g>` for every stored atom of
//! every dictionary, where `r` is the not yet explained part of the signal.
//! Selecting an atom only changes coefficients within the kernel support of
//! that atom, so an iteration costs `O(kernel size + log N)` regardless of
//! the signal length.
//!
//! ## Energy bookkeeping
//!
//! The residual energy is never recomputed from the signal. It starts at
//! `|f|^2` and each projection subtracts the energy it removed, accumulated
//! in an [`ExtendedAccumulator`] (double-double, about 106 bits).
//!
//! ## Example
//!
//! ```rust
//! use gabmp_core::prelude::*;
//!
//! let windows = [WindowSpec::fir(FirWindow::Blackman, 64, 16, 64)];
//! let params = PursuitParams::builder().max_atoms(50).build().unwrap();
//! let mut mp = Pursuit::new(&windows, 512, params).unwrap();
//!
//! let f: Vec<f64> = (0..512)
//!     .map(|l| (2.0 * std::f64::consts::PI * 10.0 * l as f64 / 64.0).cos())
//!     .collect();
//! let result = mp.execute(&f).unwrap();
//! assert!(result.summary.err_db < -3.0);
//! ```

mod cyclic;
mod locomp;
mod projection;
mod propagate;

pub use projection::{dual_product, proj_energy};

use std::fmt;
use tracing::{debug, info, trace, warn};

use crate::dgt::{energy, snr_db, DgtReal};
use crate::dictionary::{Dictionary, WindowSpec};
use crate::kernel::KernelSet;
use crate::maxtree::PlaneMax;
use crate::observe::{PursuitStats, StatsSnapshot};
use crate::params::{Algorithm, PursuitParams};
use crate::precision::ExtendedAccumulator;
use crate::solver::HermitianSolver;
use crate::types::{AtomPos, Complex, MpError, MpResult, Sample};

/// Outcome of one [`Pursuit::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PursuitStatus {
    /// An atom was selected; more can follow
    CanContinue,
    /// Residual energy fell below the tolerance
    ToleranceReached,
    /// The active atom budget is used up
    MaxAtomsReached,
    /// The iteration budget is used up
    MaxIterationsReached,
    /// Refinement increased the error, or a position hit the repeat limit
    Stalled,
    /// A local Gram system could not be solved; plain MP was used instead
    LocalOrthFailed,
    /// No coefficient exceeds the numerical floor
    AllZero,
}

impl PursuitStatus {
    /// Whether the run should stop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PursuitStatus::CanContinue | PursuitStatus::LocalOrthFailed)
    }
}

impl fmt::Display for PursuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PursuitStatus::CanContinue => "can continue",
            PursuitStatus::ToleranceReached => "tolerance reached",
            PursuitStatus::MaxAtomsReached => "max atoms reached",
            PursuitStatus::MaxIterationsReached => "max iterations reached",
            PursuitStatus::Stalled => "stalled",
            PursuitStatus::LocalOrthFailed => "local orthogonalization failed",
            PursuitStatus::AllZero => "all coefficients zero",
        };
        f.write_str(s)
    }
}

/// Progress report passed to the callback every `iter_step` iterations.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PursuitSnapshot {
    pub iteration: usize,
    pub atoms: usize,
    pub err_db: f64,
    pub status: PursuitStatus,
}

/// Numeric summary of a finished run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PursuitSummary {
    pub status: PursuitStatus,
    /// Residual energy relative to the signal energy
    pub err_db: f64,
    /// Distinct active atoms
    pub atoms: usize,
    pub iterations: usize,
    pub snr_db: f64,
    /// Soft local solver failures during the run
    pub local_failures: u64,
    pub stats: StatsSnapshot,
}

/// Everything [`Pursuit::execute`] produces.
#[derive(Debug, Clone)]
pub struct PursuitResult {
    /// Sparse coefficients, one plane per dictionary (`M2 x N`, by frame)
    pub coefficients: Vec<Vec<Complex>>,
    /// Synthesis of the coefficients
    pub approximation: Vec<Sample>,
    /// `f - approximation`
    pub residual: Vec<Sample>,
    pub summary: PursuitSummary,
}

/// Working state of one dictionary.
#[derive(Debug, Clone)]
pub(crate) struct Plane {
    /// Residual inner products
    pub(crate) c: Vec<Complex>,
    /// Accumulated atom coefficients
    pub(crate) cout: Vec<Complex>,
    /// Selection count per position
    pub(crate) support: Vec<u32>,
    pub(crate) max: PlaneMax,
    pub(crate) bins: usize,
}

impl Plane {
    fn new(d: &Dictionary) -> Self {
        let count = d.coefficient_count();
        Self {
            c: vec![Complex::new(0.0, 0.0); count],
            cout: vec![Complex::new(0.0, 0.0); count],
            support: vec![0; count],
            max: PlaneMax::new(d.bins(), d.frames()),
            bins: d.bins(),
        }
    }

    fn clear(&mut self) {
        self.c.iter_mut().for_each(|v| *v = Complex::new(0.0, 0.0));
        self.cout.iter_mut().for_each(|v| *v = Complex::new(0.0, 0.0));
        self.support.iter_mut().for_each(|s| *s = 0);
        self.max.mark_all_dirty();
    }
}

type ProgressCallback = Box<dyn FnMut(&PursuitSnapshot) + Send>;

/// Matching pursuit over a union of Gabor dictionaries.
pub struct Pursuit {
    dicts: Vec<Dictionary>,
    kernels: KernelSet,
    params: PursuitParams,
    planes: Vec<Plane>,
    dgts: Vec<DgtReal>,
    solver: Box<dyn HermitianSolver>,

    err: ExtendedAccumulator,
    energy0: f64,
    curratoms: usize,
    iterations: usize,
    max_atoms: usize,
    max_iterations: usize,

    /// Neighbourhood buffers, sized once from the kernel supports
    capacity: usize,
    cval_pos: Vec<AtomPos>,
    cvalinv_buf: Vec<Complex>,
    gram_buf: Vec<Complex>,
    p_buf: Vec<AtomPos>,

    stats: PursuitStats,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for Pursuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pursuit")
            .field("dictionaries", &self.dicts.len())
            .field("algorithm", &self.params.algorithm)
            .field("solver", &self.solver.name())
            .field("atoms", &self.curratoms)
            .field("iterations", &self.iterations)
            .field("err", &self.err)
            .finish()
    }
}

impl Pursuit {
    /// Build a pursuit from window descriptors over signals of length `signal_len`.
    pub fn new(windows: &[WindowSpec], signal_len: usize, params: PursuitParams) -> MpResult<Self> {
        let dicts = windows
            .iter()
            .enumerate()
            .map(|(w, spec)| spec.build(signal_len, w))
            .collect::<MpResult<Vec<_>>>()?;
        Self::with_dictionaries(dicts, params)
    }

    /// Build a pursuit from validated dictionaries.
    pub fn with_dictionaries(dicts: Vec<Dictionary>, params: PursuitParams) -> MpResult<Self> {
        params.validate()?;
        let first = dicts.first().ok_or(MpError::NoDictionaries)?;
        let l = first.signal_len();
        if let Some(d) = dicts.iter().find(|d| d.signal_len() != l) {
            return Err(MpError::LengthMismatch { expected: l, actual: d.signal_len() });
        }

        let kernels = KernelSet::build(&dicts, params.phase_conv, params.kernel_rel_threshold)?;
        let total: usize = dicts.iter().map(|d| d.coefficient_count()).sum();
        let capacity = kernels.neighbourhood_capacity().min(total).max(1);

        let planes = dicts.iter().map(Plane::new).collect();
        let dgts = dicts.iter().map(|d| DgtReal::new(d, params.phase_conv)).collect();
        let solver = params.solver.create();

        let (kh, kw) = kernels.max_size();
        info!(
            dictionaries = dicts.len(),
            signal_len = l,
            coefficients = total,
            kernel_height = kh,
            kernel_width = kw,
            capacity,
            algorithm = %params.algorithm,
            phase = %params.phase_conv,
            solver = solver.name(),
            "pursuit initialized"
        );

        Ok(Self {
            max_atoms: params.resolved_max_atoms(total),
            max_iterations: params.resolved_max_iterations(total),
            dicts,
            kernels,
            params,
            planes,
            dgts,
            solver,
            err: ExtendedAccumulator::new(0.0),
            energy0: 0.0,
            curratoms: 0,
            iterations: 0,
            capacity,
            cval_pos: Vec::with_capacity(capacity),
            cvalinv_buf: vec![Complex::new(0.0, 0.0); capacity],
            gram_buf: vec![Complex::new(0.0, 0.0); capacity * capacity],
            p_buf: Vec::with_capacity(capacity),
            stats: PursuitStats::new(),
            callback: None,
        })
    }

    /// Install a progress callback invoked every `iter_step` iterations.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&PursuitSnapshot) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn dictionaries(&self) -> &[Dictionary] {
        &self.dicts
    }

    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    pub fn params(&self) -> &PursuitParams {
        &self.params
    }

    pub fn signal_len(&self) -> usize {
        self.dicts[0].signal_len()
    }

    /// Distinct active atoms
    pub fn atoms(&self) -> usize {
        self.curratoms
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Tracked residual energy.
    pub fn residual_energy(&self) -> f64 {
        self.err.value()
    }

    /// Residual energy relative to the initial energy in dB.
    pub fn err_db(&self) -> f64 {
        self.err.db_relative_to(self.energy0)
    }

    /// Current residual inner products of dictionary `w`.
    pub fn residual_coefficients(&self, w: usize) -> &[Complex] {
        &self.planes[w].c
    }

    /// Accumulated atom coefficients of dictionary `w`.
    pub fn coefficients(&self, w: usize) -> &[Complex] {
        &self.planes[w].cout
    }

    /// Selection count of one position.
    pub fn support(&self, pos: AtomPos) -> u32 {
        self.planes[pos.w].support[self.dicts[pos.w].index(pos.m, pos.n)]
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drop all coefficients and counters; kernels are kept.
    pub fn reset(&mut self) {
        for p in &mut self.planes {
            p.clear();
        }
        self.err = ExtendedAccumulator::new(0.0);
        self.energy0 = 0.0;
        self.curratoms = 0;
        self.iterations = 0;
        self.cval_pos.clear();
        self.p_buf.clear();
        self.stats.reset();
    }

    /// Load a signal: analyse it with every dictionary and reset the state.
    pub fn prepare(&mut self, f: &[Sample]) -> MpResult<()> {
        let l = self.signal_len();
        if f.len() != l {
            return Err(MpError::LengthMismatch { expected: l, actual: f.len() });
        }
        self.reset();
        for (dgt, plane) in self.dgts.iter_mut().zip(self.planes.iter_mut()) {
            dgt.analysis(f, &mut plane.c)?;
        }
        self.energy0 = energy(f);
        self.err = ExtendedAccumulator::new(self.energy0);
        Ok(())
    }

    /// Load a residual field computed elsewhere together with the signal energy.
    pub fn prepare_coefficients(&mut self, coefficients: &[Vec<Complex>], signal_energy: f64) -> MpResult<()> {
        if coefficients.len() != self.dicts.len() {
            return Err(MpError::LengthMismatch {
                expected: self.dicts.len(),
                actual: coefficients.len(),
            });
        }
        for (d, c) in self.dicts.iter().zip(coefficients) {
            if c.len() != d.coefficient_count() {
                return Err(MpError::LengthMismatch { expected: d.coefficient_count(), actual: c.len() });
            }
        }
        if !(signal_energy.is_finite() && signal_energy >= 0.0) {
            return Err(MpError::InvalidParameter(format!(
                "signal energy must be finite and >= 0 (got {})",
                signal_energy
            )));
        }
        self.reset();
        for (plane, c) in self.planes.iter_mut().zip(coefficients) {
            plane.c.copy_from_slice(c);
        }
        self.energy0 = signal_energy;
        self.err = ExtendedAccumulator::new(signal_energy);
        Ok(())
    }

    /// Decompose `f` until a stopping condition is met.
    pub fn execute(&mut self, f: &[Sample]) -> MpResult<PursuitResult> {
        self.prepare(f)?;
        let status = self.run();

        let approximation = self.synthesize()?;
        let residual: Vec<Sample> = f.iter().zip(&approximation).map(|(a, b)| a - b).collect();
        let summary = self.summary(status, snr_db(f, &approximation));
        info!(
            status = %summary.status,
            err_db = summary.err_db,
            atoms = summary.atoms,
            iterations = summary.iterations,
            snr_db = summary.snr_db,
            "pursuit finished"
        );

        Ok(PursuitResult {
            coefficients: self.planes.iter().map(|p| p.cout.clone()).collect(),
            approximation,
            residual,
            summary,
        })
    }

    /// Run on a caller-supplied residual field; read the result with
    /// [`coefficients`](Self::coefficients).
    pub fn execute_coefficients(
        &mut self,
        coefficients: &[Vec<Complex>],
        signal_energy: f64,
    ) -> MpResult<PursuitSummary> {
        self.prepare_coefficients(coefficients, signal_energy)?;
        let status = self.run();
        let summary = self.summary(status, -self.err_db());
        info!(
            status = %summary.status,
            err_db = summary.err_db,
            atoms = summary.atoms,
            iterations = summary.iterations,
            "pursuit finished"
        );
        Ok(summary)
    }

    /// Synthesize the current approximation from all dictionaries.
    pub fn synthesize(&mut self) -> MpResult<Vec<Sample>> {
        let l = self.signal_len();
        let mut out = vec![0.0; l];
        let mut tmp = vec![0.0; l];
        for (dgt, plane) in self.dgts.iter_mut().zip(self.planes.iter()) {
            dgt.synthesis(&plane.cout, &mut tmp)?;
            for (o, t) in out.iter_mut().zip(&tmp) {
                *o += t;
            }
        }
        Ok(out)
    }

    fn run(&mut self) -> PursuitStatus {
        loop {
            let status = self.step();
            if status.is_terminal() {
                return status;
            }
        }
    }

    fn summary(&self, status: PursuitStatus, snr: f64) -> PursuitSummary {
        let stats = self.stats.snapshot();
        PursuitSummary {
            status,
            err_db: self.err_db(),
            atoms: self.curratoms,
            iterations: self.iterations,
            snr_db: snr,
            local_failures: stats.local_failures,
            stats,
        }
    }

    /// One outer iteration: check budgets, select, project, refine.
    pub fn step(&mut self) -> PursuitStatus {
        if self.curratoms >= self.max_atoms {
            return PursuitStatus::MaxAtomsReached;
        }
        if self.iterations >= self.max_iterations {
            return PursuitStatus::MaxIterationsReached;
        }
        if self.energy0 > 0.0 && self.err_db() <= self.params.err_tol_db {
            return PursuitStatus::ToleranceReached;
        }

        let pos = match self.find_max() {
            Some((v, pos)) if v > self.params.energy_floor => pos,
            _ => return PursuitStatus::AllZero,
        };
        let idx = self.dicts[pos.w].index(pos.m, pos.n);
        let count = self.planes[pos.w].support[idx];
        if count as usize >= self.params.local_repeat_limit {
            warn!(%pos, count, iteration = self.iterations, "position exceeded repeat limit");
            self.stats.stalls.inc();
            return PursuitStatus::Stalled;
        }

        self.iterations += 1;
        self.stats.iterations.inc();
        if count == 0 {
            self.curratoms += 1;
        }
        trace!(%pos, iteration = self.iterations, "atom selected");

        let status = match self.params.algorithm {
            Algorithm::Mp => self.mp_step(pos),
            Algorithm::LocOmp => self.locomp(pos),
            Algorithm::CyclicMp if self.params.cycles > 0 => self.cyclicmp(pos),
            Algorithm::CyclicMp => self.mp_step(pos),
        };

        if self.iterations % self.params.iter_step == 0 {
            let snapshot = PursuitSnapshot {
                iteration: self.iterations,
                atoms: self.curratoms,
                err_db: self.err_db(),
                status,
            };
            debug!(
                iteration = snapshot.iteration,
                atoms = snapshot.atoms,
                err_db = snapshot.err_db,
                "progress"
            );
            if let Some(cb) = self.callback.as_mut() {
                cb(&snapshot);
            }
        }
        status
    }

    fn mp_step(&mut self, pos: AtomPos) -> PursuitStatus {
        let cval = self.planes[pos.w].c[self.dicts[pos.w].index(pos.m, pos.n)];
        let e = self.project(pos, cval);
        self.err.sub(e);
        PursuitStatus::CanContinue
    }

    /// Largest residual coefficient over all dictionaries.
    ///
    /// Ties go to the lowest dictionary index.
    pub fn find_max(&mut self) -> Option<(f64, AtomPos)> {
        let mut best: Option<(f64, AtomPos)> = None;
        for (w, plane) in self.planes.iter_mut().enumerate() {
            let (v, m, n) = plane.max.find_max(&plane.c);
            if best.map_or(true, |(bv, _)| v > bv) {
                best = Some((v, AtomPos::new(m, n, w)));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PursuitParamsBuilder;
    use crate::solver::SolverError;
    use crate::types::PhaseConvention;
    use crate::windows::FirWindow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const L: usize = 192;

    fn two_dicts() -> Vec<WindowSpec> {
        vec![
            WindowSpec::fir(FirWindow::Hann, 32, 8, 32),
            WindowSpec::fir(FirWindow::Blackman, 48, 12, 48),
        ]
    }

    fn noise(len: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..len).map(|_| normal.sample(&mut rng)).collect()
    }

    fn tone(len: usize, bin: f64, channels: usize) -> Vec<f64> {
        (0..len)
            .map(|l| (2.0 * PI * bin * l as f64 / channels as f64).cos())
            .collect()
    }

    /// Untruncated kernels and no early stop, so the tracked error is exact.
    fn exact(algorithm: Algorithm) -> PursuitParamsBuilder {
        PursuitParams::builder()
            .algorithm(algorithm)
            .kernel_rel_threshold(0.0)
            .err_tol_db(-300.0)
            .local_repeat_limit(1_000_000)
    }

    fn direct_residual_energy(mp: &mut Pursuit, f: &[f64]) -> f64 {
        let approx = mp.synthesize().unwrap();
        f.iter().zip(&approx).map(|(a, b)| (a - b) * (a - b)).sum()
    }

    fn brute_force_max(mp: &Pursuit) -> (f64, AtomPos) {
        let mut best = (-1.0, AtomPos::default());
        for (w, plane) in mp.planes.iter().enumerate() {
            for (i, v) in plane.c.iter().enumerate() {
                if v.norm_sqr() > best.0 {
                    best = (v.norm_sqr(), AtomPos::new(i % plane.bins, i / plane.bins, w));
                }
            }
        }
        best
    }

    #[derive(Debug)]
    struct FailingSolver;

    impl HermitianSolver for FailingSolver {
        fn solve(&mut self, _gram: &[Complex], n: usize, _rhs: &mut [Complex]) -> Result<(), SolverError> {
            Err(SolverError::NotPositiveDefinite(n))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            Pursuit::new(&[], L, PursuitParams::default()),
            Err(MpError::NoDictionaries)
        ));
        assert!(matches!(
            Pursuit::new(&two_dicts(), 200, PursuitParams::default()),
            Err(MpError::BadSignalLength { .. })
        ));

        let a = Dictionary::from_fir(FirWindow::Hann, 32, 8, 32, 192, 0).unwrap();
        let b = Dictionary::from_fir(FirWindow::Hann, 32, 8, 32, 256, 1).unwrap();
        assert!(matches!(
            Pursuit::with_dictionaries(vec![a, b], PursuitParams::default()),
            Err(MpError::LengthMismatch { expected: 192, actual: 256 })
        ));

        let mut mp = Pursuit::new(&two_dicts(), L, PursuitParams::default()).unwrap();
        assert!(matches!(
            mp.execute(&[0.0; 100]),
            Err(MpError::LengthMismatch { expected: 192, actual: 100 })
        ));
    }

    #[test]
    fn test_energy_accounting_mp() {
        for phase in [PhaseConvention::FrequencyInvariant, PhaseConvention::TimeInvariant] {
            let f = noise(L, 7);
            let params = exact(Algorithm::Mp).phase_conv(phase).max_atoms(60).build().unwrap();
            let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
            let result = mp.execute(&f).unwrap();
            assert_eq!(result.summary.status, PursuitStatus::MaxAtomsReached);

            let e0 = energy(&f);
            let direct = direct_residual_energy(&mut mp, &f);
            assert!(
                (mp.residual_energy() - direct).abs() < 1e-9 * e0,
                "{:?}: tracked {} direct {}",
                phase,
                mp.residual_energy(),
                direct
            );
            let residual_energy: f64 = result.residual.iter().map(|r| r * r).sum();
            assert!((residual_energy - direct).abs() < 1e-12 * e0);
        }
    }

    #[test]
    fn test_energy_accounting_cyclic() {
        let f = noise(L, 11);
        let params = exact(Algorithm::CyclicMp).cycles(2).max_atoms(40).build().unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let result = mp.execute(&f).unwrap();

        let direct = direct_residual_energy(&mut mp, &f);
        assert!((mp.residual_energy() - direct).abs() < 1e-9 * energy(&f));
        assert!(result.summary.stats.cyclic_passes > 0);
        assert!(result.summary.atoms <= 40);
    }

    #[test]
    fn test_err_is_monotone_for_mp() {
        let f = noise(L, 3);
        let params = PursuitParams::builder().max_atoms(100).local_repeat_limit(1000).build().unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        mp.prepare(&f).unwrap();
        let e0 = energy(&f);

        let mut last = mp.residual_energy();
        while !mp.step().is_terminal() {
            let now = mp.residual_energy();
            assert!(now <= last + 1e-12 * e0, "err rose from {} to {}", last, now);
            last = now;
        }
    }

    #[test]
    fn test_cyclic_without_passes_is_mp() {
        let f = noise(L, 41);
        let base = PursuitParams::builder().max_atoms(30).local_repeat_limit(1000);
        let mut plain = Pursuit::new(&two_dicts(), L, base.build().unwrap()).unwrap();
        let mut cyclic = Pursuit::new(
            &two_dicts(),
            L,
            PursuitParams::builder()
                .algorithm(Algorithm::CyclicMp)
                .cycles(0)
                .max_atoms(30)
                .local_repeat_limit(1000)
                .build()
                .unwrap(),
        )
        .unwrap();

        plain.prepare(&f).unwrap();
        cyclic.prepare(&f).unwrap();
        let mut last = cyclic.residual_energy();
        loop {
            let a = plain.step();
            let b = cyclic.step();
            assert_eq!(a, b);
            assert_eq!(plain.residual_energy(), cyclic.residual_energy());
            assert!(cyclic.residual_energy() <= last);
            last = cyclic.residual_energy();
            if a.is_terminal() {
                break;
            }
        }
        assert_eq!(cyclic.stats().cyclic_passes, 0);
    }

    #[test]
    fn test_maxtree_agrees_with_scan() {
        let f = noise(L, 5);
        let params = PursuitParams::builder().max_atoms(200).local_repeat_limit(1000).build().unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        mp.prepare(&f).unwrap();
        for _ in 0..30 {
            let (bv, bpos) = brute_force_max(&mp);
            let (v, pos) = mp.find_max().unwrap();
            assert_eq!(v, bv);
            assert_eq!(pos, bpos);
            mp.step();
        }
    }

    #[test]
    fn test_remove_undoes_project() {
        let f = noise(L, 9);
        let mut mp = Pursuit::new(&two_dicts(), L, PursuitParams::default()).unwrap();
        mp.prepare(&f).unwrap();
        let before: Vec<Vec<Complex>> = mp.planes.iter().map(|p| p.c.clone()).collect();

        let (_, pos) = mp.find_max().unwrap();
        let cval = mp.residual_coefficients(pos.w)[mp.dicts[pos.w].index(pos.m, pos.n)];
        let removed = mp.project(pos, cval);
        assert_eq!(mp.support(pos), 1);
        assert!(removed > 0.0);

        let restored = mp.remove(pos);
        assert!((removed - restored).abs() < 1e-10 * removed);
        assert_eq!(mp.support(pos), 0);
        for (plane, orig) in mp.planes.iter().zip(&before) {
            assert!(plane.cout.iter().all(|v| *v == Complex::new(0.0, 0.0)));
            for (a, b) in plane.c.iter().zip(orig) {
                assert!((a - b).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_update_stays_inside_kernel_support() {
        let f = noise(L, 13);
        let mut mp = Pursuit::new(&two_dicts(), L, PursuitParams::default()).unwrap();
        mp.prepare(&f).unwrap();
        let before: Vec<Vec<Complex>> = mp.planes.iter().map(|p| p.c.clone()).collect();

        let pos = AtomPos::new(5, 7, 0);
        let cval = mp.residual_coefficients(0)[mp.dicts[0].index(5, 7)];
        mp.project(pos, cval);

        let m_mirror = mp.dicts[0].channels() - pos.m;
        for (w2, (plane, orig)) in mp.planes.iter().zip(&before).enumerate() {
            let kernel = mp.kernels.get(0, w2);
            let mut touched = 0;
            for (i, (a, b)) in plane.c.iter().zip(orig).enumerate() {
                if a == b {
                    continue;
                }
                touched += 1;
                let (m2, n2) = (i % plane.bins, i / plane.bins);
                let reach = kernel.overlap(pos.m, pos.n, m2, n2) != Complex::new(0.0, 0.0)
                    || kernel.overlap(m_mirror, pos.n, m2, n2) != Complex::new(0.0, 0.0);
                assert!(reach, "w2={} (m={}, n={}) changed outside the kernel", w2, m2, n2);
            }
            assert!(touched > 0);
            assert!(touched < plane.c.len());
        }
    }

    #[test]
    fn test_single_tone_selects_its_bin() {
        let windows = [WindowSpec::fir(FirWindow::Hann, 64, 16, 64)];
        let mut mp = Pursuit::new(&windows, 1024, PursuitParams::default()).unwrap();
        let f = tone(1024, 10.0, 64);
        mp.prepare(&f).unwrap();

        let bins = mp.dictionaries()[0].bins();
        let c = mp.residual_coefficients(0);
        for n in 0..mp.dictionaries()[0].frames() {
            let col = &c[n * bins..(n + 1) * bins];
            let best = (0..bins)
                .max_by(|&a, &b| col[a].norm_sqr().total_cmp(&col[b].norm_sqr()))
                .unwrap();
            assert_eq!(best, 10, "frame {}", n);
        }

        let e0 = energy(&f);
        assert_eq!(mp.step(), PursuitStatus::CanContinue);
        let chosen: Vec<usize> = mp
            .coefficients(0)
            .iter()
            .enumerate()
            .filter(|(_, v)| v.norm() > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0] % bins, 10);
        assert!(mp.residual_coefficients(0)[chosen[0]].norm_sqr() < 1e-10 * e0);
        assert!(mp.residual_energy() < e0);
    }

    #[test]
    fn test_tone_reaches_tolerance() {
        let windows = [WindowSpec::fir(FirWindow::Blackman, 64, 16, 64)];
        let params = PursuitParams::builder()
            .err_tol_db(-30.0)
            .local_repeat_limit(1000)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&windows, 512, params).unwrap();
        let result = mp.execute(&tone(512, 6.0, 64)).unwrap();
        assert_eq!(result.summary.status, PursuitStatus::ToleranceReached);
        assert!(result.summary.err_db <= -30.0);
        assert!(result.summary.snr_db > 25.0);
    }

    #[test]
    fn test_budgets_stop_the_run() {
        let f = noise(L, 17);
        let params = PursuitParams::builder().max_atoms(5).build().unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let summary = mp.execute(&f).unwrap().summary;
        assert_eq!(summary.status, PursuitStatus::MaxAtomsReached);
        assert_eq!(summary.atoms, 5);

        let params = PursuitParams::builder().max_iterations(3).build().unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let summary = mp.execute(&f).unwrap().summary;
        assert_eq!(summary.status, PursuitStatus::MaxIterationsReached);
        assert_eq!(summary.iterations, 3);
    }

    #[test]
    fn test_zero_signal() {
        let mut mp = Pursuit::new(&two_dicts(), L, PursuitParams::default()).unwrap();
        let result = mp.execute(&vec![0.0; L]).unwrap();
        assert_eq!(result.summary.status, PursuitStatus::AllZero);
        assert_eq!(result.summary.atoms, 0);
        assert!(result.approximation.iter().all(|v| *v == 0.0));

        // Stepping without a loaded signal finds nothing either
        let mut mp = Pursuit::new(&two_dicts(), L, PursuitParams::default()).unwrap();
        assert_eq!(mp.step(), PursuitStatus::AllZero);
    }

    #[test]
    fn test_repeat_limit_stalls() {
        let windows = [WindowSpec::fir(FirWindow::Hann, 32, 8, 32)];
        let params = PursuitParams::builder()
            .err_tol_db(-300.0)
            .local_repeat_limit(1)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&windows, L, params).unwrap();
        let summary = mp.execute(&tone(L, 4.5, 32)).unwrap().summary;
        assert_eq!(summary.status, PursuitStatus::Stalled);
        assert_eq!(summary.stats.stalls, 1);
    }

    #[test]
    fn test_locomp_runs() {
        let f = noise(L, 21);
        let params = PursuitParams::builder()
            .algorithm(Algorithm::LocOmp)
            .max_atoms(60)
            .local_repeat_limit(1000)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let result = mp.execute(&f).unwrap();
        let stats = result.summary.stats;
        assert!(stats.local_solves > stats.local_failures);
        assert!(result.summary.err_db < -1.0);

        let e0 = energy(&f);
        let direct = direct_residual_energy(&mut mp, &f);
        assert!(
            (mp.residual_energy() - direct).abs() < 1e-3 * e0,
            "tracked {} direct {}",
            mp.residual_energy(),
            direct
        );
    }

    #[test]
    fn test_locomp_zeroes_refitted_neighbourhood() {
        let windows = [WindowSpec::fir(FirWindow::Hann, 64, 16, 64)];
        let params = PursuitParams::builder()
            .algorithm(Algorithm::LocOmp)
            .max_atoms(150)
            .local_repeat_limit(1000)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&windows, 512, params).unwrap();
        mp.prepare(&noise(512, 37)).unwrap();
        let bins = mp.dictionaries()[0].bins();

        let mut checked = 0;
        loop {
            let before = mp.planes[0].c.clone();
            let prev = mp.stats();
            if mp.step().is_terminal() {
                break;
            }
            let now = mp.stats();
            if now.local_solves == prev.local_solves || now.local_failures > prev.local_failures {
                continue;
            }
            let refitted = &mp.cval_pos;
            assert!(refitted.len() > 1);
            // Pairs near DC or Nyquist keep a conjugate cross term the solve ignores
            if refitted.iter().any(|p| p.m < 4 || p.m + 5 > bins) {
                continue;
            }
            let b_max = refitted
                .iter()
                .map(|p| before[p.index(bins)].norm())
                .fold(0.0, f64::max);
            for p in refitted.iter() {
                let r = mp.residual_coefficients(0)[p.index(bins)].norm();
                assert!(r < 1e-2 * b_max, "{} kept {} of {}", p, r, b_max);
            }
            checked += 1;
        }
        assert!(checked > 0);
        assert!(mp.stats().local_solves > mp.stats().local_failures);
    }

    #[test]
    fn test_cyclic_reselection_prefers_magnitude() {
        let windows = [WindowSpec::fir(FirWindow::Hann, 32, 8, 32)];
        let origin = AtomPos::new(5, 0, 0);
        let neighbour = AtomPos::new(5, 2, 0);
        let dc = AtomPos::new(0, 12, 0);

        // Two overlapping pair atoms plus a DC atom far away from both; the
        // neighbour is already in the approximation.
        let load = |dc_coef: f64| {
            let params = PursuitParams::builder().algorithm(Algorithm::CyclicMp).build().unwrap();
            let mut mp = Pursuit::new(&windows, L, params).unwrap();
            let d = &mp.dicts[0];
            let (io, ib, id) = (
                d.index(origin.m, origin.n),
                d.index(neighbour.m, neighbour.n),
                d.index(dc.m, dc.n),
            );
            mp.planes[0].cout[io] = Complex::new(1.0, 0.0);
            mp.planes[0].cout[ib] = Complex::new(0.6, 0.5);
            mp.planes[0].cout[id] = Complex::new(dc_coef, 0.0);
            let f = mp.synthesize().unwrap();
            mp.prepare(&f).unwrap();

            let cval = mp.planes[0].c[ib];
            let e = mp.project(neighbour, cval);
            mp.err.sub(e);
            mp.curratoms += 1;
            (mp, f)
        };

        let (mut mp, _) = load(0.0);
        mp.mp_step(origin);
        let inc = mp.remove(neighbour);
        let (v, _) = mp.find_max().unwrap();
        assert!(v < inc, "largest |c|^2 {} vs pair energy {}", v, inc);

        // DC atom between the two: it wins the selection but removes less
        let (mut mp, f) = load(((v + inc) / 2.0).sqrt());
        let e0 = energy(&f);
        assert_eq!(mp.cyclicmp(origin), PursuitStatus::Stalled);
        assert_eq!(mp.stats().stalls, 1);
        assert_eq!(mp.p_buf[1], dc);
        assert_eq!(mp.support(dc), 1);
        assert_eq!(mp.support(neighbour), 0);

        let direct = direct_residual_energy(&mut mp, &f);
        assert!((mp.residual_energy() - direct).abs() < 1e-3 * e0);
    }

    #[test]
    fn test_locomp_solver_failure_is_soft() {
        let f = noise(L, 23);
        let params = PursuitParams::builder()
            .algorithm(Algorithm::LocOmp)
            .max_atoms(60)
            .local_repeat_limit(1000)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        mp.solver = Box::new(FailingSolver);
        mp.prepare(&f).unwrap();

        let mut failed = 0u64;
        loop {
            let status = mp.step();
            if status == PursuitStatus::LocalOrthFailed {
                failed += 1;
                assert!(!status.is_terminal());
            }
            if status.is_terminal() {
                assert_eq!(status, PursuitStatus::MaxAtomsReached);
                break;
            }
        }
        assert!(failed > 0);
        assert_eq!(mp.stats().local_failures, failed);
        assert_eq!(mp.stats().local_solves, failed);
    }

    #[test]
    fn test_stub_solver_locomp() {
        let f = noise(L, 29);
        let params = exact(Algorithm::LocOmp)
            .kernel_rel_threshold(1e-4)
            .solver(crate::solver::SolverKind::Stub)
            .max_atoms(40)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let summary = mp.execute(&f).unwrap().summary;
        assert_eq!(summary.local_failures, 0);
        assert!(summary.atoms <= 40);
    }

    #[test]
    fn test_execute_coefficients_matches_execute() {
        let f = noise(L, 31);
        let params = PursuitParams::builder().max_atoms(25).build().unwrap();
        let mut a = Pursuit::new(&two_dicts(), L, params.clone()).unwrap();
        let result = a.execute(&f).unwrap();

        let mut b = Pursuit::new(&two_dicts(), L, params).unwrap();
        let mut fields = Vec::new();
        for d in b.dictionaries() {
            let mut c = vec![Complex::new(0.0, 0.0); d.coefficient_count()];
            DgtReal::new(d, PhaseConvention::FrequencyInvariant).analysis(&f, &mut c).unwrap();
            fields.push(c);
        }
        let summary = b.execute_coefficients(&fields, energy(&f)).unwrap();
        assert_eq!(summary.atoms, result.summary.atoms);
        assert_eq!(summary.iterations, result.summary.iterations);
        for (w, coefs) in result.coefficients.iter().enumerate() {
            assert_eq!(b.coefficients(w), coefs.as_slice());
        }

        assert!(matches!(
            b.execute_coefficients(&fields[..1], 1.0),
            Err(MpError::LengthMismatch { .. })
        ));
        assert!(b.execute_coefficients(&fields, f64::NAN).is_err());
    }

    #[test]
    fn test_callback_and_reset() {
        let f = noise(L, 37);
        let params = PursuitParams::builder()
            .max_atoms(20)
            .iter_step(5)
            .local_repeat_limit(1000)
            .build()
            .unwrap();
        let mut mp = Pursuit::new(&two_dicts(), L, params).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        mp.set_callback(move |snap| {
            assert_eq!(snap.iteration % 5, 0);
            seen.fetch_add(1, Ordering::Relaxed);
        });
        let summary = mp.execute(&f).unwrap().summary;
        assert_eq!(calls.load(Ordering::Relaxed), summary.iterations / 5);

        mp.reset();
        assert_eq!(mp.atoms(), 0);
        assert_eq!(mp.iterations(), 0);
        assert_eq!(mp.stats().iterations, 0);
        assert!(mp.coefficients(1).iter().all(|v| *v == Complex::new(0.0, 0.0)));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!PursuitStatus::CanContinue.is_terminal());
        assert!(!PursuitStatus::LocalOrthFailed.is_terminal());
        for s in [
            PursuitStatus::ToleranceReached,
            PursuitStatus::MaxAtomsReached,
            PursuitStatus::MaxIterationsReached,
            PursuitStatus::Stalled,
            PursuitStatus::AllZero,
        ] {
            assert!(s.is_terminal(), "{}", s);
        }
    }
}
