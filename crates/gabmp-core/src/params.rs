//! Pursuit Parameters
//!
//! Tunables of the matching pursuit engine.
//!
//! ## Algorithms
//!
//! | Algorithm  | Per iteration                                             |
//! |------------|-----------------------------------------------------------|
//! | `Mp`       | project the best atom, update the residual                |
//! | `LocOmp`   | also re-fit every active atom overlapping the new one     |
//! | `CyclicMp` | also revisit overlapping active atoms and re-select them  |
//!
//! ## Stopping
//!
//! The pursuit stops at whichever comes first: the residual energy drops
//! below `err_tol_db` relative to the signal energy, `max_atoms` distinct
//! atoms are active, or `max_iterations` iterations ran.
//!
//! ```rust
//! use gabmp_core::params::{Algorithm, PursuitParams};
//!
//! let params = PursuitParams::builder()
//!     .algorithm(Algorithm::CyclicMp)
//!     .err_tol_db(-60.0)
//!     .max_atoms(500)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.resolved_max_iterations(10_000), 1000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::solver::SolverKind;
use crate::types::{MpError, MpResult, PhaseConvention};

/// Pursuit variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Plain matching pursuit
    Mp,
    /// Local orthogonal matching pursuit
    LocOmp,
    /// Cyclic matching pursuit
    ///
    /// Re-selection picks the largest `|c|^2`, not the largest energy
    /// decrease. A DC or Nyquist atom removes only `|c|^2` while a
    /// conjugate-pair atom removes about `2|c|^2`, so a pass can swap a pair
    /// atom for a slightly larger real one and raise the error. The run then
    /// ends with [`PursuitStatus::Stalled`](crate::pursuit::PursuitStatus::Stalled),
    /// usually well above the tolerance.
    CyclicMp,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Mp
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Mp => write!(f, "mp"),
            Algorithm::LocOmp => write!(f, "locomp"),
            Algorithm::CyclicMp => write!(f, "cyclicmp"),
        }
    }
}

/// Parameters of one pursuit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PursuitParams {
    pub phase_conv: PhaseConvention,
    pub algorithm: Algorithm,
    /// Target residual energy relative to the signal, in dB
    pub err_tol_db: f64,
    /// Maximum number of distinct active atoms; `None` means all coefficients
    pub max_atoms: Option<usize>,
    /// Maximum outer iterations; `None` means twice `max_atoms`
    pub max_iterations: Option<usize>,
    /// Progress snapshot interval in iterations
    pub iter_step: usize,
    /// Refinement passes per iteration for `CyclicMp`; 0 disables refinement
    pub cycles: usize,
    /// Kernel entries below this fraction of the peak are dropped
    pub kernel_rel_threshold: f64,
    /// Number of times one position may be selected before the run stalls
    pub local_repeat_limit: usize,
    pub solver: SolverKind,
    /// Squared magnitudes at or below this count as zero
    pub energy_floor: f64,
}

impl Default for PursuitParams {
    fn default() -> Self {
        Self {
            phase_conv: PhaseConvention::FrequencyInvariant,
            algorithm: Algorithm::Mp,
            err_tol_db: -40.0,
            max_atoms: None,
            max_iterations: None,
            iter_step: 100,
            cycles: 1,
            kernel_rel_threshold: 1e-4,
            local_repeat_limit: 10,
            solver: SolverKind::Cholesky,
            energy_floor: 1e-20,
        }
    }
}

impl PursuitParams {
    pub fn builder() -> PursuitParamsBuilder {
        PursuitParamsBuilder::default()
    }

    /// Check value ranges.
    pub fn validate(&self) -> MpResult<()> {
        if let Some(0) = self.max_atoms {
            return Err(MpError::NotPositive { name: "max_atoms", value: 0 });
        }
        if let Some(0) = self.max_iterations {
            return Err(MpError::NotPositive { name: "max_iterations", value: 0 });
        }
        if self.iter_step == 0 {
            return Err(MpError::NotPositive { name: "iter_step", value: 0 });
        }
        if self.local_repeat_limit == 0 {
            return Err(MpError::NotPositive { name: "local_repeat_limit", value: 0 });
        }
        if !self.err_tol_db.is_finite() || self.err_tol_db > 0.0 {
            return Err(MpError::InvalidParameter(format!(
                "err_tol_db must be a finite value <= 0 (got {})",
                self.err_tol_db
            )));
        }
        if !(0.0..1.0).contains(&self.kernel_rel_threshold) {
            return Err(MpError::InvalidParameter(format!(
                "kernel_rel_threshold must be in [0, 1) (got {})",
                self.kernel_rel_threshold
            )));
        }
        if self.energy_floor.is_nan() || self.energy_floor < 0.0 {
            return Err(MpError::InvalidParameter(format!(
                "energy_floor must be >= 0 (got {})",
                self.energy_floor
            )));
        }
        Ok(())
    }

    /// `max_atoms` clamped to the number of available coefficients.
    pub fn resolved_max_atoms(&self, coefficients: usize) -> usize {
        self.max_atoms.unwrap_or(coefficients).min(coefficients)
    }

    /// `max_iterations`, defaulting to twice the resolved atom budget.
    pub fn resolved_max_iterations(&self, coefficients: usize) -> usize {
        self.max_iterations
            .unwrap_or_else(|| self.resolved_max_atoms(coefficients).saturating_mul(2))
    }
}

/// Builder for [`PursuitParams`]
#[derive(Debug, Default)]
pub struct PursuitParamsBuilder {
    params: PursuitParams,
}

impl PursuitParamsBuilder {
    pub fn phase_conv(mut self, phase: PhaseConvention) -> Self {
        self.params.phase_conv = phase;
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.params.algorithm = algorithm;
        self
    }

    pub fn err_tol_db(mut self, db: f64) -> Self {
        self.params.err_tol_db = db;
        self
    }

    pub fn max_atoms(mut self, n: usize) -> Self {
        self.params.max_atoms = Some(n);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.params.max_iterations = Some(n);
        self
    }

    pub fn iter_step(mut self, n: usize) -> Self {
        self.params.iter_step = n;
        self
    }

    pub fn cycles(mut self, n: usize) -> Self {
        self.params.cycles = n;
        self
    }

    pub fn kernel_rel_threshold(mut self, t: f64) -> Self {
        self.params.kernel_rel_threshold = t;
        self
    }

    pub fn local_repeat_limit(mut self, n: usize) -> Self {
        self.params.local_repeat_limit = n;
        self
    }

    pub fn solver(mut self, kind: SolverKind) -> Self {
        self.params.solver = kind;
        self
    }

    pub fn energy_floor(mut self, floor: f64) -> Self {
        self.params.energy_floor = floor;
        self
    }

    pub fn build(self) -> MpResult<PursuitParams> {
        self.params.validate()?;
        Ok(self.params)
    }
}
