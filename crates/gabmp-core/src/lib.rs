//! # Multi-Gabor Matching Pursuit
//!
//! Sparse decomposition of real signals over a union of Gabor dictionaries,
//! each with its own window, hop and channel count.
//!
//! ## Overview
//!
//! Matching pursuit repeatedly picks the atom with the largest inner product
//! with the residual and subtracts its projection. Done naively every
//! iteration touches the whole coefficient field. This library keeps the
//! field up to date locally instead:
//!
//! - **Kernel cache**: inner products between atoms of every dictionary pair,
//!   stored once per pair for a reference atom and shifted on demand
//! - **Residual update**: an iteration only changes coefficients inside the
//!   kernel support of the chosen atom
//! - **Max tracking**: per-frame tournament trees with lazy dirty ranges
//! - **Refinement**: local orthogonal re-fitting (LocOMP) or cyclic
//!   re-selection of neighbouring atoms (CyclicMP)
//!
//! ## Signal Flow
//!
//! ```text
//! f → DGT (per dictionary) → residual field → [select → project → propagate]* → atoms
//!                                                                              ↓
//!                                                  approximation ← synthesis ←─┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use gabmp_core::prelude::*;
//!
//! let windows = [
//!     WindowSpec::fir(FirWindow::Blackman, 256, 64, 256),
//!     WindowSpec::fir(FirWindow::Blackman, 1024, 256, 1024),
//! ];
//! let params = PursuitParams::builder()
//!     .algorithm(Algorithm::CyclicMp)
//!     .err_tol_db(-60.0)
//!     .build()
//!     .unwrap();
//!
//! let signal = vec![0.0; 8192];
//! let mut mp = Pursuit::new(&windows, 8192, params).unwrap();
//! let result = mp.execute(&signal).unwrap();
//! println!("{} atoms, {:.1} dB", result.summary.atoms, result.summary.err_db);
//! ```

pub mod config;
pub mod dgt;
pub mod dictionary;
pub mod kernel;
pub mod maxtree;
pub mod observe;
pub mod params;
pub mod precision;
pub mod pursuit;
pub mod range;
pub mod solver;
pub mod types;
pub mod windows;

// Re-export main types
pub use config::{ConfigError, DictionaryConfig, GabmpConfig};
pub use dgt::{dgt_length, postpad, snr_db, DgtReal};
pub use dictionary::{Dictionary, WindowSpec};
pub use kernel::{GramKernel, KernelSet};
pub use params::{Algorithm, PursuitParams, PursuitParamsBuilder};
pub use precision::ExtendedAccumulator;
pub use pursuit::{Pursuit, PursuitResult, PursuitSnapshot, PursuitStatus, PursuitSummary};
pub use solver::{CholeskySolver, HermitianSolver, SolverError, SolverKind, StubSolver};
pub use types::{AtomPos, Complex, MpError, MpResult, PhaseConvention, Sample};
pub use windows::FirWindow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dictionary::{Dictionary, WindowSpec};
    pub use crate::params::{Algorithm, PursuitParams};
    pub use crate::pursuit::{Pursuit, PursuitResult, PursuitStatus, PursuitSummary};
    pub use crate::types::{AtomPos, Complex, MpError, MpResult, PhaseConvention, Sample};
    pub use crate::windows::FirWindow;
}
