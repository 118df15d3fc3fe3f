//! Small dense Hermitian solvers
//!
//! Local orthogonalization solves `G x = b` where `G` is the Gram matrix of a
//! handful of overlapping atoms. The solver is a strategy object picked when
//! the pursuit is built:
//!
//! - [`CholeskySolver`]: `nalgebra` Cholesky factorisation; fails when `G` is
//!   not positive definite.
//! - [`StubSolver`]: leaves `b` untouched and always succeeds, which turns
//!   local orthogonalization into plain sequential projections.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::types::Complex;

/// Smallest accepted Cholesky pivot, relative to the largest diagonal entry.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solver failures. Always recoverable from the pursuit's point of view.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    #[error("Matrix of order {0} is not positive definite")]
    NotPositiveDefinite(usize),

    #[error("Expected {expected} entries, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Solver backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Cholesky,
    Stub,
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Cholesky
    }
}

impl SolverKind {
    pub fn create(self) -> Box<dyn HermitianSolver> {
        match self {
            SolverKind::Cholesky => Box::new(CholeskySolver),
            SolverKind::Stub => Box::new(StubSolver),
        }
    }
}

/// Solve a Hermitian positive definite system in place.
pub trait HermitianSolver: Send + std::fmt::Debug {
    /// `gram` holds the `n x n` matrix column-major; on success `rhs` is
    /// overwritten with the solution.
    fn solve(&mut self, gram: &[Complex], n: usize, rhs: &mut [Complex]) -> Result<(), SolverError>;

    fn name(&self) -> &'static str;
}

/// Dense Cholesky solve through `nalgebra`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CholeskySolver;

impl HermitianSolver for CholeskySolver {
    fn solve(&mut self, gram: &[Complex], n: usize, rhs: &mut [Complex]) -> Result<(), SolverError> {
        if gram.len() < n * n {
            return Err(SolverError::DimensionMismatch { expected: n * n, actual: gram.len() });
        }
        if rhs.len() < n {
            return Err(SolverError::DimensionMismatch { expected: n, actual: rhs.len() });
        }
        if n == 0 {
            return Ok(());
        }
        let a = DMatrix::from_column_slice(n, n, &gram[..n * n]);
        let scale = a.diagonal().iter().fold(0.0f64, |acc, d| acc.max(d.re.abs()));
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(SolverError::NotPositiveDefinite(n));
        }
        let chol = a.cholesky().ok_or(SolverError::NotPositiveDefinite(n))?;
        // Complex square roots never fail, so a negative pivot shows up as an
        // imaginary diagonal entry of L instead of a failed factorisation.
        let eps = PIVOT_TOLERANCE * scale.sqrt();
        let l = chol.l();
        if l.diagonal().iter().any(|d| !(d.re > eps) || d.im.abs() > eps) {
            return Err(SolverError::NotPositiveDefinite(n));
        }
        let x = chol.solve(&DVector::from_column_slice(&rhs[..n]));
        if x.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return Err(SolverError::NotPositiveDefinite(n));
        }
        rhs[..n].copy_from_slice(x.as_slice());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cholesky"
    }
}

/// No-op solver for builds without a linear algebra backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubSolver;

impl HermitianSolver for StubSolver {
    fn solve(&mut self, _gram: &[Complex], n: usize, rhs: &mut [Complex]) -> Result<(), SolverError> {
        if rhs.len() < n {
            return Err(SolverError::DimensionMismatch { expected: n, actual: rhs.len() });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex {
        Complex::new(re, im)
    }

    #[test]
    fn test_cholesky_hermitian() {
        // G = [[2, 1-i], [1+i, 3]], column-major
        let gram = [c(2.0, 0.0), c(1.0, 1.0), c(1.0, -1.0), c(3.0, 0.0)];
        let x_true = [c(0.5, -0.25), c(-1.0, 2.0)];
        let mut b = [
            gram[0] * x_true[0] + gram[2] * x_true[1],
            gram[1] * x_true[0] + gram[3] * x_true[1],
        ];
        let mut solver = CholeskySolver;
        solver.solve(&gram, 2, &mut b).unwrap();
        for (got, want) in b.iter().zip(x_true.iter()) {
            assert!((got - want).norm() < 1e-12);
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let gram = [c(1.0, 0.0), c(2.0, 0.0), c(2.0, 0.0), c(1.0, 0.0)];
        let mut b = [c(1.0, 0.0), c(1.0, 0.0)];
        let err = CholeskySolver.solve(&gram, 2, &mut b).unwrap_err();
        assert_eq!(err, SolverError::NotPositiveDefinite(2));
    }

    #[test]
    fn test_cholesky_rejects_negative_pivot_late() {
        // Leading 2x2 block is positive definite, the full matrix is not.
        let g = [
            [c(1.0, 0.0), c(0.5, 0.5), c(0.9, 0.0)],
            [c(0.5, -0.5), c(1.0, 0.0), c(0.9, 0.0)],
            [c(0.9, 0.0), c(0.9, 0.0), c(1.0, 0.0)],
        ];
        let gram: Vec<Complex> = (0..3).flat_map(|j| (0..3).map(move |i| g[i][j])).collect();
        let mut b = [c(1.0, 0.0), c(0.0, 1.0), c(-1.0, 0.0)];
        let before = b;
        assert_eq!(
            CholeskySolver.solve(&gram, 3, &mut b),
            Err(SolverError::NotPositiveDefinite(3))
        );
        assert_eq!(b, before);
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        // Two identical atoms
        let gram = [c(1.0, 0.0), c(0.0, 1.0), c(0.0, -1.0), c(1.0, 0.0)];
        let mut b = [c(1.0, 0.0), c(0.0, 1.0)];
        assert!(CholeskySolver.solve(&gram, 2, &mut b).is_err());

        let zero = [c(0.0, 0.0)];
        let mut b = [c(1.0, 0.0)];
        assert_eq!(CholeskySolver.solve(&zero, 1, &mut b), Err(SolverError::NotPositiveDefinite(1)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let gram = [c(1.0, 0.0)];
        let mut b = [c(1.0, 0.0)];
        assert!(matches!(
            CholeskySolver.solve(&gram, 2, &mut b),
            Err(SolverError::DimensionMismatch { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn test_stub_leaves_rhs() {
        let mut b = [c(1.0, 2.0), c(3.0, 4.0)];
        let mut solver = SolverKind::Stub.create();
        assert_eq!(solver.name(), "stub");
        solver.solve(&[], 2, &mut b).unwrap();
        assert_eq!(b, [c(1.0, 2.0), c(3.0, 4.0)]);
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(SolverKind::default(), SolverKind::Cholesky);
        assert_eq!(SolverKind::default().create().name(), "cholesky");
    }
}
