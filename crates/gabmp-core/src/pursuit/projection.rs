//! Projection and removal of single atoms
//!
//! A real signal sees each half-spectrum atom `g` together with its
//! conjugate `conj(g)`. Projecting onto that pair with coefficient `c = <r, g>`
//! uses the dual
//!
//! ```text
//!   x = (c - conj(c) A) / (1 - |A|^2),    A = <conj(g), g>
//! ```
//!
//! which removes `2 (|x|^2 + Re(x^2 conj(A)))` of energy. DC and Nyquist
//! atoms are their own conjugate, so `x = c` and the energy is `|c|^2`.

use crate::types::{AtomPos, Complex};

use super::Pursuit;

/// `|x|^2 + Re(x^2 conj(a))`: energy of `x g + conj(x g)`, halved.
#[inline]
pub fn proj_energy(a: Complex, x: Complex) -> f64 {
    x.norm_sqr() + (x * x * a.conj()).re
}

/// Dual coefficient and removed energy for residual coefficient `c`.
///
/// `inv` is `1 / (1 - |a|^2)`; `conjugate` selects the pair form.
#[inline]
pub fn dual_product(c: Complex, a: Complex, inv: f64, conjugate: bool) -> (Complex, f64) {
    if conjugate {
        let x = (c - c.conj() * a) * inv;
        (x, 2.0 * proj_energy(a, x))
    } else {
        (c, c.norm_sqr())
    }
}

/// Energy removed when subtracting `x` from a residual whose coefficient is `c`.
///
/// Exact for any `x`, not only for the dual of `c`.
#[inline]
pub(crate) fn removed_energy(c: Complex, x: Complex, a: Complex, conjugate: bool) -> f64 {
    if conjugate {
        4.0 * (c * x.conj()).re - 2.0 * proj_energy(a, x)
    } else {
        2.0 * (c * x.conj()).re - x.norm_sqr()
    }
}

impl Pursuit {
    /// Project the residual onto the atom at `pos` with residual coefficient `cval`.
    ///
    /// Updates the residual field, the output coefficient and the support
    /// count. Returns the removed energy; the caller accounts for it.
    pub fn project(&mut self, pos: AtomPos, cval: Complex) -> f64 {
        let d = &self.dicts[pos.w];
        let conjugate = d.has_conjugate(pos.m);
        let idx = d.index(pos.m, pos.n);
        let (a, inv) = self.kernels.get(pos.w, pos.w).conj_atom_product(pos.m, pos.n);
        let (x, e) = dual_product(cval, a, inv, conjugate);

        self.propagate(pos, -x);

        let plane = &mut self.planes[pos.w];
        plane.cout[idx] += x;
        plane.support[idx] += 1;
        self.stats.atoms_selected.inc();
        e
    }

    /// Take the atom at `pos` back out of the approximation.
    ///
    /// Adds its accumulated coefficient back to the residual and clears its
    /// support. Returns the energy the residual gains.
    pub fn remove(&mut self, pos: AtomPos) -> f64 {
        let d = &self.dicts[pos.w];
        let conjugate = d.has_conjugate(pos.m);
        let idx = d.index(pos.m, pos.n);
        let (a, _) = self.kernels.get(pos.w, pos.w).conj_atom_product(pos.m, pos.n);

        let plane = &mut self.planes[pos.w];
        let y = plane.cout[idx];
        let c = plane.c[idx];
        plane.cout[idx] = Complex::new(0.0, 0.0);
        if plane.support[idx] > 0 {
            self.curratoms = self.curratoms.saturating_sub(1);
        }
        plane.support[idx] = 0;

        // Negative of the energy `y` would remove from the restored residual
        let inc = if conjugate {
            2.0 * proj_energy(a, y) + 4.0 * (c * y.conj()).re
        } else {
            y.norm_sqr() + 2.0 * (c * y.conj()).re
        };

        self.propagate(pos, y);
        self.stats.atoms_removed.inc();
        inc
    }

    /// Whether the atom at `pos` is orthogonal to its conjugate partner.
    pub(crate) fn conj_isolated(&self, pos: AtomPos) -> bool {
        self.dicts[pos.w].has_conjugate(pos.m)
            && self.kernels.get(pos.w, pos.w).conj_atom_product(pos.m, pos.n).0 == Complex::new(0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex {
        Complex::new(re, im)
    }

    #[test]
    fn test_proj_energy_isolated() {
        let x = c(0.3, -1.2);
        assert!((proj_energy(c(0.0, 0.0), x) - x.norm_sqr()).abs() < 1e-15);
    }

    #[test]
    fn test_dual_zeroes_pair_coefficient() {
        // After subtracting x g + conj(x g) the coefficient on g is
        // c - x - conj(x) A, which must vanish.
        let a = c(0.2, 0.35);
        let inv = 1.0 / (1.0 - a.norm_sqr());
        let cv = c(1.5, -0.7);
        let (x, e) = dual_product(cv, a, inv, true);
        assert!((cv - x - x.conj() * a).norm() < 1e-14);
        assert!((e - removed_energy(cv, x, a, true)).abs() < 1e-12);
    }

    #[test]
    fn test_self_conjugate_bins() {
        let cv = c(2.0, 0.0);
        let (x, e) = dual_product(cv, c(0.0, 0.0), 1.0, false);
        assert_eq!(x, cv);
        assert_eq!(e, 4.0);
        assert_eq!(removed_energy(cv, cv, c(0.0, 0.0), false), 4.0);
    }

    #[test]
    fn test_removed_energy_zero_step() {
        assert_eq!(removed_energy(c(1.0, 1.0), c(0.0, 0.0), c(0.1, 0.0), true), 0.0);
    }
}
