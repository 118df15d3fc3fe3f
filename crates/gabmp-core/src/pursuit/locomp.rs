//! Local orthogonal matching pursuit
//!
//! After selecting an atom, re-fit it jointly with every active atom it
//! overlaps. The coefficients solve the local normal equations
//!
//! ```text
//!   G x = b,    G[i][j] = <g_j, g_i>,    b[i] = <r, g_i>
//! ```
//!
//! and are applied one after another through the ordinary residual update.
//! Only atoms orthogonal to their own conjugate take part, so the real and
//! imaginary parts of each coefficient stay decoupled and `G` is the complex
//! Gram matrix of the half-spectrum atoms.

use tracing::{trace, warn};

use crate::types::{AtomPos, Complex};

use super::projection::removed_energy;
use super::{Pursuit, PursuitStatus};

impl Pursuit {
    pub(crate) fn locomp(&mut self, origin: AtomPos) -> PursuitStatus {
        if !self.conj_isolated(origin) {
            return self.mp_step(origin);
        }

        self.gather_neighbours(origin);
        let n = self.cval_pos.len();
        if n == 1 {
            return self.mp_step(origin);
        }

        self.fill_gram(n);
        for i in 0..n {
            let p = self.cval_pos[i];
            self.cvalinv_buf[i] = self.planes[p.w].c[self.dicts[p.w].index(p.m, p.n)];
        }

        self.stats.local_solves.inc();
        if let Err(e) = self
            .solver
            .solve(&self.gram_buf[..n * n], n, &mut self.cvalinv_buf[..n])
        {
            warn!(%origin, neighbours = n, error = %e, "local solve failed, falling back to mp");
            self.stats.local_failures.inc();
            self.mp_step(origin);
            return PursuitStatus::LocalOrthFailed;
        }
        trace!(%origin, neighbours = n, "local solve");

        let zero = Complex::new(0.0, 0.0);
        for i in 0..n {
            let p = self.cval_pos[i];
            let x = self.cvalinv_buf[i];
            let idx = self.dicts[p.w].index(p.m, p.n);
            let c = self.planes[p.w].c[idx];
            // Exact for the current residual; earlier members already moved it
            let e = removed_energy(c, x, zero, true);
            self.err.sub(e);

            self.propagate(p, -x);
            let plane = &mut self.planes[p.w];
            plane.cout[idx] += x;
            plane.support[idx] += 1;
            self.stats.atoms_selected.inc();
        }
        PursuitStatus::CanContinue
    }

    /// Collect `origin` followed by every active, conjugate-isolated atom
    /// overlapping it, up to the buffer capacity.
    fn gather_neighbours(&mut self, origin: AtomPos) {
        self.cval_pos.clear();
        self.cval_pos.push(origin);

        for w2 in 0..self.dicts.len() {
            let kernel = self.kernels.get(origin.w, w2);
            if kernel.is_empty() {
                continue;
            }
            let bins2 = self.dicts[w2].bins();
            let fp = kernel.footprint(origin.m, origin.n);
            for n2 in fp.cols.iter() {
                for m2 in fp.rows.iter() {
                    if m2 >= bins2 {
                        continue;
                    }
                    let p = AtomPos::new(m2, n2, w2);
                    if p == origin {
                        continue;
                    }
                    if self.planes[w2].support[p.index(bins2)] == 0 {
                        continue;
                    }
                    if !self.conj_isolated(p) {
                        continue;
                    }
                    if kernel.overlap(origin.m, origin.n, m2, n2) == Complex::new(0.0, 0.0) {
                        continue;
                    }
                    if self.cval_pos.len() >= self.capacity {
                        return;
                    }
                    self.cval_pos.push(p);
                }
            }
        }
    }

    /// Column-major Gram matrix of the gathered atoms, `gram[j n + i] = <g_j, g_i>`.
    fn fill_gram(&mut self, n: usize) {
        for i in 0..n {
            self.gram_buf[i * n + i] = Complex::new(1.0, 0.0);
            let pi = self.cval_pos[i];
            for j in (i + 1)..n {
                let pj = self.cval_pos[j];
                let g = self.kernels.get(pi.w, pj.w).overlap(pi.m, pi.n, pj.m, pj.n);
                // g = <g_i, g_j> = G[j][i]
                self.gram_buf[i * n + j] = g;
                self.gram_buf[j * n + i] = g.conj();
            }
        }
    }
}
