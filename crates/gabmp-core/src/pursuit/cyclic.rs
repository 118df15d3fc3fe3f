//! Cyclic matching pursuit
//!
//! After the plain projection, revisit the active atoms around the new one:
//! each is taken out of the approximation and the globally best atom is
//! selected in its place. A pass only lowers the residual energy; when it
//! does not, the run reports [`PursuitStatus::Stalled`].

use tracing::{trace, warn};

use crate::types::AtomPos;

use super::{Pursuit, PursuitStatus};

/// Allowed energy increase of one re-selection before the run counts as stalled.
const STALL_TOLERANCE: f64 = 1e-6;

impl Pursuit {
    pub(crate) fn cyclicmp(&mut self, origin: AtomPos) -> PursuitStatus {
        self.mp_step(origin);

        self.p_buf.clear();
        self.p_buf.push(origin);

        for cycle in 0..self.params.cycles {
            self.stats.cyclic_passes.inc();
            self.expand_frontier();
            if self.p_buf.len() == 1 {
                return PursuitStatus::CanContinue;
            }
            trace!(%origin, cycle, atoms = self.p_buf.len(), "cyclic pass");

            for i in (0..self.p_buf.len()).rev() {
                let err_start = self.err;
                let pos = self.p_buf[i];

                let inc = self.remove(pos);
                self.err.add(inc);

                let next = match self.find_max() {
                    Some((v, p)) if v > self.params.energy_floor => p,
                    _ => pos,
                };
                let idx = self.dicts[next.w].index(next.m, next.n);
                if self.planes[next.w].support[idx] == 0 {
                    self.curratoms += 1;
                }
                let cval = self.planes[next.w].c[idx];
                let e = self.project(next, cval);
                self.err.sub(e);
                self.p_buf[i] = next;

                let gain = err_start.diff(&self.err);
                if gain < -STALL_TOLERANCE {
                    warn!(%pos, %next, gain, "cyclic re-selection increased the error");
                    self.stats.stalls.inc();
                    return PursuitStatus::Stalled;
                }
            }
        }
        PursuitStatus::CanContinue
    }

    /// Add every active atom overlapping a buffered atom, without duplicates.
    fn expand_frontier(&mut self) {
        let start = self.p_buf.len();
        for k in 0..start {
            let p = self.p_buf[k];
            for w2 in 0..self.dicts.len() {
                let kernel = self.kernels.get(p.w, w2);
                if kernel.is_empty() {
                    continue;
                }
                let bins2 = self.dicts[w2].bins();
                let fp = kernel.footprint(p.m, p.n);
                for n2 in fp.cols.iter() {
                    for m2 in fp.rows.iter() {
                        if m2 >= bins2 || self.planes[w2].support[n2 * bins2 + m2] == 0 {
                            continue;
                        }
                        let q = AtomPos::new(m2, n2, w2);
                        if self.p_buf.iter().any(|b| *b == q) {
                            continue;
                        }
                        if self.p_buf.len() >= self.capacity {
                            return;
                        }
                        self.p_buf.push(q);
                    }
                }
            }
        }
    }
}
