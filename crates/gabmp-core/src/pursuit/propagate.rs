//! Residual update through the kernel cache
//!
//! Subtracting `x g + conj(x g)` from the residual changes every target
//! coefficient by `x <g, g2> + conj(x) <conj(g), g2>`. The second term is the
//! same kernel read at the mirrored channel `M - m`, so each dictionary plane
//! receives two kernel passes, or one for self-conjugate bins.
//!
//! Planes are independent of each other. With the `parallel` feature they are
//! updated concurrently; the kernel set is only read.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::dictionary::Dictionary;
use crate::kernel::KernelSet;
use crate::types::{AtomPos, Complex};

use super::{Plane, Pursuit};

/// Add `coef` times the atom pair at `pos` to one target plane.
fn update_plane(
    kernels: &KernelSet,
    origin: &Dictionary,
    pos: AtomPos,
    coef: Complex,
    w2: usize,
    plane: &mut Plane,
) -> usize {
    let kernel = kernels.get(pos.w, w2);
    if kernel.is_empty() {
        return 0;
    }
    let Plane { c, max, bins, .. } = plane;
    let bins = *bins;

    let mut written = kernel.accumulate(pos.m, pos.n, coef, c, bins, |n2, lo, hi| {
        max.set_dirty(n2, lo, hi)
    });
    if origin.has_conjugate(pos.m) {
        let mirror = origin.channels() - pos.m;
        written += kernel.accumulate(mirror, pos.n, coef.conj(), c, bins, |n2, lo, hi| {
            max.set_dirty(n2, lo, hi)
        });
    }
    written
}

impl Pursuit {
    /// Add `coef * <g_pos, .> + conj(coef) * <conj(g_pos), .>` to every plane.
    ///
    /// Pass `-x` to project, `+y` to undo a projection.
    pub(crate) fn propagate(&mut self, pos: AtomPos, coef: Complex) {
        let kernels = &self.kernels;
        let origin = &self.dicts[pos.w];

        #[cfg(feature = "parallel")]
        let written: usize = self
            .planes
            .par_iter_mut()
            .enumerate()
            .map(|(w2, plane)| update_plane(kernels, origin, pos, coef, w2, plane))
            .sum();

        #[cfg(not(feature = "parallel"))]
        let written: usize = self
            .planes
            .iter_mut()
            .enumerate()
            .map(|(w2, plane)| update_plane(kernels, origin, pos, coef, w2, plane))
            .sum();

        self.stats.propagations.inc_by(written as u64);
    }
}
