//! Max-Tracking Structure
//!
//! Finds the residual coefficient with the largest squared magnitude without
//! rescanning the whole field after every update.
//!
//! ```text
//!                    top tree over N column maxima
//!                 ┌──────────────┴──────────────┐
//!            max(col 0..N/2)              max(col N/2..N)
//!              ...                           ...
//!   column tree 0   column tree 1   ...   column tree N-1
//!   over M2 rows    over M2 rows          over M2 rows
//! ```
//!
//! Each tree is an implicit binary tournament stored in an array. Updates are
//! lazy: the residual update only records which rows of which columns changed
//! ([`PlaneMax::set_dirty`]); [`PlaneMax::refresh`] recomputes exactly those
//! leaves and their ancestors right before the next query.
//!
//! Ties go to the lower index at every level, so the reported maximum is the
//! earliest position in column-major scan order.

use crate::types::Complex;

/// Array-backed max tournament over `len` leaves.
#[derive(Debug, Clone)]
pub struct MaxTree {
    len: usize,
    size: usize,
    vals: Vec<f64>,
    idx: Vec<usize>,
    dirty: Option<(usize, usize)>,
}

impl MaxTree {
    pub fn new(len: usize) -> Self {
        let size = len.max(1).next_power_of_two();
        let mut idx = vec![0; 2 * size];
        for (i, slot) in idx[size..].iter_mut().enumerate() {
            *slot = i;
        }
        Self {
            len,
            size,
            vals: vec![-1.0; 2 * size],
            idx,
            dirty: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Union `[lo, hi]` into the pending dirty interval.
    #[inline]
    pub fn set_dirty(&mut self, lo: usize, hi: usize) {
        let hi = hi.min(self.len.saturating_sub(1));
        if lo > hi {
            return;
        }
        self.dirty = Some(match self.dirty {
            Some((a, b)) => (a.min(lo), b.max(hi)),
            None => (lo, hi),
        });
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Recompute dirty leaves from `value(i)` and clear the dirty interval.
    pub fn refresh<F: Fn(usize) -> f64>(&mut self, value: F) {
        let (lo, hi) = match self.dirty.take() {
            Some(r) => r,
            None => return,
        };
        for i in lo..=hi {
            self.vals[self.size + i] = value(i);
        }
        let mut l = (lo + self.size) / 2;
        let mut r = (hi + self.size) / 2;
        while l >= 1 {
            for p in l..=r {
                self.pull(p);
            }
            if l == 1 {
                break;
            }
            l /= 2;
            r /= 2;
        }
    }

    /// Set a single leaf and update its ancestors immediately.
    pub fn update(&mut self, i: usize, v: f64) {
        let mut p = self.size + i;
        self.vals[p] = v;
        while p > 1 {
            p /= 2;
            self.pull(p);
        }
    }

    #[inline]
    fn pull(&mut self, p: usize) {
        let (l, r) = (2 * p, 2 * p + 1);
        // Right child only wins when strictly greater
        let c = if self.vals[r] > self.vals[l] { r } else { l };
        self.vals[p] = self.vals[c];
        self.idx[p] = self.idx[c];
    }

    /// Current `(value, index)` of the maximum, ignoring pending dirt.
    #[inline]
    pub fn max(&self) -> (f64, usize) {
        (self.vals[1], self.idx[1])
    }

    /// Value stored for leaf `i`.
    pub fn leaf(&self, i: usize) -> f64 {
        self.vals[self.size + i]
    }
}

/// Two-level max structure for one dictionary's coefficient plane.
#[derive(Debug, Clone)]
pub struct PlaneMax {
    bins: usize,
    columns: Vec<MaxTree>,
    top: MaxTree,
    dirty_cols: Vec<usize>,
    col_flag: Vec<bool>,
}

impl PlaneMax {
    /// Structure for `frames` columns of `bins` rows, all marked dirty.
    pub fn new(bins: usize, frames: usize) -> Self {
        let mut pm = Self {
            bins,
            columns: (0..frames).map(|_| MaxTree::new(bins)).collect(),
            top: MaxTree::new(frames),
            dirty_cols: Vec::with_capacity(frames),
            col_flag: vec![false; frames],
        };
        pm.mark_all_dirty();
        pm
    }

    pub fn mark_all_dirty(&mut self) {
        for n in 0..self.columns.len() {
            self.set_dirty(n, 0, self.bins - 1);
        }
    }

    /// Rows `lo..=hi` of column `n` changed.
    #[inline]
    pub fn set_dirty(&mut self, n: usize, lo: usize, hi: usize) {
        self.columns[n].set_dirty(lo, hi);
        if !self.col_flag[n] {
            self.col_flag[n] = true;
            self.dirty_cols.push(n);
        }
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty_cols.is_empty()
    }

    /// Bring every dirty column and the top tree up to date with `c`.
    pub fn refresh(&mut self, c: &[Complex]) {
        let bins = self.bins;
        for &n in &self.dirty_cols {
            let col = &c[n * bins..(n + 1) * bins];
            let tree = &mut self.columns[n];
            tree.refresh(|m| col[m].norm_sqr());
            self.top.update(n, tree.max().0);
            self.col_flag[n] = false;
        }
        self.dirty_cols.clear();
    }

    /// Largest `(|c|^2, m, n)` after refreshing.
    pub fn find_max(&mut self, c: &[Complex]) -> (f64, usize, usize) {
        self.refresh(c);
        let (v, n) = self.top.max();
        let m = self.columns[n].max().1;
        (v, m, n)
    }
}
