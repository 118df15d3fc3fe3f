//! Cyclic index ranges
//!
//! Time frames and frequency channels of a Gabor system live on a circle:
//! frame `N` is frame `0` again. A kernel neighbourhood that starts near the
//! end of the signal therefore continues at the beginning.
//!
//! [`WrappedRange`] describes such a run of consecutive indices by its first
//! wrapped index, its length and the modulus, and iterates over it without
//! branching on the boundary more than once.
//!
//! ```text
//!   modulus = 8, start = 6, len = 4
//!
//!   0   1   2   3   4   5   6   7
//!  [x] [x]                 [x] [x]
//!   ^-- continues here      ^-- starts here
//! ```

/// A run of `len` consecutive indices modulo `modulus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrappedRange {
    pub start: usize,
    pub len: usize,
    pub modulus: usize,
}

impl WrappedRange {
    /// Range starting at the (possibly negative or oversized) index `start`.
    ///
    /// `len` is clamped to `modulus` so no index is visited twice.
    pub fn new(start: i64, len: usize, modulus: usize) -> Self {
        debug_assert!(modulus > 0);
        let m = modulus as i64;
        Self {
            start: start.rem_euclid(m) as usize,
            len: len.min(modulus),
            modulus,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the run crosses the `modulus -> 0` boundary.
    pub fn wraps(&self) -> bool {
        self.start + self.len > self.modulus
    }

    /// The one or two plain (non-wrapping) segments, as half-open intervals.
    pub fn segments(&self) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let end = self.start + self.len;
        if end <= self.modulus {
            (self.start..end, 0..0)
        } else {
            (self.start..self.modulus, 0..end - self.modulus)
        }
    }

    /// Whether wrapped index `idx` falls inside the run.
    pub fn contains(&self, idx: usize) -> bool {
        let (a, b) = self.segments();
        a.contains(&idx) || b.contains(&idx)
    }

    pub fn iter(&self) -> WrappedIter {
        WrappedIter {
            next: self.start,
            remaining: self.len,
            modulus: self.modulus,
        }
    }
}

impl IntoIterator for WrappedRange {
    type Item = usize;
    type IntoIter = WrappedIter;

    fn into_iter(self) -> WrappedIter {
        self.iter()
    }
}

/// Iterator over the wrapped indices of a [`WrappedRange`].
#[derive(Debug, Clone)]
pub struct WrappedIter {
    next: usize,
    remaining: usize,
    modulus: usize,
}

impl Iterator for WrappedIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let out = self.next;
        self.remaining -= 1;
        self.next += 1;
        if self.next == self.modulus {
            self.next = 0;
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for WrappedIter {}
