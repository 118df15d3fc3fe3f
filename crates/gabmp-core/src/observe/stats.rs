//! # Pursuit Counters
//!
//! Lock-free counters describing what the engine did during a run. They are
//! cheap enough to bump from inside the iteration loop and can be read from
//! another thread while a long decomposition is in progress.
//!
//! ```rust
//! use gabmp_core::observe::PursuitStats;
//!
//! let stats = PursuitStats::new();
//! stats.iterations.inc();
//! stats.atoms_selected.inc_by(3);
//! assert_eq!(stats.snapshot().atoms_selected, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Counters for one pursuit instance.
#[derive(Debug, Default)]
pub struct PursuitStats {
    /// Outer iterations performed
    pub iterations: Counter,
    /// Single-atom projections (including re-selections)
    pub atoms_selected: Counter,
    /// Provisional removals during cyclic refinement
    pub atoms_removed: Counter,
    /// Kernel applications into a target dictionary
    pub propagations: Counter,
    /// Local Gram systems solved
    pub local_solves: Counter,
    /// Local Gram systems that were not positive definite
    pub local_failures: Counter,
    /// Cyclic refinement passes started
    pub cyclic_passes: Counter,
    /// Refinements judged to have diverged
    pub stalls: Counter,
}

/// Plain copy of [`PursuitStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub iterations: u64,
    pub atoms_selected: u64,
    pub atoms_removed: u64,
    pub propagations: u64,
    pub local_solves: u64,
    pub local_failures: u64,
    pub cyclic_passes: u64,
    pub stalls: u64,
}

impl PursuitStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            iterations: self.iterations.get(),
            atoms_selected: self.atoms_selected.get(),
            atoms_removed: self.atoms_removed.get(),
            propagations: self.propagations.get(),
            local_solves: self.local_solves.get(),
            local_failures: self.local_failures.get(),
            cyclic_passes: self.cyclic_passes.get(),
            stalls: self.stalls.get(),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.iterations,
            &self.atoms_selected,
            &self.atoms_removed,
            &self.propagations,
            &self.local_solves,
            &self.local_failures,
            &self.cyclic_passes,
            &self.stalls,
        ] {
            c.reset();
        }
    }
}

impl StatsSnapshot {
    /// Fraction of local solves that failed, 0 when none were attempted.
    pub fn local_failure_rate(&self) -> f64 {
        if self.local_solves == 0 {
            0.0
        } else {
            self.local_failures as f64 / self.local_solves as f64
        }
    }
}
