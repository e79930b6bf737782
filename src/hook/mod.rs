//! Application Hook: the capability set the engine needs from whatever is
//! using it (PageRank approximation, personalized PageRank, SimRank, ...).
//!
//! Expressed as a trait rather than inheritance: the engine holds
//! `&dyn AppHook` and only needs a virtual call once per visit and once
//! per interval boundary, never on the per-instruction hot path.

use crate::pool::WalkPool;
use crate::rng::WalkRng;
use crate::shard::Interval;

pub mod pagerank;

/// What the continuation policy decides at a vertex with out-degree `deg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Continue to the neighbor at this index into the CSR neighbor slice.
    Continue(usize),
    /// Terminate the walk here (absorbing state / teleport).
    Stop,
}

/// The capability set the walker kernel and engine loop call into.
pub trait AppHook: Send + Sync {
    /// Populates initial walks (default policy: `R` walks per source
    /// vertex), one call at engine start before the first interval.
    fn seed_walks(&self, pool: &WalkPool, codec: &crate::codec::CodecFields, nvertices: u64, intervals: &[Interval]);

    /// Records a visit. Called once per step, must be thread-safe or use
    /// per-thread accumulators merged at interval end.
    fn on_visit(&self, source: u64, vertex: u64, hop: u64, thread_id: usize);

    /// Allocates per-thread, per-window visit accumulators ahead of an
    /// interval, sized `hi - lo + 1`.
    fn before_interval(&self, p: usize, lo: u64, hi: u64);

    /// Merges per-thread accumulators into the persistent visit-count file
    /// (or in-memory store, under `semi_external`).
    fn after_interval(&self, p: usize, lo: u64, hi: u64);

    /// How to leave a vertex of out-degree `deg`. The engine treats this as
    /// a black box; the canonical restart-with-probability-`alpha` policy
    /// is provided as `restart_policy` below.
    fn continuation_policy(&self, deg: u64, rng: &mut WalkRng) -> Continuation;
}

/// The canonical restart-with-probability-`alpha` continuation policy:
/// draw `u`; if `u < alpha`, stop; else pick a uniform neighbor index.
pub fn restart_policy(alpha: f64, deg: u64, rng: &mut WalkRng) -> Continuation {
    if rng.uniform() < alpha {
        Continuation::Stop
    } else {
        Continuation::Continue(rng.below(deg) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_policy_always_stops_at_alpha_one() {
        let mut rng = WalkRng::seeded(1, 2, 3, 4);
        for _ in 0..50 {
            assert_eq!(restart_policy(1.0, 5, &mut rng), Continuation::Stop);
        }
    }

    #[test]
    fn restart_policy_never_stops_at_alpha_zero() {
        let mut rng = WalkRng::seeded(1, 2, 3, 4);
        for _ in 0..50 {
            assert!(matches!(restart_policy(0.0, 5, &mut rng), Continuation::Continue(_)));
        }
    }
}
