//! Interval Scheduler: chooses which shard to make resident next.
//!
//! Grounded on `graphwalker_engine::run`'s `prob`-gated choice between
//! `intervalWithMinStep` and `intervalWithMaxWalks` in
//! `examples/original_source/src/engine/graphwalker.hpp`.

use crate::pool::WalkPool;
use crate::rng::WalkRng;

/// Picks the next resident shard: with probability `prob` the shard whose
/// laggard walks have taken the fewest hops (bounding worst-case per-walk
/// latency), otherwise the shard with the most parked walks (maximising
/// amortization of the load cost). Returns `None` once the pool is empty.
pub struct IntervalScheduler {
    prob: f64,
    tick: u64,
}

impl IntervalScheduler {
    pub fn new(prob: f64) -> Self {
        Self { prob, tick: 0 }
    }

    pub fn pick(&mut self, pool: &WalkPool, seed: u64) -> Option<usize> {
        let mut rng = WalkRng::seeded(self.tick, 0, 0, seed);
        self.tick += 1;
        if rng.uniform() < self.prob {
            pool.min_step_shard()
        } else {
            pool.max_walk_shard()
        }
        .or_else(|| pool.min_step_shard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_when_pool_is_empty() {
        let pool = WalkPool::new(1, 2);
        let mut sched = IntervalScheduler::new(0.2);
        assert_eq!(sched.pick(&pool, 1), None);
    }

    #[test]
    fn always_min_step_at_prob_one() {
        let pool = WalkPool::new(1, 2);
        pool.seed(0, 0, 1, 9);
        pool.seed(1, 0, 1, 1);
        let mut sched = IntervalScheduler::new(1.0);
        for tick in 0..20 {
            assert_eq!(sched.pick(&pool, tick), Some(1));
        }
    }

    #[test]
    fn always_max_walk_at_prob_zero() {
        let pool = WalkPool::new(1, 2);
        pool.seed(0, 0, 1, 0);
        pool.seed(0, 0, 2, 0);
        pool.seed(1, 0, 3, 0);
        let mut sched = IntervalScheduler::new(0.0);
        for tick in 0..20 {
            assert_eq!(sched.pick(&pool, tick), Some(0));
        }
    }
}
