//! Walker Kernel: per-walk step logic.
//!
//! Advances one walk through the resident shard until it leaves, reaches
//! the maximum hop count, or the application's continuation policy stops
//! it. Grounded on `RandomWalkwithProb::updateByWalk` in
//! `examples/original_source/src/walks/randomwalkwithprob.hpp`, with one
//! deliberate correction: the shard-containment
//! check happens *before* `on_visit` fires on every iteration, including
//! the first, so a destination that has already left the shard is never
//! reported as a visit inside it.

use crate::codec::CodecFields;
use crate::hook::{AppHook, Continuation};
use crate::pool::WalkPool;
use crate::rng::WalkRng;
use crate::shard::{shard_of, Interval, ShardView};

/// Advances walk `w` (currently resident in shard `view.shard`) until it
/// leaves the shard, terminates, or hits `max_hops`.
///
/// `walk_index` and `seed` feed the per-walk RNG: the same inputs always
/// produce the same trajectory.
pub fn step(
    w: u64,
    walk_index: u64,
    view: &ShardView,
    intervals: &[Interval],
    codec: &CodecFields,
    max_hops: u64,
    pool: &WalkPool,
    hook: &dyn AppHook,
    thread_id: usize,
    seed: u64,
) {
    let (source, offset, mut hop) = codec.decode(w);
    let mut cur = view.interval.lo + offset;

    loop {
        if !view.interval.contains(cur) || hop >= max_hops {
            break;
        }

        hook.on_visit(source, cur, hop, thread_id);

        let local = (cur - view.interval.lo) as usize;
        let deg = view.degree(local);
        if deg == 0 {
            return; // zero-degree vertex: terminate, do not re-park.
        }

        let mut rng = WalkRng::seeded(walk_index, cur, hop, seed);
        match hook.continuation_policy(deg, &mut rng) {
            Continuation::Stop => return,
            Continuation::Continue(k) => {
                let idx = k.min(deg as usize - 1);
                cur = view.neighbors(local)[idx] as u64;
            }
        }
        hop += 1;
    }

    if hop >= max_hops {
        return; // exhausted its hop budget: terminate.
    }

    // Loop exited because `cur` left the resident shard.
    match shard_of(intervals, cur) {
        Some(q) if q < intervals.len() => {
            let lo_q = intervals[q].lo;
            if let Ok(word) = codec.encode(source, cur - lo_q, hop) {
                pool.move_walk(word, q, thread_id, hop);
            }
            // A codec overflow here indicates a misconfigured field split;
            // the walk is dropped rather than panicking the whole engine,
            // matching the "treat continuation policy as a black box, but
            // codec bounds as load-bearing" split.
        }
        _ => {} // destination outside every shard: terminate.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::restart_policy;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct RecordingHook {
        alpha: f64,
        visits: Mutex<Vec<(u64, u64, u64)>>,
        visit_count: AtomicU64,
    }

    impl RecordingHook {
        fn new(alpha: f64) -> Self {
            Self {
                alpha,
                visits: Mutex::new(Vec::new()),
                visit_count: AtomicU64::new(0),
            }
        }
    }

    impl AppHook for RecordingHook {
        fn seed_walks(&self, _pool: &WalkPool, _codec: &CodecFields, _n: u64, _intervals: &[Interval]) {}
        fn on_visit(&self, source: u64, vertex: u64, hop: u64, _thread_id: usize) {
            self.visits.lock().unwrap().push((source, vertex, hop));
            self.visit_count.fetch_add(1, Ordering::Relaxed);
        }
        fn before_interval(&self, _p: usize, _lo: u64, _hi: u64) {}
        fn after_interval(&self, _p: usize, _lo: u64, _hi: u64) {}
        fn continuation_policy(&self, deg: u64, rng: &mut WalkRng) -> Continuation {
            restart_policy(self.alpha, deg, rng)
        }
    }

    fn triangle_shard() -> (ShardView, Vec<Interval>) {
        // N=3, edges 0->1, 1->2, 2->0, single shard.
        let interval = Interval { lo: 0, hi: 2 };
        let view = ShardView {
            shard: 0,
            interval,
            beg_pos: vec![0, 1, 2, 3],
            csr: vec![1, 2, 0],
        };
        (view, vec![interval])
    }

    #[test]
    fn zero_degree_vertex_terminates_without_move() {
        let interval = Interval { lo: 0, hi: 1 };
        let view = ShardView {
            shard: 0,
            interval,
            beg_pos: vec![0, 1, 1],
            csr: vec![1],
        };
        let intervals = vec![interval];
        let codec = CodecFields::default();
        let pool = WalkPool::new(1, 1);
        let hook = RecordingHook::new(0.0);

        let w = codec.encode(0, 0, 0).unwrap();
        step(w, 0, &view, &intervals, &codec, 5, &pool, &hook, 0, 42);

        assert_eq!(*hook.visits.lock().unwrap(), vec![(0, 0, 0), (0, 1, 1)]);
        assert_eq!(pool.total_live(), 0);
    }

    #[test]
    fn hop_budget_terminates_walk_without_move() {
        let (view, intervals) = triangle_shard();
        let codec = CodecFields::default();
        let pool = WalkPool::new(1, 1);
        let hook = RecordingHook::new(0.0); // never stop early

        let w = codec.encode(0, 0, 0).unwrap();
        step(w, 0, &view, &intervals, &codec, 3, &pool, &hook, 0, 7);

        assert_eq!(hook.visit_count.load(Ordering::Relaxed), 3);
        assert_eq!(pool.total_live(), 0);
    }

    #[test]
    fn leaving_the_shard_moves_the_walk() {
        let interval_a = Interval { lo: 0, hi: 0 };
        let interval_b = Interval { lo: 1, hi: 1 };
        let intervals = vec![interval_a, interval_b];
        let view = ShardView {
            shard: 0,
            interval: interval_a,
            beg_pos: vec![0, 1],
            csr: vec![1],
        };
        let codec = CodecFields::default();
        let pool = WalkPool::new(1, 2);
        let hook = RecordingHook::new(0.0);

        let w = codec.encode(5, 0, 0).unwrap();
        step(w, 0, &view, &intervals, &codec, 10, &pool, &hook, 0, 1);

        assert_eq!(pool.total_live(), 1);
        assert_eq!(pool.walknum(1), 1);
        assert_eq!(pool.walknum(0), 0);
    }
}
