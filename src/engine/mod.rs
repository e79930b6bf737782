//! Engine Loop: drives the interval-by-interval iteration.
//!
//! Grounded on `graphwalker_engine::run` in
//! `examples/original_source/src/engine/graphwalker.hpp`: pick a shard,
//! load it, run the kernel over the resident walks in parallel, spill
//! dirty shards, release, repeat. The parallel step uses a `rayon`
//! thread pool sized to `execthreads`: a bounded data-parallel compute
//! step over an already-resident buffer, rather than a task-per-connection
//! async model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::hook::AppHook;
use crate::kernel;
use crate::pool::WalkPool;
use crate::shard::ShardStore;
use crate::scheduler::IntervalScheduler;

/// Observable interval state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    ShardLoaded,
    WalksResident,
    Draining,
    Spilled,
}

pub struct Engine {
    cfg: Config,
    shard_store: ShardStore,
    pool: WalkPool,
    scheduler: IntervalScheduler,
    hook: Arc<dyn AppHook>,
    thread_pool: rayon::ThreadPool,
    stop: Arc<AtomicBool>,
    seed_base: u64,
}

impl Engine {
    /// `hook` is `Arc<dyn AppHook>` rather than `Box` so the caller can keep
    /// its own handle to the concrete hook (e.g. to call a
    /// finalization step not part of the `AppHook` trait) after the engine
    /// itself is dropped.
    pub fn new(cfg: Config, hook: Arc<dyn AppHook>, stop: Arc<AtomicBool>) -> Result<Self, EngineError> {
        Self::with_seed(cfg, hook, stop, 0x5EED)
    }

    /// Constructs the engine with an explicit RNG seed stream, for the
    /// seed-injection test mode.
    pub fn with_seed(
        cfg: Config,
        hook: Arc<dyn AppHook>,
        stop: Arc<AtomicBool>,
        seed_base: u64,
    ) -> Result<Self, EngineError> {
        let shard_store = ShardStore::open(&cfg)?;
        cfg.codec
            .validate(cfg.nvertices, shard_store.max_interval_width(), cfg.l as u64)?;

        let pool = WalkPool::new(cfg.execthreads, shard_store.shard_count());
        let scheduler = IntervalScheduler::new(cfg.prob);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.execthreads)
            .build()
            .map_err(|e| EngineError::ConfigInvalid(format!("failed to build worker pool: {e}")))?;

        info!(
            component = "engine",
            event = "configured",
            shards = shard_store.shard_count(),
            execthreads = cfg.execthreads,
            "engine configured"
        );

        Ok(Self {
            cfg,
            shard_store,
            pool,
            scheduler,
            hook,
            thread_pool,
            stop,
            seed_base,
        })
    }

    pub fn total_live(&self) -> u64 {
        self.pool.total_live()
    }

    /// Runs until every walk has terminated or the cooperative stop flag
    /// is set. On stop, spills the entire pool to disk before returning so
    /// no walk state is lost.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.run_while(|_live, _initial| true)
    }

    /// Runs until `total_live() <= tail * total_initial_walks`, the
    /// convergence check named by the `tail` config option. `initial` is
    /// the walk count observed immediately after seeding, not before.
    pub fn run_until_converged(&mut self, tail: f64) -> Result<(), EngineError> {
        self.run_while(move |live, initial| (live as f64) > tail * (initial as f64))
    }

    fn run_while(&mut self, mut keep_going: impl FnMut(u64, u64) -> bool) -> Result<(), EngineError> {
        self.hook.seed_walks(
            &self.pool,
            &self.cfg.codec,
            self.cfg.nvertices,
            self.shard_store.intervals(),
        );
        let initial = self.pool.total_live();
        info!(component = "engine", event = "seeded", total_walks = initial, "initial walks seeded");

        let mut interval_count: u64 = 0;
        let mut state = EngineState::Idle;

        while keep_going(self.pool.total_live(), initial) {
            if self.stop.load(Ordering::Relaxed) {
                warn!(component = "engine", event = "stop_requested", "cooperative stop observed, spilling pool");
                break;
            }

            let p = match self
                .scheduler
                .pick(&self.pool, self.seed_base.wrapping_add(interval_count))
            {
                Some(p) => p,
                None => break, // total_live() == 0: terminal state.
            };

            let shard_path = self.cfg.shard_path(p);
            let view = self.shard_store.load(&shard_path, p)?;
            state = EngineState::ShardLoaded;

            self.pool.freshen(p, &self.cfg.spill_path(p), &self.cfg.codec)?;
            state = EngineState::WalksResident;

            self.hook.before_interval(p, view.interval.lo, view.interval.hi);

            let buckets = self.pool.take_resident(p);
            let intervals = self.shard_store.intervals();
            let codec = &self.cfg.codec;
            let max_hops = self.cfg.l as u64;
            let pool = &self.pool;
            let hook = self.hook.as_ref();
            let seed = self.seed_base;

            self.thread_pool.install(|| {
                buckets.into_par_iter().enumerate().for_each(|(t, walks)| {
                    for w in walks.into_iter() {
                        // `source` is the only field a walk carries unchanged
                        // across migrations, spills and freshens: unlike the
                        // thread bucket and in-bucket position it just drained
                        // from, it doesn't shift when `execthreads` changes or
                        // when this interval lands at a different ordinal, so
                        // it's the one stable key the per-walk RNG can seed
                        // from.
                        let (source, _, _) = codec.decode(w);
                        let walk_index = source;
                        kernel::step(w, walk_index, &view, intervals, codec, max_hops, pool, hook, t, seed);
                    }
                });
            });
            state = EngineState::Draining;

            self.hook.after_interval(p, view.interval.lo, view.interval.hi);

            for q in 0..self.shard_store.shard_count() {
                if q != p && self.pool.is_dirty(q) {
                    self.pool.spill(q, &self.cfg.spill_path(q), &self.cfg.codec)?;
                }
            }
            state = EngineState::Spilled;

            self.shard_store.release(view);
            state = EngineState::Idle;

            interval_count += 1;
            if interval_count % 10 == 1 {
                info!(
                    component = "engine",
                    event = "interval",
                    interval = interval_count,
                    shard = p,
                    live = self.pool.total_live(),
                    state = ?state,
                    "interval complete"
                );
            }
        }

        if self.stop.load(Ordering::Relaxed) {
            for q in 0..self.shard_store.shard_count() {
                if self.pool.is_dirty(q) {
                    self.pool.spill(q, &self.cfg.spill_path(q), &self.cfg.codec)?;
                }
            }
        }

        info!(
            component = "engine",
            event = "finished",
            intervals = interval_count,
            remaining_live = self.pool.total_live(),
            "engine loop finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecFields;
    use crate::hook::{restart_policy, Continuation};
    use crate::shard::{write_shard_file, Interval};
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    /// A minimal PageRank-style hook for engine-level tests.
    struct TestHook {
        alpha: f64,
        r: u32,
        visits: Mutex<std::collections::HashMap<u64, u64>>,
        seeded: AtomicU64,
    }

    impl TestHook {
        fn new(alpha: f64, r: u32) -> Self {
            Self {
                alpha,
                r,
                visits: Mutex::new(std::collections::HashMap::new()),
                seeded: AtomicU64::new(0),
            }
        }
    }

    impl AppHook for TestHook {
        fn seed_walks(&self, pool: &WalkPool, codec: &CodecFields, n: u64, intervals: &[Interval]) {
            for interval in intervals {
                for v in interval.lo..=interval.hi {
                    let offset = v - interval.lo;
                    let word = codec.encode(v, offset, 0).unwrap();
                    for _ in 0..self.r {
                        pool.seed(intervals.iter().position(|iv| iv.contains(v)).unwrap(), 0, word, 0);
                        self.seeded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            let _ = n;
        }

        fn on_visit(&self, _source: u64, vertex: u64, _hop: u64, _thread_id: usize) {
            *self.visits.lock().unwrap().entry(vertex).or_insert(0) += 1;
        }

        fn before_interval(&self, _p: usize, _lo: u64, _hi: u64) {}
        fn after_interval(&self, _p: usize, _lo: u64, _hi: u64) {}

        fn continuation_policy(&self, deg: u64, rng: &mut crate::rng::WalkRng) -> Continuation {
            restart_policy(self.alpha, deg, rng)
        }
    }

    fn write_fixture(dir: &std::path::Path, base: &str, adjacency_per_shard: &[Vec<Vec<u32>>], intervals: &[(u64, u64)]) {
        let mut intervals_file = File::create(dir.join(format!("{base}.intervals"))).unwrap();
        for (_, hi) in intervals {
            writeln!(intervals_file, "{hi}").unwrap();
        }
        for (p, adjacency) in adjacency_per_shard.iter().enumerate() {
            write_shard_file(&dir.join(format!("{base}.shard.{p}")), adjacency).unwrap();
        }
    }

    #[test]
    fn triangle_scenario_s1_terminates_and_conserves_visits() {
        // S1: N=3, edges 0->1, 1->2, 2->0, single shard, R=1, L=3, alpha=0.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g").to_str().unwrap().to_string();
        write_fixture(
            dir.path(),
            "g",
            &[vec![vec![1], vec![2], vec![0]]],
            &[(0, 2)],
        );

        let raw = crate::config::RawConfig {
            file: Some(base),
            nvertices: Some(3),
            shardsize: Some(1),
            r: Some(1),
            l: Some(3),
            prob: Some(0.0),
            ..Default::default()
        };
        let cfg = Config::resolve(raw).unwrap();
        let hook = Arc::new(TestHook::new(0.0, 1));
        let stop = Arc::new(AtomicBool::new(false));
        let mut engine = Engine::with_seed(cfg, hook, stop, 1).unwrap();
        engine.run().unwrap();

        assert_eq!(engine.total_live(), 0);
    }

    #[test]
    fn sink_scenario_s2_terminates_at_zero_degree() {
        // S2: N=2, edge 0->1 only, R=10, L=5.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g").to_str().unwrap().to_string();
        write_fixture(dir.path(), "g", &[vec![vec![1], vec![]]], &[(0, 1)]);

        let raw = crate::config::RawConfig {
            file: Some(base),
            nvertices: Some(2),
            shardsize: Some(1),
            r: Some(10),
            l: Some(5),
            prob: Some(0.0),
            ..Default::default()
        };
        let cfg = Config::resolve(raw).unwrap();
        let hook = Arc::new(TestHook::new(0.0, 10));
        let stop = Arc::new(AtomicBool::new(false));
        let mut engine = Engine::with_seed(cfg, hook, stop, 2).unwrap();
        engine.run().unwrap();

        assert_eq!(engine.total_live(), 0);
    }

    #[test]
    fn two_shard_migration_scenario_s3_spills_and_freshens() {
        // N=6, ring i -> (i+1) mod 6, split into two shards of width 3.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g").to_str().unwrap().to_string();
        write_fixture(
            dir.path(),
            "g",
            &[
                vec![vec![1], vec![2], vec![3]],
                vec![vec![4], vec![5], vec![0]],
            ],
            &[(0, 2), (3, 5)],
        );

        let raw = crate::config::RawConfig {
            file: Some(base),
            nvertices: Some(6),
            shardsize: Some(1),
            r: Some(1),
            l: Some(20),
            prob: Some(0.2),
            ..Default::default()
        };
        let cfg = Config::resolve(raw).unwrap();
        let hook = Arc::new(TestHook::new(0.0, 1));
        let stop = Arc::new(AtomicBool::new(false));
        let mut engine = Engine::with_seed(cfg, hook, stop, 3).unwrap();
        engine.run().unwrap();

        assert_eq!(engine.total_live(), 0);
    }

    #[test]
    fn cooperative_stop_spills_rather_than_losing_walks() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g").to_str().unwrap().to_string();
        write_fixture(
            dir.path(),
            "g",
            &[
                vec![vec![1], vec![2], vec![3]],
                vec![vec![4], vec![5], vec![0]],
            ],
            &[(0, 2), (3, 5)],
        );

        let raw = crate::config::RawConfig {
            file: Some(base),
            nvertices: Some(6),
            shardsize: Some(1),
            r: Some(50),
            l: Some(1000),
            prob: Some(0.2),
            ..Default::default()
        };
        let cfg = Config::resolve(raw).unwrap();
        let hook = Arc::new(TestHook::new(0.15, 50));
        let stop = Arc::new(AtomicBool::new(true)); // request stop before the first interval.
        let mut engine = Engine::with_seed(cfg, hook, stop, 4).unwrap();
        engine.run().unwrap();

        // Walks are still live (seeded, never stepped) but fully spilled.
        assert!(engine.total_live() > 0);
    }
}
