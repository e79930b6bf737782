//! Reference `AppHook`: PageRank approximation by visit-count accumulation.
//!
//! Grounded on `PageRank` in `examples/original_source/apps/pagerank.cpp`:
//! `R` walks seeded per source vertex, a per-thread visit counter merged
//! into a persistent, positionally-addressed counts file at each interval
//! boundary (`preada`/`pwritea` there, `FileExt::read_at`/`write_at` here),
//! or kept fully resident under `semi_external` mode.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::codec::CodecFields;
use crate::hook::{restart_policy, AppHook, Continuation};
use crate::pool::WalkPool;
use crate::rng::WalkRng;
use crate::shard::Interval;

struct Window {
    lo: u64,
    per_thread: Vec<Vec<u64>>,
}

/// Visit-count accumulator used as both the approximation signal and the
/// engine's continuation policy driver.
pub struct PageRankHook {
    alpha: f64,
    r: u32,
    threads: usize,
    counter_width: u8,
    visits_path: PathBuf,
    semi_external: bool,
    /// Only populated when `semi_external`: `counters[thread][vertex]`,
    /// resident for the whole run, merged once via `finalize`.
    semi_counters: Option<Vec<Mutex<Vec<u64>>>>,
    /// Only populated outside `semi_external`: the current interval's
    /// per-thread window, allocated in `before_interval`.
    window: Mutex<Option<Window>>,
}

impl PageRankHook {
    pub fn new(
        alpha: f64,
        r: u32,
        threads: usize,
        counter_width: u8,
        nvertices: u64,
        semi_external: bool,
        visits_path: PathBuf,
    ) -> Self {
        let semi_counters = semi_external.then(|| {
            (0..threads)
                .map(|_| Mutex::new(vec![0u64; nvertices as usize]))
                .collect()
        });
        Self {
            alpha,
            r,
            threads,
            counter_width,
            visits_path,
            semi_external,
            semi_counters,
            window: Mutex::new(None),
        }
    }

    /// Writes the semi-external counters to `visits_path`, summed across
    /// threads. Call once after the engine loop finishes; a no-op when the
    /// hook isn't running in `semi_external` mode.
    pub fn finalize(&self) -> io::Result<()> {
        let Some(counters) = &self.semi_counters else {
            return Ok(());
        };
        let n = counters[0].lock().len();
        let mut total = vec![0u64; n];
        for c in counters {
            let c = c.lock();
            for (i, &v) in c.iter().enumerate() {
                total[i] += v;
            }
        }
        write_window(&self.visits_path, 0, &total, self.counter_width)
    }
}

impl AppHook for PageRankHook {
    fn seed_walks(&self, pool: &WalkPool, codec: &CodecFields, _nvertices: u64, intervals: &[Interval]) {
        let mut total = 0u64;
        for (p, interval) in intervals.iter().enumerate() {
            for v in interval.lo..=interval.hi {
                let offset = v - interval.lo;
                let t = (offset as usize) % self.threads;
                match codec.encode(v, offset, 0) {
                    Ok(word) => {
                        for _ in 0..self.r {
                            pool.seed(p, t, word, 0);
                            total += 1;
                        }
                    }
                    Err(e) => {
                        debug!(component = "pagerank_hook", event = "seed_skip", vertex = v, error = %e, "codec overflow seeding walk");
                    }
                }
            }
        }
        debug!(component = "pagerank_hook", event = "seeded", total_walks = total, "pagerank walks seeded");
    }

    fn on_visit(&self, _source: u64, vertex: u64, _hop: u64, thread_id: usize) {
        if let Some(counters) = &self.semi_counters {
            counters[thread_id].lock()[vertex as usize] += 1;
            return;
        }
        let mut guard = self.window.lock();
        if let Some(window) = guard.as_mut() {
            let local = (vertex - window.lo) as usize;
            window.per_thread[thread_id][local] += 1;
        }
    }

    fn before_interval(&self, _p: usize, lo: u64, hi: u64) {
        if self.semi_external {
            return;
        }
        let len = (hi - lo + 1) as usize;
        *self.window.lock() = Some(Window {
            lo,
            per_thread: vec![vec![0u64; len]; self.threads],
        });
    }

    fn after_interval(&self, p: usize, lo: u64, hi: u64) {
        if self.semi_external {
            return;
        }
        let window = match self.window.lock().take() {
            Some(w) => w,
            None => return,
        };
        let len = (hi - lo + 1) as usize;
        let mut merged = match read_window(&self.visits_path, lo, len, self.counter_width) {
            Ok(m) => m,
            Err(e) => {
                debug!(component = "pagerank_hook", event = "read_window_failed", shard = p, error = %e, "treating window as zero");
                vec![0u64; len]
            }
        };
        for per_thread in &window.per_thread {
            for (i, &c) in per_thread.iter().enumerate() {
                merged[i] += c;
            }
        }
        if let Err(e) = write_window(&self.visits_path, lo, &merged, self.counter_width) {
            debug!(component = "pagerank_hook", event = "write_window_failed", shard = p, error = %e, "visit counts not persisted for this interval");
        }
    }

    fn continuation_policy(&self, deg: u64, rng: &mut WalkRng) -> Continuation {
        restart_policy(self.alpha, deg, rng)
    }
}

fn read_window(path: &Path, lo: u64, len: usize, counter_width: u8) -> io::Result<Vec<u64>> {
    let mut out = vec![0u64; len];
    if !path.exists() {
        return Ok(out);
    }
    let file = File::open(path)?;
    let width = counter_width as u64;
    let file_len = file.metadata()?.len();
    let start = lo * width;
    let mut buf = [0u8; 8];
    for (i, slot) in out.iter_mut().enumerate() {
        let off = start + (i as u64) * width;
        if off + width > file_len {
            continue; // never written: treat as zero.
        }
        file.read_exact_at(&mut buf[..width as usize], off)?;
        *slot = match counter_width {
            4 => u32::from_le_bytes(buf[0..4].try_into().unwrap()) as u64,
            _ => u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        };
    }
    Ok(out)
}

fn write_window(path: &Path, lo: u64, counts: &[u64], counter_width: u8) -> io::Result<()> {
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    let width = counter_width as u64;
    for (i, &c) in counts.iter().enumerate() {
        let off = lo * width + (i as u64) * width;
        match counter_width {
            4 => file.write_all_at(&(c as u32).to_le_bytes(), off)?,
            _ => file.write_all_at(&c.to_le_bytes(), off)?,
        }
    }
    Ok(())
}
