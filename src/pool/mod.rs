//! Walk Pool: the in-memory + on-disk container of parked walks,
//! partitioned `[thread][shard]`.
//!
//! Grounded on `advcache::db::storage::Shard`'s split between an atomic
//! scalar summary (`mem`, `len`) and a lock-protected body (`ShardData`):
//! here every `(thread, shard)` cell is its own small lock-protected `Vec`,
//! so that cross-shard migration from thread `t` only ever contends with
//! thread `t` itself — in practice never, since each thread only writes
//! cells in its own row.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::error::EngineError;

/// Per-shard scheduling counters, updated under relaxed atomics during an
/// interval and reconciled (fenced) at `freshen`/`spill` boundaries.
struct ShardCounters {
    walknum: AtomicI64,
    minstep: AtomicU32,
    dirty: AtomicBool,
}

impl ShardCounters {
    fn new() -> Self {
        Self {
            walknum: AtomicI64::new(0),
            minstep: AtomicU32::new(u32::MAX),
            dirty: AtomicBool::new(false),
        }
    }
}

/// The parked-walk pool, partitioned `pwalks[t][p]` with per-shard spill
/// files and scheduling counters.
pub struct WalkPool {
    threads: usize,
    shards: usize,
    /// `cells[t * shards + p]`.
    cells: Vec<Mutex<Vec<u64>>>,
    counters: Vec<ShardCounters>,
}

impl WalkPool {
    pub fn new(threads: usize, shards: usize) -> Self {
        let mut cells = Vec::with_capacity(threads * shards);
        for _ in 0..threads * shards {
            cells.push(Mutex::new(Vec::new()));
        }
        let mut counters = Vec::with_capacity(shards);
        for _ in 0..shards {
            counters.push(ShardCounters::new());
        }
        Self {
            threads,
            shards,
            cells,
            counters,
        }
    }

    fn cell_index(&self, t: usize, p: usize) -> usize {
        debug_assert!(t < self.threads && p < self.shards);
        t * self.shards + p
    }

    /// Appends walk `w` (hop `hop`) to `pwalks[t][p]` and updates the
    /// shard's scheduling counters. Used both for initial seeding and for
    /// cross-shard migration (`move_walk`).
    fn append(&self, p: usize, t: usize, w: u64, hop: u64) {
        let idx = self.cell_index(t, p);
        self.cells[idx].lock().push(w);

        let counters = &self.counters[p];
        counters.walknum.fetch_add(1, Ordering::Relaxed);
        let hop32 = hop.min(u32::MAX as u64) as u32;
        let mut cur = counters.minstep.load(Ordering::Relaxed);
        while hop32 < cur {
            match counters.minstep.compare_exchange_weak(
                cur,
                hop32,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Seeds an initial walk into shard `p`'s thread-`t` bucket.
    pub fn seed(&self, p: usize, t: usize, w: u64, hop: u64) {
        self.append(p, t, w, hop);
    }

    /// Moves a walk that just left its resident shard into `p_dst`'s
    /// thread-`t` bucket. `w` must already be re-encoded with its offset
    /// relative to `p_dst`. Marks `p_dst` dirty so the engine loop spills
    /// it at the end of the current interval if it isn't the one becoming
    /// resident next.
    pub fn move_walk(&self, w: u64, p_dst: usize, t: usize, hop: u64) {
        self.append(p_dst, t, w, hop);
        self.counters[p_dst].dirty.store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self, p: usize) -> bool {
        self.counters[p].dirty.load(Ordering::Relaxed)
    }

    pub fn walknum(&self, p: usize) -> i64 {
        self.counters[p].walknum.load(Ordering::Relaxed)
    }

    /// Total live walks across every shard; `0` signals termination.
    pub fn total_live(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| c.walknum.load(Ordering::Relaxed).max(0) as u64)
            .sum()
    }

    /// Shard whose laggard walks have taken the fewest hops, tie-breaking
    /// by ascending shard index. Skips shards with no live walks.
    pub fn min_step_shard(&self) -> Option<usize> {
        (0..self.shards)
            .filter(|&p| self.walknum(p) > 0)
            .min_by_key(|&p| (self.counters[p].minstep.load(Ordering::Relaxed), p))
    }

    /// Shard with the most parked walks, tie-breaking by ascending shard
    /// index. Skips shards with no live walks.
    pub fn max_walk_shard(&self) -> Option<usize> {
        (0..self.shards)
            .filter(|&p| self.walknum(p) > 0)
            .max_by_key(|&p| (self.walknum(p), std::cmp::Reverse(p)))
    }

    /// Drains `pwalks[*][p]` into a flat owned vec for the engine loop to
    /// step in parallel, one sub-vec per thread (so each worker thread
    /// steps only the walks it already owns, with no cross-thread
    /// contention during the interval).
    pub fn take_resident(&self, p: usize) -> Vec<Vec<u64>> {
        let mut out = Vec::with_capacity(self.threads);
        for t in 0..self.threads {
            let idx = self.cell_index(t, p);
            out.push(std::mem::take(&mut *self.cells[idx].lock()));
        }
        // The drained bucket is now empty: walks that migrate back in
        // during this interval bump these counters back up via `append`,
        // but the pre-drain values must not linger, or `walknum` would
        // count walks twice and `minstep` would stay pinned below any
        // walk that has actually advanced.
        self.counters[p].walknum.store(0, Ordering::Relaxed);
        self.counters[p].minstep.store(u32::MAX, Ordering::Relaxed);
        out
    }

    /// Called when shard `p` becomes resident: merges the on-disk spill
    /// into thread buckets round-robin, clears the spill file, and
    /// recomputes `walknum`/`minstep` from the merged bucket contents.
    pub fn freshen(&self, p: usize, spill_path: &Path, codec: &crate::codec::CodecFields) -> Result<(), EngineError> {
        // `minstep[p]` only ever moves down via `track_minstep`, so it must
        // be reset before rebuilding it, or it stays pinned at whatever it
        // was the last time this shard held a fresh (hop 0) walk. Rebuild
        // it from every walk that will be resident after this call: both
        // the ones already sitting in `p`'s cells (migrated in via
        // `move_walk` since the last drain) and the ones just thawed from
        // the spill file.
        self.counters[p].minstep.store(u32::MAX, Ordering::Relaxed);
        for t in 0..self.threads {
            let idx = self.cell_index(t, p);
            for &w in self.cells[idx].lock().iter() {
                let (_, _, hop) = codec.decode(w);
                self.track_minstep(p, hop);
            }
        }

        let words = read_spill(spill_path, p)?;
        for (i, w) in words.into_iter().enumerate() {
            let t = i % self.threads;
            let idx = self.cell_index(t, p);
            self.cells[idx].lock().push(w);
            let (_, _, hop) = codec.decode(w);
            self.track_minstep(p, hop);
        }
        if spill_path.exists() {
            std::fs::remove_file(spill_path).map_err(|source| EngineError::SpillIoError {
                shard: p,
                path: spill_path.to_path_buf(),
                source,
            })?;
        }

        let total: i64 = (0..self.threads)
            .map(|t| self.cells[self.cell_index(t, p)].lock().len() as i64)
            .sum();
        self.counters[p].walknum.store(total, Ordering::Relaxed);
        self.counters[p].dirty.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn track_minstep(&self, p: usize, hop: u64) {
        let hop32 = hop.min(u32::MAX as u64) as u32;
        let counters = &self.counters[p];
        let mut cur = counters.minstep.load(Ordering::Relaxed);
        while hop32 < cur {
            match counters.minstep.compare_exchange_weak(
                cur,
                hop32,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Serializes `pwalks[*][p]` to `walks_p`, appending to whatever is
    /// already spilled there (multiple non-resident intervals can each
    /// contribute walks before the shard is next freshened), then clears
    /// the in-memory buckets. No-op if `p` isn't dirty.
    pub fn spill(&self, p: usize, spill_path: &Path, codec: &crate::codec::CodecFields) -> Result<(), EngineError> {
        if !self.is_dirty(p) {
            return Ok(());
        }

        let mut batch = Vec::new();
        for t in 0..self.threads {
            let idx = self.cell_index(t, p);
            let mut cell = self.cells[idx].lock();
            batch.append(&mut cell);
        }

        append_spill(spill_path, p, &batch, codec)?;
        self.counters[p].dirty.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Reads every packed walk word currently in shard `p`'s spill file.
/// Returns an empty vec if the file doesn't exist yet (a shard that has
/// never received a migrated walk).
fn read_spill(path: &Path, p: usize) -> Result<Vec<u64>, EngineError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| EngineError::SpillIoError {
            shard: p,
            path: path.to_path_buf(),
            source,
        })?;

    let result = (|| -> std::io::Result<Vec<u64>> {
        let count = file.read_u64::<LittleEndian>()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(file.read_u64::<LittleEndian>()?);
        }
        Ok(out)
    })();

    result.map_err(|source| EngineError::SpillIoError {
        shard: p,
        path: path.to_path_buf(),
        source,
    })
}

/// Appends `batch` to shard `p`'s spill file, rewriting the 8-byte LE
/// count header to reflect the new total. Format: header `u64` count,
/// then `count` LE walk words, no per-walk metadata.
fn append_spill(
    path: &Path,
    p: usize,
    batch: &[u64],
    _codec: &crate::codec::CodecFields,
) -> Result<(), EngineError> {
    let map_err = |source: std::io::Error| EngineError::SpillIoError {
        shard: p,
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(map_err)?;

    let existing_count = if file.metadata().map_err(map_err)?.len() >= 8 {
        file.seek(SeekFrom::Start(0)).map_err(map_err)?;
        file.read_u64::<LittleEndian>().map_err(map_err)?
    } else {
        0
    };

    file.seek(SeekFrom::End(0)).map_err(map_err)?;
    for &w in batch {
        file.write_u64::<LittleEndian>(w).map_err(map_err)?;
    }

    file.seek(SeekFrom::Start(0)).map_err(map_err)?;
    file.write_u64::<LittleEndian>(existing_count + batch.len() as u64)
        .map_err(map_err)?;
    file.flush().map_err(map_err)?;

    Ok(())
}
