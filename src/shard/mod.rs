//! Shard Store: read-only on-disk CSR per shard, one shard resident at a
//! time.
//!
//! Grounded on `advcache::db::storage::Shard`'s shape (an id, an
//! immutable-while-resident payload, counters) but the payload here is a
//! flat CSR adjacency read straight off disk rather than a hash map, and
//! there is no write path: the shard store only ever serves the external
//! sharder's output.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::info;

use crate::config::Config;
use crate::error::{retry_io, EngineError};

/// A contiguous, inclusive vertex range `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: u64,
    pub hi: u64,
}

impl Interval {
    pub fn width(&self) -> u64 {
        self.hi - self.lo + 1
    }

    pub fn contains(&self, v: u64) -> bool {
        v >= self.lo && v <= self.hi
    }
}

/// Parses and validates the intervals file (one `hi_p` per line).
///
/// Enforces the Partition Coverage invariant: intervals are
/// sorted, disjoint, cover `[0, N)`, `lo_0 == 0`, `hi_{P-1} == N-1`.
pub fn load_intervals(path: &Path, nvertices: u64) -> Result<Vec<Interval>, EngineError> {
    let file = File::open(path).map_err(|e| EngineError::IntervalCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let reader = BufReader::new(file);

    let mut intervals = Vec::new();
    let mut lo = 0u64;
    for line in reader.lines() {
        let line = line.map_err(|e| EngineError::IntervalCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let hi: u64 = trimmed.parse().map_err(|_| EngineError::IntervalCorrupt {
            path: path.to_path_buf(),
            reason: format!("line {trimmed:?} is not a valid vertex id"),
        })?;
        if hi < lo {
            return Err(EngineError::IntervalCorrupt {
                path: path.to_path_buf(),
                reason: format!("interval hi={hi} precedes lo={lo}"),
            });
        }
        intervals.push(Interval { lo, hi });
        lo = hi + 1;
    }

    if intervals.is_empty() {
        return Err(EngineError::IntervalCorrupt {
            path: path.to_path_buf(),
            reason: "no intervals found".into(),
        });
    }
    let last_hi = intervals.last().unwrap().hi;
    if last_hi != nvertices - 1 {
        return Err(EngineError::IntervalCorrupt {
            path: path.to_path_buf(),
            reason: format!(
                "intervals cover up to {last_hi}, expected {}",
                nvertices - 1
            ),
        });
    }

    Ok(intervals)
}

/// Finds the shard index containing vertex `v`, or `None` if `v` is outside
/// every interval (which should not happen given Partition Coverage, but
/// the kernel treats an out-of-range destination as "leaves the graph").
pub fn shard_of(intervals: &[Interval], v: u64) -> Option<usize> {
    intervals
        .binary_search_by(|iv| {
            if v < iv.lo {
                std::cmp::Ordering::Greater
            } else if v > iv.hi {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .ok()
}

/// A resident shard's CSR adjacency, borrowed for the duration of one
/// engine-loop interval.
pub struct ShardView {
    pub shard: usize,
    pub interval: Interval,
    /// Prefix sums, length `n_p + 1`.
    pub beg_pos: Vec<u64>,
    /// Flat destination array, length `m_p`.
    pub csr: Vec<u32>,
}

impl ShardView {
    pub fn degree(&self, local: usize) -> u64 {
        self.beg_pos[local + 1] - self.beg_pos[local]
    }

    pub fn neighbors(&self, local: usize) -> &[u32] {
        let beg = self.beg_pos[local] as usize;
        let end = self.beg_pos[local + 1] as usize;
        &self.csr[beg..end]
    }
}

/// Reads shard files and hands out `ShardView`s, one at a time.
pub struct ShardStore {
    intervals: Vec<Interval>,
    retries: u32,
}

impl ShardStore {
    pub fn open(cfg: &Config) -> Result<Self, EngineError> {
        let intervals = load_intervals(&cfg.intervals_path(), cfg.nvertices)?;
        Ok(Self {
            intervals,
            retries: 3,
        })
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn shard_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn max_interval_width(&self) -> u64 {
        self.intervals.iter().map(|iv| iv.width()).max().unwrap_or(0)
    }

    /// Loads shard `p`'s CSR into memory, retrying transient I/O failures.
    ///
    /// Shard file format: for each vertex in `[lo, hi]`
    /// ascending, a `u32` LE out-degree followed by that many `u32` LE
    /// destination ids.
    pub fn load(&self, path: &Path, p: usize) -> Result<ShardView, EngineError> {
        let interval = self.intervals[p];
        let n = interval.width() as usize;

        let result = retry_io(self.retries, || read_shard_file(path, n));
        let (beg_pos, csr) = result.map_err(|source| EngineError::ShardIoError {
            shard: p,
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            component = "shard_store",
            event = "loaded",
            shard = p,
            vertices = n,
            edges = csr.len(),
            "shard resident"
        );

        Ok(ShardView {
            shard: p,
            interval,
            beg_pos,
            csr,
        })
    }

    /// Releases a resident shard. Present for symmetry with `load` and to
    /// make the drop point explicit in the engine loop, the way
    /// `advcache`'s `Shard Store` guarantee requires `release` to be called
    /// exactly once per `load`.
    pub fn release(&self, _view: ShardView) {}
}

fn read_shard_file(path: &Path, n: usize) -> std::io::Result<(Vec<u64>, Vec<u32>)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut beg_pos = Vec::with_capacity(n + 1);
    let mut csr = Vec::new();
    beg_pos.push(0u64);

    for _ in 0..n {
        let deg = reader.read_u32::<LittleEndian>()?;
        for _ in 0..deg {
            csr.push(reader.read_u32::<LittleEndian>()?);
        }
        beg_pos.push(csr.len() as u64);
    }

    // Confirm there is no trailing garbage (a cheap corruption check).
    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "trailing bytes after expected vertex count",
        ));
    }

    Ok((beg_pos, csr))
}

/// Writes a shard file in the format `read_shard_file` expects, for tests
/// and for tools that stage fixtures.
pub fn write_shard_file(path: &PathBuf, adjacency: &[Vec<u32>]) -> std::io::Result<()> {
    use std::io::Write;
    let mut w = std::io::BufWriter::new(File::create(path)?);
    for neighbors in adjacency {
        w.write_all(&(neighbors.len() as u32).to_le_bytes())?;
        for &dst in neighbors {
            w.write_all(&dst.to_le_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn shard_of_finds_containing_interval() {
        let intervals = vec![
            Interval { lo: 0, hi: 9 },
            Interval { lo: 10, hi: 19 },
            Interval { lo: 20, hi: 29 },
        ];
        assert_eq!(shard_of(&intervals, 0), Some(0));
        assert_eq!(shard_of(&intervals, 15), Some(1));
        assert_eq!(shard_of(&intervals, 29), Some(2));
        assert_eq!(shard_of(&intervals, 30), None);
    }

    #[test]
    fn load_intervals_rejects_incomplete_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.intervals");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"4\n9\n")
            .unwrap();
        let err = load_intervals(&path, 100).unwrap_err();
        assert!(matches!(err, EngineError::IntervalCorrupt { .. }));
    }

    #[test]
    fn load_intervals_accepts_full_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.intervals");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"4\n9\n")
            .unwrap();
        let intervals = load_intervals(&path, 10).unwrap();
        assert_eq!(
            intervals,
            vec![Interval { lo: 0, hi: 4 }, Interval { lo: 5, hi: 9 }]
        );
    }

    #[test]
    fn round_trips_shard_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.shard.0");
        let adjacency = vec![vec![1, 2], vec![], vec![0]];
        write_shard_file(&path, &adjacency).unwrap();
        let (beg_pos, csr) = read_shard_file(&path, 3).unwrap();
        assert_eq!(beg_pos, vec![0, 2, 2, 3]);
        assert_eq!(csr, vec![1, 2, 0]);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.shard.0");
        let mut f = File::create(&path).unwrap();
        f.write_all(&0u32.to_le_bytes()).unwrap();
        f.write_all(b"extra").unwrap();
        assert!(read_shard_file(&path, 1).is_err());
    }
}
