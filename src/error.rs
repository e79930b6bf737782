//! Fatal error kinds for the walk engine.
//!
//! All variants are fatal: the engine is a batch job and partial-failure
//! recovery across intervals would require journaling, which is explicitly
//! out of scope. Shard and spill I/O get a bounded retry (see `retry_io`)
//! before escalating to one of these.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to read shard {shard} from {path:?}: {source}")]
    ShardIoError {
        shard: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read or write walk spill for shard {shard} at {path:?}: {source}")]
    SpillIoError {
        shard: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "walk ({source}, {offset}, {hop}) overflows codec field widths {fields:?}"
    )]
    CodecOverflow {
        source: u64,
        offset: u64,
        hop: u64,
        fields: crate::codec::CodecFields,
    },

    #[error("intervals file {path:?} is malformed: {reason}")]
    IntervalCorrupt { path: PathBuf, reason: String },
}

impl EngineError {
    /// Process exit code for this error, per the external-interfaces contract:
    /// 0 is reserved for success, every fatal kind maps to a distinct
    /// non-zero code so operators can distinguish failure classes from shell
    /// exit status alone.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::ConfigInvalid(_) => 2,
            EngineError::ShardIoError { .. } => 3,
            EngineError::SpillIoError { .. } => 4,
            EngineError::CodecOverflow { .. } => 5,
            EngineError::IntervalCorrupt { .. } => 6,
        }
    }
}

/// Retries a fallible I/O operation up to `attempts` times with exponential
/// backoff, returning the last error once exhausted.
///
/// Mirrors the retry policy for shard reads and spill I/O: transient
/// failures (e.g. a flaky network filesystem) are retried, but the engine
/// never silently drops a walk or a shard.
pub fn retry_io<T>(
    attempts: u32,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> std::io::Result<T> {
    let mut last_err = None;
    for attempt in 0..attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt + 1 < attempts {
                    std::thread::sleep(std::time::Duration::from_millis(
                        20 * 2u64.pow(attempt),
                    ));
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("attempts > 0"))
}
