//! Engine configuration: loaded from YAML, overridable from the CLI.
//!
//! Every option is `Option<T>` on the wire so a YAML file can specify only
//! what it wants to override; `Config::resolve` fills in the documented
//! default for anything left unset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::CodecFields;
use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawConfig {
    pub file: Option<String>,
    pub nvertices: Option<u64>,
    #[serde(rename = "R")]
    pub r: Option<u32>,
    #[serde(rename = "L")]
    pub l: Option<u32>,
    pub shardsize: Option<u64>,
    pub membudget_mb: Option<u64>,
    pub execthreads: Option<usize>,
    pub prob: Option<f64>,
    pub semi_external: Option<bool>,
    pub tail: Option<f64>,
    pub counter_width: Option<u8>,
    pub source_bits: Option<u32>,
    pub offset_bits: Option<u32>,
    pub hop_bits: Option<u32>,
}

/// Fully resolved configuration: every field has a concrete value.
#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub nvertices: u64,
    pub r: u32,
    pub l: u32,
    pub shardsize: u64,
    pub membudget_mb: u64,
    pub execthreads: usize,
    pub prob: f64,
    pub semi_external: bool,
    pub tail: f64,
    pub counter_width: u8,
    pub codec: CodecFields,
}

impl Config {
    /// Loads a `RawConfig` from a YAML file.
    pub fn load(path: &Path) -> Result<RawConfig> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let raw: RawConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(raw)
    }

    /// Resolves a `RawConfig` into a fully-defaulted, validated `Config`.
    pub fn resolve(raw: RawConfig) -> Result<Config, EngineError> {
        let file = raw
            .file
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::ConfigInvalid("missing required option `file`".into()))?;
        let nvertices = raw
            .nvertices
            .ok_or_else(|| EngineError::ConfigInvalid("missing required option `nvertices`".into()))?;
        if nvertices == 0 {
            return Err(EngineError::ConfigInvalid("nvertices must be > 0".into()));
        }
        let shardsize = raw
            .shardsize
            .ok_or_else(|| EngineError::ConfigInvalid("missing required option `shardsize`".into()))?;
        if shardsize == 0 {
            return Err(EngineError::ConfigInvalid("shardsize must be > 0".into()));
        }

        let r = raw.r.unwrap_or(1);
        let l = raw.l.unwrap_or(20);
        if l == 0 {
            return Err(EngineError::ConfigInvalid("L (max walk length) must be > 0".into()));
        }
        let membudget_mb = raw.membudget_mb.unwrap_or(1024);
        let execthreads = raw.execthreads.filter(|&t| t > 0).unwrap_or_else(num_cpus::get);
        let prob = raw.prob.unwrap_or(0.2);
        if !(0.0..=1.0).contains(&prob) {
            return Err(EngineError::ConfigInvalid(format!(
                "prob must be within [0, 1], got {prob}"
            )));
        }
        let tail = raw.tail.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&tail) {
            return Err(EngineError::ConfigInvalid(format!(
                "tail must be within [0, 1], got {tail}"
            )));
        }
        let counter_width = raw.counter_width.unwrap_or(4);
        if counter_width != 4 && counter_width != 8 {
            return Err(EngineError::ConfigInvalid(format!(
                "counter_width must be 4 or 8, got {counter_width}"
            )));
        }
        let codec = CodecFields {
            source_bits: raw.source_bits.unwrap_or(28),
            offset_bits: raw.offset_bits.unwrap_or(28),
            hop_bits: raw.hop_bits.unwrap_or(8),
        };

        Ok(Config {
            file,
            nvertices,
            r,
            l,
            shardsize,
            membudget_mb,
            execthreads,
            prob,
            semi_external: raw.semi_external.unwrap_or(false),
            tail,
            counter_width,
            codec,
        })
    }

    /// Path of the intervals file, derived from `file`: `{file}.intervals`.
    pub fn intervals_path(&self) -> PathBuf {
        with_suffix(&self.file, "intervals")
    }

    /// Path of shard `p`'s adjacency file: `{file}.shard.{p}`.
    pub fn shard_path(&self, p: usize) -> PathBuf {
        with_suffix(&self.file, &format!("shard.{p}"))
    }

    /// Path of shard `p`'s walk spill file: `{file}.walks.{p}`.
    pub fn spill_path(&self, p: usize) -> PathBuf {
        with_suffix(&self.file, &format!("walks.{p}"))
    }

    /// Path of the persistent visit-count file: `{file}.visits`.
    pub fn visits_path(&self) -> PathBuf {
        with_suffix(&self.file, "visits")
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}
