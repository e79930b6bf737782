// Main entrypoint for the walk engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use walkengine::config::{Config, RawConfig};
use walkengine::engine::Engine;
use walkengine::error::EngineError;
use walkengine::hook::pagerank::PageRankHook;

/// Restart probability for the bundled PageRank application hook. Distinct
/// from `--prob`, which governs the *scheduler's* shard choice, not a
/// walk's continuation policy.
const PAGERANK_ALPHA: f64 = 0.2;

/// Out-of-core random-walk engine for PageRank-style Monte-Carlo estimation
/// over graphs too large to fit in memory.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; CLI flags below override whatever it sets.
    #[arg(long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// Base filename of the preprocessed graph (shards, intervals, spills
    /// all derive their paths from this).
    #[arg(long)]
    file: Option<String>,

    /// Number of vertices in the graph.
    #[arg(long)]
    nvertices: Option<u64>,

    /// Walks seeded per source vertex.
    #[arg(short = 'R', long = "walks-per-source")]
    r: Option<u32>,

    /// Maximum hops before a walk is forcibly terminated.
    #[arg(short = 'L', long = "max-hops")]
    l: Option<u32>,

    /// Target shard size in megabytes, used by the external sharder (not
    /// reproduced here; consumed for validation against the preprocessed
    /// shard files).
    #[arg(long)]
    shardsize: Option<u64>,

    /// Soft cap on resident memory, in megabytes.
    #[arg(long)]
    membudget_mb: Option<u64>,

    /// Worker threads for the parallel stepping phase. Defaults to the
    /// number of logical CPUs.
    #[arg(long)]
    execthreads: Option<usize>,

    /// Scheduler's min-step selection probability.
    #[arg(long)]
    prob: Option<f64>,

    /// Keep visit counters fully resident instead of spilling them to the
    /// visits file between intervals.
    #[arg(long)]
    semi_external: Option<bool>,

    /// Fraction of walks whose non-termination is tolerated when checking
    /// for convergence.
    #[arg(long)]
    tail: Option<f64>,

    /// Width in bytes of each visit counter in the persisted counts file
    /// (4 or 8).
    #[arg(long)]
    counter_width: Option<u8>,
}

impl Args {
    fn into_raw_config(self) -> Result<RawConfig> {
        let mut raw = match self.cfg {
            Some(path) => Config::load(&path)?,
            None => RawConfig::default(),
        };
        if self.file.is_some() {
            raw.file = self.file;
        }
        if self.nvertices.is_some() {
            raw.nvertices = self.nvertices;
        }
        if self.r.is_some() {
            raw.r = self.r;
        }
        if self.l.is_some() {
            raw.l = self.l;
        }
        if self.shardsize.is_some() {
            raw.shardsize = self.shardsize;
        }
        if self.membudget_mb.is_some() {
            raw.membudget_mb = self.membudget_mb;
        }
        if self.execthreads.is_some() {
            raw.execthreads = self.execthreads;
        }
        if self.prob.is_some() {
            raw.prob = self.prob;
        }
        if self.semi_external.is_some() {
            raw.semi_external = self.semi_external;
        }
        if self.tail.is_some() {
            raw.tail = self.tail;
        }
        if self.counter_width.is_some() {
            raw.counter_width = self.counter_width;
        }
        Ok(raw)
    }
}

fn configure_logger() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().pretty())
        .init();
}

fn main() -> ExitCode {
    configure_logger();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(engine_err) = e.downcast_ref::<EngineError>() {
                error!(component = "main", event = "fatal", error = %engine_err, "engine run failed");
                return ExitCode::from(engine_err.exit_code() as u8);
            }
            error!(component = "main", event = "fatal", error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let raw = args.into_raw_config()?;
    let cfg = Config::resolve(raw).context("failed to resolve configuration")?;

    info!(
        component = "main",
        event = "config_resolved",
        file = %cfg.file.display(),
        nvertices = cfg.nvertices,
        r = cfg.r,
        l = cfg.l,
        execthreads = cfg.execthreads,
        prob = cfg.prob,
        semi_external = cfg.semi_external,
        "configuration resolved"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_handler = stop.clone();
    ctrlc::set_handler(move || {
        info!(component = "main", event = "interrupt", "interrupt received, spilling pool before exit");
        stop_for_handler.store(true, Ordering::Relaxed);
    })
    .context("failed to install interrupt handler")?;

    let hook = Arc::new(PageRankHook::new(
        PAGERANK_ALPHA,
        cfg.r,
        cfg.execthreads,
        cfg.counter_width,
        cfg.nvertices,
        cfg.semi_external,
        cfg.visits_path(),
    ));
    let semi_external = cfg.semi_external;
    let tail = cfg.tail;

    let mut engine = Engine::new(cfg, hook.clone(), stop)?;
    if tail > 0.0 {
        engine.run_until_converged(tail)?;
    } else {
        engine.run()?;
    }
    drop(engine);

    if semi_external {
        hook.finalize().context("failed to write semi-external visit counters")?;
    }

    Ok(())
}
