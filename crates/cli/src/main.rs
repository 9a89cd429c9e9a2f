//! `chaffee-ingest` CLI (spec §6): resolves `Config` from the environment
//! plus these flags, builds the orchestrator, and runs it to completion.
//!
//! Exit codes: `0` success, `2` configuration error, `3` runtime/pipeline
//! error, `130` interrupted (SIGINT, spec §5's cancellation contract).

use anyhow::{Context, Result};
use chaffee_common::IngestError;
use chaffee_config::{Config, SourceKind};
use chaffee_orchestrator::Orchestrator;
use chaffee_storage::{PostgresConfig, PostgresSegmentsDatabase};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Time-aligned, speaker-attributed transcript ingestion for a single
/// channel's uploads, with guest-speaker disambiguation via voice
/// embeddings.
#[derive(Parser, Debug)]
#[command(name = "chaffee-ingest", version, about)]
struct Cli {
    /// Video source to enumerate candidates from (`external-api` or
    /// `local-listing`).
    #[arg(long)]
    source: Option<SourceKind>,

    /// Restrict ingestion to these video ids (repeatable, or comma-separated).
    #[arg(long, value_delimiter = ',')]
    video_ids: Vec<String>,

    /// Read an allowlist of video ids from a newline-delimited file.
    #[arg(long)]
    video_ids_file: Option<PathBuf>,

    /// Stop accepting new candidates once this many have been collected.
    #[arg(long)]
    limit: Option<usize>,

    /// Only consider videos published within this many days.
    #[arg(long)]
    days_back: Option<u32>,

    /// Enumerate the source newest-first rather than oldest-first.
    #[arg(long, default_value_t = false)]
    newest_first: bool,

    /// Skip videos under the Shorts duration threshold.
    #[arg(long, default_value_t = false)]
    skip_shorts: bool,

    /// Disable the skip-shorts filter even if it's on by default.
    #[arg(long, default_value_t = false, conflicts_with = "skip_shorts")]
    no_skip_shorts: bool,

    /// Re-ingest videos even if already marked ingested.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Count `--limit` against accepted-for-fetch candidates rather than
    /// everything the source yields.
    #[arg(long, default_value_t = false)]
    limit_unprocessed: bool,

    /// Resolve and log candidates without fetching or processing anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Override the scratch directory used for downloaded audio and
    /// intermediate state.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = match build_config(cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let db = match rt.block_on(connect_storage(&config)) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to storage");
            std::process::exit(3);
        }
    };

    let config = Arc::new(config);
    let orchestrator = match Orchestrator::new(Arc::clone(&config), db) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "orchestrator initialization failed");
            std::process::exit(exit_code_for(&e));
        }
    };

    match orchestrator.run(&rt) {
        Ok(summary) => {
            tracing::info!(?summary, "ingestion run finished");
            Ok(())
        }
        Err(e) => {
            let code = exit_code_for(&e);
            tracing::error!(error = %e, "ingestion run failed");
            std::process::exit(code);
        }
    }
}

fn exit_code_for(e: &IngestError) -> i32 {
    match e {
        IngestError::Config(_) => 2,
        IngestError::Cancelled => 130,
        _ => 3,
    }
}

async fn connect_storage(config: &Config) -> anyhow::Result<PostgresSegmentsDatabase> {
    let storage_config = PostgresConfig {
        database_url: config.database_url.clone(),
        d_text: config.d_text,
    };
    PostgresSegmentsDatabase::connect(&storage_config)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn build_config(cli: Cli) -> Result<Config, IngestError> {
    let mut config = Config::from_env()?;

    if let Some(kind) = cli.source {
        config = config.with_source_kind(kind);
    }

    let mut video_ids = cli.video_ids;
    if let Some(path) = &cli.video_ids_file {
        video_ids.extend(chaffee_source::read_video_ids_file(path)?);
    }
    if !video_ids.is_empty() {
        config = config.with_video_ids(video_ids);
    }

    config = config
        .with_limit(cli.limit)
        .with_days_back(cli.days_back)
        .with_newest_first(cli.newest_first)
        .with_force(cli.force)
        .with_limit_unprocessed(cli.limit_unprocessed)
        .with_dry_run(cli.dry_run);

    if cli.skip_shorts {
        config = config.with_skip_shorts(true);
    } else if cli.no_skip_shorts {
        config = config.with_skip_shorts(false);
    }

    if let Some(scratch_dir) = cli.scratch_dir {
        config = config.with_scratch_dir(scratch_dir);
    }

    config.validate()?;
    Ok(config)
}
