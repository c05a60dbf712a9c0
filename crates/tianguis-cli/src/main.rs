//! `tianguis` — price pipeline binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite store, and runs the requested pipeline stage against it.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tianguis_core::{
  observation::Classification,
  store::{ObservationFilter, PriceStore},
};
use tianguis_pipeline::{
  HotnessScorer, Ingestor, Pipeline, PipelineConfig, Reconciler, RetryPolicy,
  RunRegistry, Validator,
};
use tianguis_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod search;

use search::{HttpSearchClient, SearchConfig};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Tianguis marketplace price pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Fetch marketplace listings into a new run.
  Ingest,
  /// Classify every observation of a run.
  Validate {
    /// Run to process; defaults to the latest.
    #[arg(long)]
    run_id: Option<Uuid>,
  },
  /// Recompute hot-deal marks for a validated run.
  Score {
    #[arg(long)]
    run_id: Option<Uuid>,
  },
  /// Rebuild the projection table from a validated run.
  Reconcile {
    #[arg(long)]
    run_id: Option<Uuid>,
  },
  /// Validate, score, and reconcile in one go.
  Run {
    #[arg(long)]
    run_id: Option<Uuid>,
  },
  /// Delete projection rows that do not belong to the active run.
  Purge,
  /// Show the active run and its per-state observation counts.
  Status,
}

// ─── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AppConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  /// Listings API connection; only required for `ingest`.
  search:     Option<SearchConfig>,
  #[serde(default)]
  pipeline:   PipelineConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("tianguis.db") }

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TIANGUIS").separator("__"))
    .build()
    .context("failed to read config file")?;
  let app_cfg: AppConfig = settings
    .try_deserialize()
    .context("failed to deserialise AppConfig")?;

  let store = SqliteStore::open(&app_cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", app_cfg.store_path))?;

  let config = &app_cfg.pipeline;
  let retry = RetryPolicy::from_config(config);
  let registry = RunRegistry::new(&store, &retry);

  match cli.command {
    Command::Ingest => {
      let search_cfg = app_cfg
        .search
        .as_ref()
        .context("`search` section required for ingest")?;
      let client = HttpSearchClient::new(search_cfg)
        .map_err(|e| anyhow::anyhow!("search client: {e}"))?;
      let report = Ingestor::new(&store, &client, config, &retry)
        .ingest_cycle()
        .await?;
      println!(
        "run {}: {} listings, {} inserted, {} skipped, {} new retailers",
        report.run_id.map(|id| id.to_string()).unwrap_or_default(),
        report.listings,
        report.inserted,
        report.skipped,
        report.new_retailers,
      );
    }

    Command::Validate { run_id } => {
      let run_id = resolve_run(&registry, run_id).await?;
      let report = Validator::new(&store, config, &retry)
        .classify_run(run_id)
        .await?;
      println!(
        "run {run_id}: {} observations, {} valid, {} null_price, \
         {} null_reference, {} extreme, {} too_low, {} too_high",
        report.total,
        report.valid,
        report.null_price,
        report.null_reference,
        report.extreme_price,
        report.too_low,
        report.too_high,
      );
    }

    Command::Score { run_id } => {
      let run_id = resolve_run(&registry, run_id).await?;
      let report = HotnessScorer::new(&store, config, &retry)
        .score_run(run_id)
        .await?;
      println!(
        "run {run_id}: {} eligible, {} groups, {} marked hot",
        report.eligible, report.groups, report.marked,
      );
    }

    Command::Reconcile { run_id } => {
      let run_id = resolve_run(&registry, run_id).await?;
      let report = Reconciler::new(&store, config, &retry)
        .reconcile_run(run_id)
        .await?;
      println!(
        "run {run_id}: {} processed, {} projected, {} skipped, {} duplicates",
        report.processed, report.succeeded, report.skipped, report.duplicates,
      );
    }

    Command::Run { run_id } => {
      let pipeline = Pipeline::new(&store, config);
      let report = match run_id {
        Some(id) => pipeline.run_cycle_for(id).await?,
        None => pipeline.run_cycle().await?,
      };
      registry.purge_stale(report.run_id).await?;
      println!(
        "run {}: {} observations classified, {} marked hot, {} projected",
        report.run_id,
        report.validation.total,
        report.hotness.as_ref().map(|h| h.marked).unwrap_or(0),
        report.reconcile.succeeded,
      );
      if let Err(err) = &report.hotness {
        println!("warning: hotness scoring failed: {err}");
      }
    }

    Command::Purge => {
      let run = registry.active_run().await?;
      let deleted = registry.purge_stale(run.run_id).await?;
      println!("active run {}: {deleted} stale rows deleted", run.run_id);
    }

    Command::Status => {
      let run = registry.active_run().await?;
      println!("active run: {} (started {})", run.run_id, run.started_at);
      for class in [
        Classification::Unclassified,
        Classification::Valid,
        Classification::NullPrice,
        Classification::NullReference,
        Classification::ExtremePrice,
        Classification::TooLow,
        Classification::TooHigh,
      ] {
        let filter = ObservationFilter {
          run_id:         run.run_id,
          classification: Some(class),
        };
        let count = store.count_observations(&filter).await?;
        if count > 0 {
          println!("  {class}: {count}");
        }
      }
      let projected = store.count_projection(Some(run.run_id)).await?;
      println!("  projected: {projected}");
    }
  }

  Ok(())
}

/// Use the given run, or fall back to the latest one.
async fn resolve_run<S: PriceStore>(
  registry: &RunRegistry<'_, S>,
  run_id: Option<Uuid>,
) -> anyhow::Result<Uuid> {
  match run_id {
    Some(id) => Ok(id),
    None => Ok(registry.active_run().await?.run_id),
  }
}
