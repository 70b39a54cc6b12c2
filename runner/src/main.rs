//! CLI binary driving one pipeline run against in-memory collaborators.
//!
//! Reads captured change events from a JSON file, normalizes them into bronze
//! batches, then executes the full merge-and-refresh run. Useful for
//! exercising the engine end to end without real storage or a real query
//! facility; the issued statements are printed when requested.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lakeflow::config::PipelineConfig;
use lakeflow::ingest::{normalize, BatchWriter};
use lakeflow::orchestrator::{Orchestrator, RunTrigger};
use lakeflow::query::memory::MemoryQueryExecutor;
use lakeflow::store::memory::{MemoryObjectStore, MemoryReferenceStore};
use lakeflow::types::{EntityKind, NormalizedRecord, RawChangeRecord};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lakeflow runner - executes one incremental merge and refresh run.
#[derive(Parser, Debug)]
#[command(name = "lakeflow-runner")]
#[command(about = "Runs the incremental merge and refresh pipeline once")]
struct Args {
    /// JSON file with an array of captured change events
    #[arg(long)]
    events: PathBuf,

    /// JSON file with reference customers: [{"id", "name", "region"}]
    #[arg(long)]
    customers: Option<PathBuf>,

    /// Bucket name used in generated locations
    #[arg(long, default_value = "lake")]
    bucket: String,

    /// Target database name
    #[arg(long, default_value = "analytics")]
    database: String,

    /// Trailing window, in days, for delta-refreshed aggregates
    #[arg(long, default_value = "30")]
    window_days: u32,

    /// Print every statement issued to the query facility
    #[arg(long)]
    show_statements: bool,
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run().await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = PipelineConfig::new(args.bucket.clone(), args.database.clone())
        .with_sales_window_days(args.window_days);
    let store = MemoryObjectStore::new();
    let reference = MemoryReferenceStore::new();
    let executor = MemoryQueryExecutor::new();

    if let Some(path) = &args.customers {
        seed_customers(&reference, path).await?;
    }
    seed_events(&store, &config, &args.events).await?;

    let orchestrator = Orchestrator::new(
        store,
        reference,
        executor.clone(),
        config,
    );
    let report = orchestrator.run(RunTrigger::Scheduled).await?;

    info!("{}", report.summary());

    if args.show_statements {
        for statement in executor.statements().await {
            println!("{statement}");
        }
    }

    Ok(())
}

/// Loads reference customers from a JSON array of `{id, name, region}`.
async fn seed_customers(reference: &MemoryReferenceStore, path: &PathBuf) -> anyhow::Result<()> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read customers file {}", path.display()))?;
    let customers: Vec<serde_json::Value> =
        serde_json::from_slice(&data).context("customers file is not a JSON array")?;

    for customer in &customers {
        let id = customer["id"].as_str().unwrap_or_default();
        let name = customer["name"].as_str().unwrap_or_default();
        let region = customer["region"].as_str().unwrap_or_default();
        if id.is_empty() {
            anyhow::bail!("customer entry without an id: {customer}");
        }
        reference.insert_customer(id, name, region).await;
    }

    info!(customers = customers.len(), "seeded reference customers");

    Ok(())
}

/// Normalizes the captured events and writes them as bronze batches.
async fn seed_events(
    store: &MemoryObjectStore,
    config: &PipelineConfig,
    path: &PathBuf,
) -> anyhow::Result<()> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read events file {}", path.display()))?;
    let raws: Vec<RawChangeRecord> =
        serde_json::from_slice(&data).context("events file is not an array of change records")?;

    let processing_time = chrono::Utc::now();
    let mut per_kind: HashMap<EntityKind, Vec<NormalizedRecord>> = HashMap::new();
    for raw in &raws {
        if let Some(record) = normalize(raw, processing_time) {
            per_kind.entry(record.entity).or_default().push(record);
        }
    }

    let writer = BatchWriter::new(store, config);
    for (kind, records) in &per_kind {
        let key = writer
            .write_batch(*kind, records)
            .await
            .map_err(|err| anyhow::anyhow!("failed to write {kind} batch: {err}"))?;
        info!(key = %key, records = records.len(), "seeded bronze batch");
    }

    info!(events = raws.len(), "seeded change events");

    Ok(())
}
