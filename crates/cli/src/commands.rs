//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use connect_convert::{convert, ConvertParams};
use connect_core::feedstock::{read_feedstock, write_feedstock};
use connect_core::Config;
use connect_ingest::{
    validate_feedstock, DryRunBackend, HttpIndexBackend, IndexBackend, IngestError, IngestOptions,
    IngestReport, Ingester, StructuralValidator,
};

use crate::cli::{ConvertArgs, IngestArgs, ValidateArgs};
use crate::config::{load_document, load_mapping};

pub async fn run_convert(config: &Config, args: ConvertArgs) -> Result<()> {
    let dataset = load_mapping(&args.dataset)?;
    let group_config = match &args.group_config {
        Some(path) => load_document(path)?,
        None => Value::Null,
    };
    let parsers = match &args.parsers {
        Some(path) => load_mapping(path)?,
        None => Map::new(),
    };

    let mut params = ConvertParams::new(dataset)
        .with_group_config(group_config)
        .with_parsers(parsers)
        .with_transformers(args.workers.unwrap_or(config.convert.num_transformers));
    params.queue_capacity = config.convert.queue_capacity;

    let output = convert(&args.root, params)
        .await
        .with_context(|| format!("conversion of {} failed", args.root.display()))?;

    let out = args.out.clone();
    let feedstock = output.feedstock;
    let entries = feedstock.len();
    tokio::task::spawn_blocking(move || write_feedstock(&out, &feedstock))
        .await
        .context("feedstock writer task failed")??;

    println!("groups:     {}", output.group_count);
    println!("records:    {}", entries - 1);
    println!(
        "extensions: {}",
        output.extensions.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("feedstock:  {}", args.out.display());

    if output.failed_groups > 0 || output.failed_workers > 0 {
        bail!(
            "{} groups and {} workers failed during conversion",
            output.failed_groups,
            output.failed_workers
        );
    }
    Ok(())
}

pub fn run_validate(args: ValidateArgs) -> Result<()> {
    let entries = read_feedstock(&args.feedstock)
        .with_context(|| format!("failed to read {}", args.feedstock.display()))?;
    let mut validator = StructuralValidator::new();
    let validated = validate_feedstock(&mut validator, entries)
        .with_context(|| format!("{} failed validation", args.feedstock.display()))?;
    write_feedstock(&args.out, &validated)?;

    println!("validated {} records -> {}", validated.len() - 1, args.out.display());
    Ok(())
}

pub async fn run_ingest(config: &Config, args: IngestArgs) -> Result<()> {
    let mut options = IngestOptions::from_config(&config.ingest);
    if let Some(size) = args.batch_size {
        options.batch_size = size;
    }
    if let Some(n) = args.submitters {
        options.num_submitters = n;
    }
    if let Some(n) = args.max_attempts {
        options.max_attempts = n;
    }
    options.dead_letter_path = args.dead_letter.clone();

    let index = args.index.unwrap_or_else(|| config.ingest.index.clone());
    let backend: Arc<dyn IndexBackend> = match args.index_url.or_else(|| config.ingest.index_url.clone()) {
        Some(url) => Arc::new(HttpIndexBackend::new(&url, &index)),
        None => {
            warn!("no index URL configured, running dry");
            Arc::new(DryRunBackend)
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after in-flight batches");
            let _ = stop_tx.send(true);
        }
    });

    let report = match Ingester::new(backend, options)
        .with_shutdown(stop_rx)
        .run(args.feedstock)
        .await
    {
        Ok(report) => report,
        Err(IngestError::Reader { source, report }) => {
            print_report(&report);
            return Err(source).context("feedstock read failed");
        }
        Err(e) => return Err(e.into()),
    };
    print_report(&report);

    if !report.is_success() {
        bail!(
            "ingest incomplete: {} failed, {} abandoned",
            report.failed_batches.len(),
            report.abandoned()
        );
    }
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("records read:       {}", report.records_read);
    println!("batches submitted:  {}/{}", report.batches_submitted, report.batches_queued);
    println!("documents ingested: {}", report.documents_ingested);
    for failed in &report.failed_batches {
        println!(
            "dead-lettered batch {} ({} docs, {} attempts): {}",
            failed.index, failed.size, failed.attempts, failed.error
        );
    }
    if report.cancelled {
        println!("cancelled before the queue drained");
    }
}
