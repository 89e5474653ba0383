//! Convert coordinator: grouping, worker fan-out and feedstock gather.
//!
//! Flow: group the tree on the blocking pool → spawn `num_transformers`
//! workers sharing one bounded input channel → a producer task feeds groups
//! and closes the input channel when done → the coordinator drains the
//! bounded output channel. The output channel closes only after every worker
//! has exited, so "drained" implies "all work finished".

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use connect_core::Record;

use crate::dataset::{normalize_dataset, source_id};
use crate::error::ConvertError;
use crate::group::{extension_of, group_tree, Group};
use crate::transform::{run_worker, TransformContext, WorkerStats};

fn default_transformers() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    256
}

/// Inputs for one conversion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertParams {
    /// Dataset-level entry; becomes feedstock element 0.
    pub dataset: Record,
    /// Parser-specific params keyed by parser name (e.g. `"json": {...}`).
    #[serde(default)]
    pub parsers: Map<String, Value>,
    /// Root grouping config (`group_by_dir`, `known_formats`).
    #[serde(default)]
    pub group_config: Value,
    #[serde(default = "default_transformers")]
    pub num_transformers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ConvertParams {
    pub fn new(dataset: Record) -> Self {
        Self {
            dataset,
            parsers: Map::new(),
            group_config: Value::Null,
            num_transformers: default_transformers(),
            queue_capacity: default_queue_capacity(),
        }
    }

    pub fn with_group_config(mut self, group_config: Value) -> Self {
        self.group_config = group_config;
        self
    }

    pub fn with_parsers(mut self, parsers: Map<String, Value>) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_transformers(mut self, n: usize) -> Self {
        self.num_transformers = n;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOutput {
    /// Element 0 is the normalized dataset entry; record order is arbitrary.
    pub feedstock: Vec<Record>,
    pub group_count: usize,
    /// Extensions (or bare names) seen across all grouped files.
    pub extensions: BTreeSet<String>,
    /// Groups whose transform task panicked.
    pub failed_groups: usize,
    /// Workers that did not exit cleanly.
    pub failed_workers: usize,
}

/// Convert every file under `root` into feedstock.
pub async fn convert(root: &Path, params: ConvertParams) -> Result<ConvertOutput, ConvertError> {
    let ConvertParams {
        dataset,
        parsers,
        group_config,
        num_transformers,
        queue_capacity,
    } = params;
    let source_id = source_id(&dataset).to_string();

    let walk_root = root.to_path_buf();
    let groups = tokio::task::spawn_blocking(move || group_tree(&walk_root, &group_config))
        .await
        .map_err(|e| ConvertError::Task(e.to_string()))??;

    let group_count = groups.len();
    let extensions: BTreeSet<String> = groups
        .iter()
        .flat_map(|g| g.files.iter().map(|f| extension_of(f)))
        .collect();
    debug!(source_id = %source_id, groups = group_count, "grouping complete");

    let capacity = queue_capacity.max(1);
    let (input_tx, input_rx) = mpsc::channel::<Group>(capacity);
    let (output_tx, mut output_rx) = mpsc::channel::<Record>(capacity);
    let input_rx = Arc::new(Mutex::new(input_rx));
    let transform = TransformContext {
        root: root.to_path_buf(),
        parser_params: parsers,
    }
    .into_transform();

    let workers: Vec<JoinHandle<WorkerStats>> = (0..num_transformers.max(1))
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                input_rx.clone(),
                output_tx.clone(),
                transform.clone(),
            ))
        })
        .collect();
    // Only workers hold output senders and the input receiver now.
    drop(output_tx);
    drop(input_rx);
    debug!(source_id = %source_id, workers = workers.len(), "transformers started");

    let producer_id = source_id.clone();
    let producer = tokio::spawn(async move {
        for group in groups {
            if input_tx.send(group).await.is_err() {
                error!(source_id = %producer_id, "all transformers exited before input was complete");
                break;
            }
        }
        // Dropping the sender marks input complete.
        debug!(source_id = %producer_id, "input complete");
    });

    let mut feedstock = vec![normalize_dataset(dataset)];
    while let Some(record) = output_rx.recv().await {
        feedstock.push(record);
    }

    producer.await.map_err(|e| ConvertError::Task(e.to_string()))?;

    let (failed_groups, failed_workers) = tally_workers(&source_id, workers).await;

    info!(
        source_id = %source_id,
        groups = group_count,
        records = feedstock.len() - 1,
        failed_groups,
        failed_workers,
        "conversion complete"
    );

    Ok(ConvertOutput {
        feedstock,
        group_count,
        extensions,
        failed_groups,
        failed_workers,
    })
}

/// Sum group failures across workers and count workers that crashed.
async fn tally_workers(source_id: &str, workers: Vec<JoinHandle<WorkerStats>>) -> (usize, usize) {
    let mut failed_groups = 0;
    let mut failed_workers = 0;
    for (id, handle) in workers.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => failed_groups += stats.failed,
            Err(e) => {
                error!(source_id = %source_id, worker = id, error = %e, "transformer crashed");
                failed_workers += 1;
            }
        }
    }
    (failed_groups, failed_workers)
}
