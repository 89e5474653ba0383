//! Group → record transformation and the transform worker loop.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha512};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use connect_core::{merge_records, Record};

use crate::group::{extension_of, Group};
use crate::parser::{omniparse, ParserKind};

/// Shared, read-only inputs for every transform worker.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Dataset root, used to report file paths relative to it.
    pub root: PathBuf,
    /// Convert-level parser params; group params are merged over these.
    pub parser_params: Map<String, Value>,
}

/// Extract at most one record from a group.
///
/// Per-file results are deep-merged in file order, so later files win on
/// conflicting keys. Returns `None` when no parser extracted anything.
pub fn transform_group(group: &Group, ctx: &TransformContext) -> Option<Record> {
    let kinds: Vec<ParserKind> = if group.parsers.is_empty() {
        ParserKind::ALL.to_vec()
    } else {
        group.parsers.clone()
    };
    let params = merge_records(ctx.parser_params.clone(), group.params.clone());

    let mut record = Record::new();
    for file in &group.files {
        record = merge_records(record, omniparse(file, &kinds, &params));
    }
    if record.is_empty() {
        return None;
    }

    let files: Vec<Value> = group
        .files
        .iter()
        .filter_map(|f| match file_metadata(f, &ctx.root) {
            Ok(md) => Some(md),
            Err(e) => {
                warn!(path = %f.display(), error = %e, "cannot read file metadata");
                None
            }
        })
        .collect();
    record.insert("files".to_string(), Value::Array(files));
    Some(record)
}

fn file_metadata(path: &Path, root: &Path) -> io::Result<Value> {
    let mut hasher = Sha512::new();
    let mut file = File::open(path)?;
    let length = io::copy(&mut file, &mut hasher)?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    Ok(json!({
        "filename": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "path": relative.to_string_lossy(),
        "extension": extension_of(path),
        "length": length,
        "sha512": format!("{:x}", hasher.finalize()),
    }))
}

/// Group to record function shared by every worker.
pub(crate) type GroupTransform = Arc<dyn Fn(&Group) -> Option<Record> + Send + Sync>;

impl TransformContext {
    pub(crate) fn into_transform(self) -> GroupTransform {
        Arc::new(move |group: &Group| transform_group(group, &self))
    }
}

/// Per-worker tallies, returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub groups: usize,
    pub records: usize,
    pub failed: usize,
}

/// Pull groups until the input channel is closed and drained.
///
/// Parsing runs on the blocking pool; a panic there fails only that group.
pub(crate) async fn run_worker(
    id: usize,
    input: Arc<Mutex<mpsc::Receiver<Group>>>,
    output: mpsc::Sender<Record>,
    transform: GroupTransform,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let next = { input.lock().await.recv().await };
        let Some(group) = next else { break };
        stats.groups += 1;

        let task = transform.clone();
        match tokio::task::spawn_blocking(move || task(&group)).await {
            Ok(Some(record)) => {
                if output.send(record).await.is_err() {
                    warn!(worker = id, "output channel closed, stopping");
                    break;
                }
                stats.records += 1;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker = id, error = %e, "transform task failed");
                stats.failed += 1;
            }
        }
    }
    debug!(worker = id, groups = stats.groups, records = stats.records, "transformer finished");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn later_files_win_and_metadata_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fs::write(&a, r#"{"x": 1, "shared": "a"}"#).unwrap();
        fs::write(&b, r#"{"y": 2, "shared": "b"}"#).unwrap();

        let group = Group {
            files: vec![a, b],
            parsers: vec![ParserKind::Json],
            params: Map::new(),
        };
        let ctx = TransformContext {
            root: dir.path().to_path_buf(),
            parser_params: Map::new(),
        };
        let record = transform_group(&group, &ctx).unwrap();
        assert_eq!(record["shared"], json!("b"));
        assert_eq!(record["x"], json!(1));

        let files = record["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], json!("a.json"));
        assert_eq!(files[0]["extension"], json!(".json"));
        assert_eq!(files[0]["sha512"].as_str().unwrap().len(), 128);
    }

    #[test]
    fn group_params_override_convert_params() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("d.json");
        fs::write(&f, r#"{"v": 1}"#).unwrap();

        let mut group_params = Map::new();
        group_params.insert("json".into(), json!({"block": "group"}));
        let group = Group {
            files: vec![f],
            parsers: vec![ParserKind::Json],
            params: group_params,
        };
        let mut parser_params = Map::new();
        parser_params.insert("json".into(), json!({"block": "global"}));
        let ctx = TransformContext {
            root: dir.path().to_path_buf(),
            parser_params,
        };
        let record = transform_group(&group, &ctx).unwrap();
        assert!(record.contains_key("group"));
        assert!(!record.contains_key("global"));
    }

    fn named(name: &str) -> Group {
        Group {
            files: vec![PathBuf::from(name)],
            parsers: Vec::new(),
            params: Map::new(),
        }
    }

    #[tokio::test]
    async fn panicking_transform_fails_only_its_group() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        for name in ["a", "boom", "empty", "b"] {
            in_tx.send(named(name)).await.unwrap();
        }
        drop(in_tx);

        let transform: GroupTransform = Arc::new(|group: &Group| {
            let name = group.files[0].to_string_lossy().into_owned();
            match name.as_str() {
                "boom" => panic!("parser blew up"),
                "empty" => None,
                _ => {
                    let mut record = Record::new();
                    record.insert("name".into(), json!(name));
                    Some(record)
                }
            }
        });

        let stats = run_worker(0, Arc::new(Mutex::new(in_rx)), out_tx, transform).await;
        assert_eq!(
            stats,
            WorkerStats {
                groups: 4,
                records: 2,
                failed: 1
            }
        );

        let mut names = Vec::new();
        while let Some(record) = out_rx.recv().await {
            names.push(record["name"].clone());
        }
        assert_eq!(names, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn unparseable_group_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("blob.bin");
        fs::write(&f, [0u8, 159, 146, 150]).unwrap();
        let group = Group {
            files: vec![f],
            parsers: Vec::new(),
            params: Map::new(),
        };
        assert!(transform_group(&group, &TransformContext::default()).is_none());
    }
}
