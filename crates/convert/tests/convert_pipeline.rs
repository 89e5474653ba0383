//! End-to-end conversion runs over temp directory trees.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use connect_convert::group::NULL_ROOT;
use connect_convert::{convert, ConvertParams};
use connect_core::Record;

fn dataset() -> Record {
    json!({
        "mdf": {"source_id": "test_dataset_v1", "title": "Test"},
        "custom": {"temperature_description": "K"}
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn write_records(root: &Path, count: usize) {
    for i in 0..count {
        let sub = root.join(format!("batch{}", i % 3));
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("r{i}.json")), format!(r#"{{"index": {i}}}"#)).unwrap();
    }
}

#[tokio::test]
async fn k_groups_produce_k_plus_one_entries() {
    let dir = tempfile::tempdir().unwrap();
    write_records(dir.path(), 12);

    let params = ConvertParams::new(dataset()).with_transformers(4);
    let out = convert(dir.path(), params).await.unwrap();

    assert_eq!(out.group_count, 12);
    assert_eq!(out.feedstock.len(), 13);
    assert_eq!(out.feedstock[0]["mdf"]["source_id"], json!("test_dataset_v1"));
    assert_eq!(out.feedstock[0]["custom"], json!({"temperature_desc": "K"}));
    assert_eq!(out.failed_groups, 0);
    assert_eq!(out.failed_workers, 0);

    let mut indexes: Vec<i64> = out.feedstock[1..]
        .iter()
        .map(|r| r["index"].as_i64().unwrap())
        .collect();
    indexes.sort();
    assert_eq!(indexes, (0..12).collect::<Vec<_>>());
    assert!(out.feedstock[1..].iter().all(|r| r["files"].as_array().unwrap().len() == 1));
}

#[tokio::test]
async fn null_root_yields_dataset_only() {
    let out = convert(Path::new(NULL_ROOT), ConvertParams::new(dataset())).await.unwrap();
    assert_eq!(out.feedstock.len(), 1);
    assert_eq!(out.group_count, 0);
    assert!(out.extensions.is_empty());
}

#[tokio::test]
async fn empty_records_are_dropped_but_groups_counted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.json"), r#"{"a": 1}"#).unwrap();
    fs::write(dir.path().join("notes.txt"), "plain words, nothing structured").unwrap();
    fs::write(dir.path().join("README"), "").unwrap();

    let out = convert(dir.path(), ConvertParams::new(dataset())).await.unwrap();
    assert_eq!(out.group_count, 3);
    assert_eq!(out.feedstock.len(), 2);
    let exts: Vec<&str> = out.extensions.iter().map(String::as_str).collect();
    assert_eq!(exts, vec![".json", ".txt", "README"]);
}

#[tokio::test]
async fn known_format_rule_builds_one_record_per_group() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("run_in.json"), r#"{"input": {"steps": 10}}"#).unwrap();
    fs::write(dir.path().join("run_out.json"), r#"{"output": {"energy": -1.5}}"#).unwrap();

    let group_config = json!({
        "known_formats": [{"files": ["_in", "_out"], "parsers": ["json"], "params": {"json": {"block": "sim"}}}]
    });
    let params = ConvertParams::new(dataset()).with_group_config(group_config);
    let out = convert(dir.path(), params).await.unwrap();

    assert_eq!(out.group_count, 1);
    assert_eq!(out.feedstock.len(), 2);
    let record = &out.feedstock[1];
    assert_eq!(record["sim"]["input"]["steps"], json!(10));
    assert_eq!(record["sim"]["output"]["energy"], json!(-1.5));
    assert_eq!(record["files"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn tiny_queues_do_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    write_records(dir.path(), 40);

    let mut params = ConvertParams::new(dataset()).with_transformers(3);
    params.queue_capacity = 1;
    let out = convert(dir.path(), params).await.unwrap();
    assert_eq!(out.feedstock.len(), 41);
}

#[tokio::test]
async fn params_deserialize_with_defaults() {
    let params: ConvertParams = serde_json::from_value(json!({"dataset": {"mdf": {}}})).unwrap();
    assert_eq!(params.num_transformers, 1);
    assert_eq!(params.group_config, Value::Null);
}
