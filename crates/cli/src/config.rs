//! Loading JSON or TOML input documents.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Read a document, picking the format from the extension (`.toml`, else JSON).
pub fn load_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let value = if is_toml {
        let parsed: toml::Value = toml::from_str(&text)
            .with_context(|| format!("invalid TOML in {}", path.display()))?;
        serde_json::to_value(parsed)?
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in {}", path.display()))?
    };
    debug!(path = %path.display(), toml = is_toml, "loaded document");
    Ok(value)
}

/// Like [`load_document`] but the top level must be a mapping.
pub fn load_mapping(path: &Path) -> Result<Map<String, Value>> {
    match load_document(path)? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a mapping", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let j = dir.path().join("ds.json");
        fs::write(&j, r#"{"mdf": {"source_id": "a"}}"#).unwrap();
        assert_eq!(load_mapping(&j).unwrap()["mdf"]["source_id"], json!("a"));

        let t = dir.path().join("groups.toml");
        fs::write(
            &t,
            "group_by_dir = true\n[[known_formats]]\nfiles = [\"outcar\"]\n",
        )
        .unwrap();
        let v = load_document(&t).unwrap();
        assert_eq!(v["group_by_dir"], json!(true));
        assert_eq!(v["known_formats"][0]["files"], json!(["outcar"]));
    }

    #[test]
    fn non_mapping_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("list.json");
        fs::write(&p, "[1, 2]").unwrap();
        assert!(load_document(&p).is_ok());
        assert!(load_mapping(&p).is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_document(Path::new("/nonexistent/x.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.json"));
    }
}
