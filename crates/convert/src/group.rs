//! Directory walk and file grouping.
//!
//! Each directory may hold an `mdf.json` fragment that is deep-merged into the
//! inherited grouping config for that directory and its descendants only.
//! Files are then grouped by, in priority order: whole-directory grouping,
//! known-format rules, and finally one group per remaining file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use connect_core::merge;

use crate::error::ConvertError;
use crate::parser::ParserKind;

/// Per-directory config fragment. Never treated as a data file.
pub const CONFIG_FILENAME: &str = "mdf.json";

/// Root sentinel for datasets synthesized without raw files.
pub const NULL_ROOT: &str = "/dev/null";

/// A set of files that together produce at most one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub files: Vec<PathBuf>,
    /// Parsers to run, in order. Empty means "use the defaults".
    #[serde(default)]
    pub parsers: Vec<ParserKind>,
    /// Parser-specific params keyed by parser name (e.g. `"json"`).
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Group {
    fn single(file: PathBuf) -> Self {
        Self {
            files: vec![file],
            parsers: Vec::new(),
            params: Map::new(),
        }
    }
}

/// Typed view of the merged grouping config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub group_by_dir: bool,
    #[serde(default)]
    pub known_formats: Vec<FormatRule>,
}

/// Files whose lowercased name contains one of `files` are grouped with
/// siblings sharing the same name once that substring is removed.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatRule {
    /// Label used in logs.
    #[serde(default)]
    pub name: Option<String>,
    pub files: Vec<String>,
    #[serde(default)]
    pub parsers: Vec<ParserKind>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl GroupConfig {
    pub fn from_value(value: &Value) -> Result<Self, ConvertError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| ConvertError::Config(e.to_string()))
    }
}

/// Walk `root` and return every group found beneath it.
///
/// The [`NULL_ROOT`] sentinel yields no groups. Failing to list a directory
/// aborts the walk; a malformed `mdf.json` only logs a warning.
pub fn group_tree(root: &Path, config: &Value) -> Result<Vec<Group>, ConvertError> {
    if root == Path::new(NULL_ROOT) {
        return Ok(Vec::new());
    }
    let parsed = GroupConfig::from_value(config)?;
    let mut groups = Vec::new();
    walk(root, config.clone(), parsed, &mut groups)?;
    Ok(groups)
}

fn walk(
    dir: &Path,
    mut config: Value,
    mut parsed: GroupConfig,
    out: &mut Vec<Group>,
) -> Result<(), ConvertError> {
    let list_err = |source| ConvertError::ListDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(list_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(list_err)?;
    entries.sort();

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for path in entries {
        let is_fragment = path.file_name().map(|n| n == CONFIG_FILENAME).unwrap_or(false);
        if is_fragment && path.is_file() {
            if let Some((merged, typed)) = load_fragment(&path, &config) {
                config = merged;
                parsed = typed;
            }
        } else if path.is_file() {
            files.push(path);
        } else if path.is_dir() {
            dirs.push(path);
        } else {
            debug!(path = %path.display(), "ignoring non-file, non-dir node");
        }
    }

    out.extend(group_files(files, &parsed));

    for sub in dirs {
        walk(&sub, config.clone(), parsed.clone(), out)?;
    }
    Ok(())
}

/// Read and merge a config fragment. Returns `None` (after a warning) when
/// the fragment is unreadable or would produce an invalid config.
fn load_fragment(path: &Path, inherited: &Value) -> Option<(Value, GroupConfig)> {
    let fragment = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
        .and_then(|v| match v {
            Value::Object(_) => Ok(v),
            _ => Err("fragment is not a JSON object".to_string()),
        });
    let fragment = match fragment {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "error reading config file");
            return None;
        }
    };

    let base = if inherited.is_null() { Value::Object(Map::new()) } else { inherited.clone() };
    let merged = merge(&base, &fragment);
    match GroupConfig::from_value(&merged) {
        Ok(typed) => {
            debug!(path = %path.display(), config = %fragment, "config updating");
            Some((merged, typed))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file produces invalid grouping config");
            None
        }
    }
}

/// Partition the files of one directory into groups.
pub fn group_files(files: Vec<PathBuf>, config: &GroupConfig) -> Vec<Group> {
    if files.is_empty() {
        return Vec::new();
    }
    if config.group_by_dir {
        return vec![Group {
            files,
            parsers: Vec::new(),
            params: Map::new(),
        }];
    }

    let mut groups = Vec::new();
    let mut remaining = files;
    for rule in &config.known_formats {
        let substrings: Vec<String> = rule
            .files
            .iter()
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let mut matched: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        remaining.retain(|file| {
            let fname = lower_basename(file);
            match substrings.iter().find(|s| fname.contains(s.as_str())) {
                Some(sub) => {
                    matched.entry(grouping_key(&fname, sub)).or_default().push(file.clone());
                    false
                }
                None => true,
            }
        });

        if !matched.is_empty() {
            debug!(
                rule = rule.name.as_deref().unwrap_or("unnamed"),
                groups = matched.len(),
                "known format matched"
            );
        }
        groups.extend(matched.into_values().map(|files| Group {
            files,
            parsers: rule.parsers.clone(),
            params: rule.params.clone(),
        }));
    }

    // Keep this last: anything unclaimed is its own group.
    groups.extend(remaining.into_iter().map(Group::single));
    groups
}

/// The name with every occurrence of `substring` removed, so that
/// `a_[match]_b` groups with `a_[other match]_b` but not `c_[match]_d`.
pub fn grouping_key(lower_name: &str, substring: &str) -> String {
    lower_name.replace(substring, "")
}

fn lower_basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().trim().to_lowercase())
        .unwrap_or_default()
}

/// Extension (with leading dot) or the bare file name when there is none.
pub fn extension_of(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}
