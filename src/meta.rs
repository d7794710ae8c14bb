//! Per-pipeline provenance sidecars.
//!
//! One JSON record per pipeline, read once at start and overwritten
//! wholesale at successful completion. Its digest fields are the only
//! state the change detector consults; detection itself is a pure
//! function of (previous meta, fresh digests) so runs are replayable in
//! tests.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

pub const LODGING_META_FILE: &str = "meta.json";
pub const NIGHTS_META_FILE: &str = "meta_tcd.json";

/// One downloaded workbook of a multi-file source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fetched_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailablePeriod {
    pub period_type: String,
    pub period_key: String,
    pub period_label: String,
    pub releases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMeta {
    pub source_page_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    pub fetched_at: String,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub processed_files: Vec<ProcessedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_periods: Vec<AvailablePeriod>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
}

/// Load a sidecar; a missing file is simply "no previous run". An
/// unreadable or corrupt sidecar is reported as such, not as a failed
/// write.
pub fn load(path: &Path) -> Result<Option<SourceMeta>, UpdateError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| {
        UpdateError::StoreWrite(format!("cannot read sidecar {}: {e}", path.display()))
    })?;
    let parsed = serde_json::from_str(&text).map_err(|e| {
        UpdateError::StoreWrite(format!("corrupt sidecar {}: {e}", path.display()))
    })?;
    Ok(Some(parsed))
}

/// Overwrite a sidecar atomically: serialize to a temp file in the same
/// directory, then rename over the target.
pub fn save(path: &Path, meta: &SourceMeta) -> Result<(), UpdateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(meta)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), json.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| UpdateError::StoreWrite(e.to_string()))?;
    Ok(())
}

/// Single-file change detection: has the source digest moved since the
/// last recorded run?
pub fn digest_changed(prev: Option<&SourceMeta>, digest: &str) -> bool {
    match prev.and_then(|m| m.source_sha256.as_deref()) {
        Some(old) => old != digest,
        None => true,
    }
}

/// Multi-file change detection: the set of (url → sha256) must match the
/// previously processed files exactly. A new, removed, or re-hashed file
/// all count as changed.
pub fn file_set_changed(prev: Option<&SourceMeta>, current: &[(String, String)]) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    let old: HashMap<&str, &str> = prev
        .processed_files
        .iter()
        .map(|f| (f.url.as_str(), f.sha256.as_str()))
        .collect();
    if old.len() != current.len() {
        return true;
    }
    current
        .iter()
        .any(|(url, sha)| old.get(url.as_str()) != Some(&sha.as_str()))
}
