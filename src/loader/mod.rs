//! Input files for the import and translate commands.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::RawProgramRow;

/// Parse a programme spreadsheet export. Header names map to fields; rows
/// that fail to parse or carry no programme name are skipped with a warning.
pub fn load_programs(path: &Path) -> Result<Vec<RawProgramRow>> {
    debug!("Loading programmes from {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Cannot open {:?}", path))?;

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<RawProgramRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };
        if row.en_name.is_empty() && row.cn_name.is_empty() {
            warn!("Row {} in {:?}: no programme name, skipped", i + 1, path);
            continue;
        }
        rows.push(row);
    }

    info!("{:?}: {} programme row(s) loaded", path.file_name().unwrap_or_default(), rows.len());
    Ok(rows)
}

/// A single CSV file, or every `.csv` directly inside a directory (sorted).
pub fn discover_csv_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.exists() {
        bail!("{:?} does not exist", path);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let p = entry?.path();
        if p.is_file() && p.extension().map(|e| e == "csv").unwrap_or(false) {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("{:?} is not valid JSON", path))
}

/// The record list of a scrape output: the `items` of an envelope, a legacy
/// `professors` list, or a bare array.
pub fn record_list(doc: &Value) -> Option<&Vec<Value>> {
    match doc {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["items", "professors"].iter().find_map(|k| map.get(*k)?.as_array()),
        _ => None,
    }
}

pub fn record_list_mut(doc: &mut Value) -> Option<&mut Vec<Value>> {
    if doc.is_array() {
        return doc.as_array_mut();
    }
    let key = ["items", "professors"].into_iter().find(|k| doc.get(*k).is_some_and(Value::is_array))?;
    doc.get_mut(key)?.as_array_mut()
}

/// Typed records from a scrape output. Elements that do not fit `T` are
/// skipped with a warning.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let doc = read_document(path)?;
    let items = record_list(&doc).with_context(|| format!("{:?} holds no record list", path))?;

    let mut records = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value(item.clone()) {
            Ok(r) => records.push(r),
            Err(e) => warn!("Record {} in {:?}: {}", i + 1, path, e),
        }
    }
    info!("{:?}: {} record(s) loaded", path.file_name().unwrap_or_default(), records.len());
    Ok(records)
}
