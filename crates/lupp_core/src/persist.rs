use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error_log::ErrorLog;
use crate::store::ScrapeStore;

pub fn save_store(path: &Path, store: &ScrapeStore) -> Result<()> {
    write_json(path, store)
}

pub fn load_store(path: &Path) -> Result<ScrapeStore> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut store: ScrapeStore = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    store.normalize_loaded();
    Ok(store)
}

pub fn save_error_log(path: &Path, errors: &ErrorLog) -> Result<()> {
    write_json(path, errors)
}

pub fn load_error_log(path: &Path) -> Result<ErrorLog> {
    if !path.exists() {
        return Ok(ErrorLog::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
