use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Diagnostics collected during a run. Recording never interrupts the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
    #[serde(default)]
    pub timestamp: BTreeMap<String, String>,
    #[serde(flatten)]
    pub entries: BTreeMap<String, ErrorEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default)]
    pub info: Vec<String>,
}

fn entry_key(operation: &str, subject: &str) -> String {
    if subject.is_empty() {
        format!("error_{operation}")
    } else {
        format!("error_{operation} {subject}")
    }
}

pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

impl ErrorLog {
    /// Stamp `key` as last visited now.
    pub fn touch(&mut self, key: &str) {
        self.timestamp.insert(key.to_string(), now_timestamp());
    }

    /// Record a failure of `operation` on `subject` under `error_<operation> <subject>`.
    pub fn record(&mut self, operation: &str, subject: &str, info: Vec<String>) {
        let key = entry_key(operation, subject);
        warn!(operation, subject, info = ?info, "recorded error");
        self.timestamp.insert(key.clone(), now_timestamp());
        self.entries.insert(key, ErrorEntry { info });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, operation: &str, subject: &str) -> Option<&ErrorEntry> {
        self.entries.get(&entry_key(operation, subject))
    }

    pub fn extend(&mut self, other: ErrorLog) {
        self.timestamp.extend(other.timestamp);
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ErrorLog;

    #[test]
    fn record_flattens_entries_next_to_timestamps() {
        let mut log = ErrorLog::default();
        log.record(
            "scrape_category",
            "Kategori:Saknas (sv)",
            vec!["invalidcategory".to_string(), "bad".to_string()],
        );
        let value = serde_json::to_value(&log).expect("json");
        assert_eq!(
            value["error_scrape_category Kategori:Saknas (sv)"],
            json!({"info": ["invalidcategory", "bad"]})
        );
        assert!(value["timestamp"]["error_scrape_category Kategori:Saknas (sv)"].is_string());

        let parsed: ErrorLog = serde_json::from_value(value).expect("parse");
        assert_eq!(parsed, log);
        assert!(parsed.get("scrape_category", "Kategori:Saknas (sv)").is_some());
    }

    #[test]
    fn touch_only_updates_timestamp_map() {
        let mut log = ErrorLog::default();
        log.touch("Kategori:Testö (sv)");
        assert!(log.is_empty());
        assert!(log.timestamp.contains_key("Kategori:Testö (sv)"));
    }

    #[test]
    fn subjectless_entries_use_bare_operation_key() {
        let mut log = ErrorLog::default();
        log.record("analyze", "", vec!["missing length".to_string()]);
        assert!(log.entries.contains_key("error_analyze"));
        assert_eq!(log.len(), 1);
    }
}
