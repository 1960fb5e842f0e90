// =============================================================================
// File-backed NDJSON sink — the durable log's always-available fallback
// =============================================================================
//
// Every record category gets its own append-only file under `data/<kind>/`.
// Appends are whole-line writes; a torn write from a crash mid-append can at
// worst corrupt the final line, which readers skip rather than fail on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["trades", "decisions", "daily", "anomalies", "snapshots", "meta"] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("failed to create data dir {dir}"))?;
        }
        Ok(Self { root })
    }

    fn ndjson_path(&self, kind: &str, file_stem: &str) -> PathBuf {
        self.root.join(kind).join(format!("{file_stem}.ndjson"))
    }

    fn json_path(&self, kind: &str, file_stem: &str) -> PathBuf {
        self.root.join(kind).join(format!("{file_stem}.json"))
    }

    /// Append one record as a single JSON line.
    pub fn append_ndjson<T: Serialize>(&self, kind: &str, file_stem: &str, record: &T) -> Result<()> {
        let path = self.ndjson_path(kind, file_stem);
        let line = serde_json::to_string(record).context("failed to serialize record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
        Ok(())
    }

    /// Overwrite the whole-file snapshot (e.g. daily summaries, keyed by
    /// date rather than appended).
    pub fn write_json<T: Serialize>(&self, kind: &str, file_stem: &str, record: &T) -> Result<()> {
        let path = self.json_path(kind, file_stem);
        let content = serde_json::to_string_pretty(record).context("failed to serialize record")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    }

    pub fn read_json(&self, kind: &str, file_stem: &str) -> Option<Value> {
        let path = self.json_path(kind, file_stem);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Read every well-formed line from an NDJSON file, skipping any line
    /// that fails to parse rather than failing the whole read.
    pub fn read_ndjson(&self, kind: &str, file_stem: &str) -> Vec<Value> {
        let path = self.ndjson_path(kind, file_stem);
        let Ok(content) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_read_ndjson_round_trips() {
        let dir = std::env::temp_dir().join(format!("bracket_log_test_{}", std::process::id()));
        let store = FileStore::new(&dir).unwrap();
        store.append_ndjson("trades", "2026-08-01", &json!({"id": "t1"})).unwrap();
        store.append_ndjson("trades", "2026-08-01", &json!({"id": "t2"})).unwrap();
        let records = store.read_ndjson("trades", "2026-08-01");
        assert_eq!(records.len(), 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_json_is_atomic_and_overwrites() {
        let dir = std::env::temp_dir().join(format!("bracket_log_test2_{}", std::process::id()));
        let store = FileStore::new(&dir).unwrap();
        store.write_json("daily", "2026-08-01", &json!({"total_trades": 1})).unwrap();
        store.write_json("daily", "2026-08-01", &json!({"total_trades": 2})).unwrap();
        let record = store.read_json("daily", "2026-08-01").unwrap();
        assert_eq!(record["total_trades"], 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = std::env::temp_dir().join(format!("bracket_log_test3_{}", std::process::id()));
        let store = FileStore::new(&dir).unwrap();
        store.append_ndjson("anomalies", "2026-08-01", &json!({"id": "a1"})).unwrap();
        let path = store.ndjson_path("anomalies", "2026-08-01");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not valid json").unwrap();
        let records = store.read_ndjson("anomalies", "2026-08-01");
        assert_eq!(records.len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
