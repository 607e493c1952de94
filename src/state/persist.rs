/// On-disk format for the decision store
///
/// The whole store is one JSON document, replaced atomically on every save:
/// the new contents go to a sibling temp file which is flushed and then
/// renamed over the real one. A crash at any point leaves either the old
/// or the new file, never a half-written one.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Persisted record. Every field added after the first release carries
/// `#[serde(default)]` so older files keep loading.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDecisions {
    #[serde(default, rename = "keptIDs")]
    pub kept_ids: BTreeSet<String>,
    #[serde(default, rename = "deletedIDs")]
    pub deleted_ids: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub total_items_purged: u64,
    #[serde(default)]
    pub total_bytes_freed: u64,
    #[serde(default)]
    pub cached_kept_storage_bytes: Option<u64>,
}

impl Default for PersistedDecisions {
    fn default() -> Self {
        Self {
            kept_ids: BTreeSet::new(),
            deleted_ids: BTreeSet::new(),
            last_updated: Utc::now(),
            total_items_purged: 0,
            total_bytes_freed: 0,
            cached_kept_storage_bytes: None,
        }
    }
}

/// Load the record at `path`.
///
/// Never fails: a missing file yields an empty record. A file that cannot
/// be read or parsed is moved aside to `<name>.corrupt` first.
pub fn load(path: &Path) -> PersistedDecisions {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No decision file yet, starting empty");
            return PersistedDecisions::default();
        }
        Err(e) => {
            // The file may be fine; never let the next save overwrite it
            quarantine(path, &e);
            return PersistedDecisions::default();
        }
    };

    match serde_json::from_str::<PersistedDecisions>(&contents) {
        Ok(record) => {
            info!(
                kept = record.kept_ids.len(),
                deleted = record.deleted_ids.len(),
                "📁 Loaded decisions from {}",
                path.display()
            );
            record
        }
        Err(e) => {
            quarantine(path, &e);
            PersistedDecisions::default()
        }
    }
}

/// Move an unusable decision file to `<name>.corrupt`
fn quarantine(path: &Path, error: &dyn std::fmt::Display) {
    let target = corrupt_path(path);
    warn!(
        path = %path.display(),
        error = %error,
        "⚠️  Decision file is unusable, moving it to {} and starting empty",
        target.display()
    );
    if let Err(e) = fs::rename(path, &target) {
        warn!(error = %e, "Could not move decision file aside");
    }
}

/// Write `record` to `path` with write-then-rename
pub fn save(path: &Path, record: &PersistedDecisions) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(record)?;
    let tmp = temp_path(path);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, "tmp")
}

fn corrupt_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, "corrupt")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "decisions.json".into());
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{ "keptIDs": ["a"], "deletedIDs": ["b"] }"#;
        let record: PersistedDecisions = serde_json::from_str(json).unwrap();
        assert!(record.kept_ids.contains("a"));
        assert!(record.deleted_ids.contains("b"));
        assert_eq!(record.total_items_purged, 0);
        assert_eq!(record.total_bytes_freed, 0);
        assert_eq!(record.cached_kept_storage_bytes, None);
    }

    #[test]
    fn test_save_replaces_without_leaving_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");

        let mut record = PersistedDecisions::default();
        record.kept_ids.insert("one".into());
        save(&path, &record).unwrap();

        record.kept_ids.insert("two".into());
        record.total_bytes_freed = 42;
        save(&path, &record).unwrap();

        assert!(!temp_path(&path).exists());
        let loaded = load(&path);
        assert_eq!(loaded.kept_ids.len(), 2);
        assert_eq!(loaded.total_bytes_freed, 42);
    }

    #[test]
    fn test_corrupt_file_fails_open_and_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = load(&path);
        assert!(loaded.kept_ids.is_empty());
        assert!(loaded.deleted_ids.is_empty());
        assert!(!path.exists());
        assert!(corrupt_path(&path).exists());
    }

    #[test]
    fn test_unreadable_file_is_quarantined_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        // Not UTF-8, so reading fails before parsing
        let original = [0xff, 0xfe, b'{', 0x80];
        fs::write(&path, original).unwrap();

        let loaded = load(&path);
        assert!(loaded.kept_ids.is_empty());
        assert!(!path.exists());
        assert_eq!(fs::read(corrupt_path(&path)).unwrap(), original);

        save(&path, &PersistedDecisions::default()).unwrap();
        assert_eq!(fs::read(corrupt_path(&path)).unwrap(), original);
    }
}
