//! Dump files: the on-disk form of an [`InMemoryStore`](super::InMemoryStore).

use crate::core::{Document, PurgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DUMP_FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DUMP_FORMAT_VERSION
}

// ============================================================================
// Dump File
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub collections: BTreeMap<String, Vec<Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DumpMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpMetadata {
    pub created_at: DateTime<Utc>,
    pub document_count: usize,
    pub collection_count: usize,
}

impl DumpFile {
    pub fn new(collections: BTreeMap<String, Vec<Document>>) -> Self {
        let document_count = collections.values().map(Vec::len).sum();
        let collection_count = collections.len();

        Self {
            version: DUMP_FORMAT_VERSION,
            collections,
            metadata: Some(DumpMetadata {
                created_at: Utc::now(),
                document_count,
                collection_count,
            }),
        }
    }
}

// ============================================================================
// Dump Manager
// ============================================================================

pub struct DumpManager {
    path: PathBuf,
}

impl DumpManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<DumpFile> {
        let file = File::open(&self.path).map_err(|e| {
            PurgeError::Io(format!("Failed to open dump '{}': {}", self.path.display(), e))
        })?;
        let dump: DumpFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            PurgeError::Format(format!("Failed to parse dump '{}': {}", self.path.display(), e))
        })?;
        if dump.version != DUMP_FORMAT_VERSION {
            return Err(PurgeError::Format(format!(
                "Unsupported dump version {} (expected {})",
                dump.version, DUMP_FORMAT_VERSION
            )));
        }
        Ok(dump)
    }

    /// Write the dump through a sibling temp file and rename it into place.
    pub fn save(&self, dump: &DumpFile, pretty: bool) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| PurgeError::Io(format!("Failed to create dump directory: {}", e)))?;

        let temp = NamedTempFile::new_in(&parent)
            .map_err(|e| PurgeError::Io(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            if pretty {
                serde_json::to_writer_pretty(&mut writer, dump)?;
            } else {
                serde_json::to_writer(&mut writer, dump)?;
            }
            writer
                .flush()
                .map_err(|e| PurgeError::Io(format!("Failed to flush dump: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| PurgeError::Io(format!("Failed to sync dump: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| PurgeError::Io(format!("Failed to rename dump: {}", e.error)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_dump_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DumpManager::new(temp_dir.path().join("db.json"));

        let mut collections = BTreeMap::new();
        collections.insert(
            "units".to_string(),
            vec![doc(json!({"_id": "u/0", "txn-queue": ["t1_a"]}))],
        );
        manager.save(&DumpFile::new(collections), true).unwrap();
        assert!(manager.exists());

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.version, DUMP_FORMAT_VERSION);
        assert_eq!(loaded.collections["units"].len(), 1);
        assert_eq!(loaded.metadata.unwrap().document_count, 1);
    }

    #[test]
    fn test_load_without_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hand.json");
        fs::write(&path, r#"{"collections": {"txns": []}}"#).unwrap();

        let loaded = DumpManager::new(&path).load().unwrap();
        assert!(loaded.collections.contains_key("txns"));
        assert!(loaded.metadata.is_none());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("future.json");
        fs::write(&path, r#"{"version": 9, "collections": {}}"#).unwrap();

        let err = DumpManager::new(&path).load().unwrap_err();
        assert!(matches!(err, PurgeError::Format(_)));
    }
}
