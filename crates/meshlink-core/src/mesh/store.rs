//! Node record persistence
//!
//! The directory only needs two things from storage: every record at
//! startup, and a write after each identity or position change. Both
//! stores here keep one record per mesh address.

use super::directory::NodeRecord;
use super::packet::NodeId;
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence contract for node records
pub trait NodeStore: Send {
    /// All stored records, in address order
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError>;

    /// Insert or replace the record for `record.address`
    fn upsert(&mut self, record: &NodeRecord) -> Result<(), StoreError>;
}

/// In-process store, lost on exit
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<NodeId, NodeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, address: &NodeId) -> Option<&NodeRecord> {
        self.records.get(address)
    }
}

impl NodeStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn upsert(&mut self, record: &NodeRecord) -> Result<(), StoreError> {
        self.records.insert(record.address, record.clone());
        Ok(())
    }
}

/// Store backed by a single JSON document
///
/// The whole document is rewritten on every upsert, through a temporary
/// file renamed over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: BTreeMap<NodeId, NodeRecord>,
}

impl JsonFileStore {
    /// Open the store, reading existing records if the file exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let list: Vec<NodeRecord> = serde_json::from_str(&text)?;
            list.into_iter().map(|r| (r.address, r)).collect()
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), records = records.len(), "opened node store");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let list: Vec<&NodeRecord> = self.records.values().collect();
        let text = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl NodeStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn upsert(&mut self, record: &NodeRecord) -> Result<(), StoreError> {
        self.records.insert(record.address, record.clone());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("meshlink-{}-{}-{}.json", tag, std::process::id(), nanos))
    }

    fn record(n: u32, name: &str) -> NodeRecord {
        NodeRecord {
            long_name: Some(name.to_string()),
            ..NodeRecord::new(NodeId::from_u32(n))
        }
    }

    #[test]
    fn test_memory_store_upsert_replaces() {
        let mut store = MemoryStore::new();
        store.upsert(&record(1, "first")).unwrap();
        store.upsert(&record(1, "second")).unwrap();
        store.upsert(&record(2, "other")).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&NodeId::from_u32(1)).unwrap().long_name.as_deref(), Some("second"));
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let path = temp_path("reopen");
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            assert!(store.load_all().unwrap().is_empty());
            store.upsert(&record(7, "Hilltop")).unwrap();
            let mut moved = record(8, "Valley");
            moved.latitude = Some(47.5);
            moved.longitude = Some(-122.25);
            store.upsert(&moved).unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 2);
        let valley = records.iter().find(|r| r.address == NodeId::from_u32(8)).unwrap();
        assert_eq!(valley.latitude, Some(47.5));
        assert_eq!(valley.long_name.as_deref(), Some("Valley"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
        fs::remove_file(&path).unwrap();
    }
}
