//! Stream metadata store

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use simulive_core::schedule::{ScheduleError, StreamRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stream {0} not found")]
    NotFound(String),

    #[error("stream {0} already exists")]
    AlreadyExists(String),

    #[error("invalid stream: {0}")]
    Invalid(#[from] ScheduleError),

    #[error("failed to load streams: {0}")]
    Load(String),
}

/// Source of truth for stream records
pub trait MetadataStore: Send + Sync {
    fn get(&self, id: &str) -> Option<StreamRecord>;

    /// All records, ordered by scheduled start
    fn list(&self) -> Vec<StreamRecord>;

    fn create(&self, record: StreamRecord) -> Result<StreamRecord, StoreError>;

    /// Replace the record stored under `id`
    fn update(&self, id: &str, record: StreamRecord) -> Result<StreamRecord, StoreError>;

    fn delete(&self, id: &str) -> Result<StreamRecord, StoreError>;

    fn find_by_playback_id(&self, playback_id: &str) -> Option<StreamRecord>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    streams: RwLock<HashMap<String, StreamRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, validating every record
    pub fn with_records(records: Vec<StreamRecord>) -> Result<Self, StoreError> {
        let store = Self::new();
        for record in records {
            store.create(record)?;
        }
        Ok(store)
    }

    /// Seed a store from a JSON array of stream records
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StoreError::Load(format!("{}: {}", path.as_ref().display(), e)))?;
        let records: Vec<StreamRecord> =
            serde_json::from_str(&content).map_err(|e| StoreError::Load(e.to_string()))?;
        Self::with_records(records)
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, id: &str) -> Option<StreamRecord> {
        self.streams.read().get(id).cloned()
    }

    fn list(&self) -> Vec<StreamRecord> {
        let mut records: Vec<StreamRecord> = self.streams.read().values().cloned().collect();
        records.sort_by(|a, b| {
            a.scheduled_start
                .cmp(&b.scheduled_start)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    fn create(&self, record: StreamRecord) -> Result<StreamRecord, StoreError> {
        record.validate()?;

        let mut streams = self.streams.write();
        if streams.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        streams.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, id: &str, mut record: StreamRecord) -> Result<StreamRecord, StoreError> {
        record.id = id.to_string();
        record.validate()?;

        let mut streams = self.streams.write();
        let slot = streams
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        *slot = record.clone();
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<StreamRecord, StoreError> {
        self.streams
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find_by_playback_id(&self, playback_id: &str) -> Option<StreamRecord> {
        self.streams
            .read()
            .values()
            .find(|r| r.playback_id == playback_id)
            .cloned()
    }
}
