use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Operation failed: {0}")]
    Operation(String),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A stored unit of memory. `metadata["id"]` always mirrors `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl MemoryRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>, mut metadata: Metadata) -> Self {
        let id = id.into();
        let now = Utc::now().to_rfc3339();
        metadata.insert("id".to_string(), Value::String(id.clone()));
        metadata
            .entry("created_at".to_string())
            .or_insert_with(|| Value::String(now.clone()));
        metadata.insert("updated_at".to_string(), Value::String(now));
        Self {
            id,
            content: content.into(),
            metadata,
        }
    }

    /// The stable key used for update-in-place.
    pub fn metadata_id(&self) -> &str {
        self.metadata
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(self.id.as_str())
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub(crate) fn touch(&mut self) {
        self.metadata.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
}

/// Outcome of a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub enum Recall {
    /// Nothing has been stored yet.
    Empty,
    /// Records ordered by descending relevance.
    Matches(Vec<MemoryRecord>),
}

impl Recall {
    pub fn best(self) -> Option<MemoryRecord> {
        match self {
            Recall::Empty => None,
            Recall::Matches(records) => records.into_iter().next(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Recall::Empty => true,
            Recall::Matches(records) => records.is_empty(),
        }
    }
}

/// A persistent similarity-search index over memory records.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Adds a record and returns the id the store assigned to it.
    async fn insert(&self, content: &str, metadata: Metadata) -> Result<String, StoreError>;

    /// Returns up to `k` records ranked by relevance to `query`, or
    /// `Recall::Empty` when the store holds nothing.
    async fn search(&self, query: &str, k: usize) -> Result<Recall, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, StoreError>;

    /// Overwrites the content of an existing record in place.
    async fn update(&self, id: &str, content: &str) -> Result<(), StoreError>;

    /// Physically removes a record. Returns whether one was removed.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    /// All records in insertion order.
    async fn records(&self) -> Result<Vec<MemoryRecord>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    /// Makes every prior write durable.
    async fn flush(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_mirrors_id_in_metadata() {
        let record = MemoryRecord::new("42", "X", Metadata::new());
        assert_eq!(record.metadata_id(), "42");
        assert!(record.metadata.contains_key("created_at"));
        assert!(record.metadata.contains_key("updated_at"));
    }

    #[test]
    fn new_record_keeps_existing_created_at() {
        let mut metadata = Metadata::new();
        metadata.insert("created_at".to_string(), Value::String("2024-01-01T00:00:00Z".into()));
        metadata.insert("source".to_string(), Value::String("notes.txt".into()));
        let record = MemoryRecord::new("a", "content", metadata);
        assert_eq!(record.metadata["created_at"], "2024-01-01T00:00:00Z");
        assert_eq!(record.source(), Some("notes.txt"));
    }

    #[test]
    fn recall_best_takes_first_match() {
        let first = MemoryRecord::new("1", "first", Metadata::new());
        let second = MemoryRecord::new("2", "second", Metadata::new());
        let recall = Recall::Matches(vec![first.clone(), second]);
        assert!(!recall.is_empty());
        assert_eq!(recall.best(), Some(first));
        assert_eq!(Recall::Empty.best(), None);
        assert!(Recall::Matches(vec![]).is_empty());
    }
}
