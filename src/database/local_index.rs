//! Embedded similarity index persisted as a single JSON file in a directory.

use super::vector_db::{MemoryRecord, MemoryStore, Metadata, Recall, StoreError};
use crate::llm::embeddings::{cosine_similarity, Embedder};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    record: MemoryRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

/// `generation` counts mutations; `saved` is the generation last written.
#[derive(Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    generation: u64,
    saved: u64,
}

impl IndexState {
    fn touch(&mut self) {
        self.generation += 1;
    }

    fn is_dirty(&self) -> bool {
        self.generation != self.saved
    }
}

pub struct LocalIndex {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    state: RwLock<IndexState>,
    // One writer of index.json at a time
    flush_lock: Mutex<()>,
}

impl LocalIndex {
    /// Opens the index under `dir`, creating the directory when missing. A
    /// directory without an index file yields an empty store.
    pub async fn load(dir: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let path = dir.join(INDEX_FILE);
        let mut state = IndexState::default();

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(raw) = raw {
            let file: IndexFile = serde_json::from_str(&raw)?;
            let mut entries = file.entries;
            if file.dimensions != embedder.dimensions() {
                warn!(
                    "Index at {} was built with {} dimensions, embedder has {}; re-embedding {} records",
                    path.display(),
                    file.dimensions,
                    embedder.dimensions(),
                    entries.len()
                );
                for entry in entries.iter_mut() {
                    entry.embedding = embedder
                        .embed(&entry.record.content)
                        .await
                        .map_err(|e| StoreError::Embedding(e.to_string()))?;
                }
                state.touch();
            }
            info!("Loaded {} memory records from {}", entries.len(), path.display());
            state.entries = entries;
        } else {
            info!("No memory index at {}, starting empty", path.display());
        }

        Ok(Self {
            dir,
            embedder,
            state: RwLock::new(state),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| StoreError::Embedding(e.to_string()))
    }

    /// Copies the entries out if anything changed since the last write,
    /// tagged with the generation they reflect.
    fn snapshot(&self) -> Option<(u64, IndexFile)> {
        let state = self.state.read();
        if !state.is_dirty() {
            return None;
        }
        Some((
            state.generation,
            IndexFile {
                version: INDEX_VERSION,
                dimensions: self.embedder.dimensions(),
                entries: state.entries.clone(),
            },
        ))
    }

    fn mark_saved(&self, generation: u64) {
        let mut state = self.state.write();
        state.saved = state.saved.max(generation);
    }

    async fn write_index(&self, file: &IndexFile) -> Result<(), StoreError> {
        let body = serde_json::to_string(file)?;
        let temp_path = self.dir.join(format!("{}.tmp", INDEX_FILE));

        let mut handle = fs::File::create(&temp_path).await?;
        handle.write_all(body.as_bytes()).await?;
        handle.sync_all().await?;
        drop(handle);

        fs::rename(temp_path, self.path()).await?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for LocalIndex {
    async fn insert(&self, content: &str, metadata: Metadata) -> Result<String, StoreError> {
        let embedding = self.embed(content).await?;
        let id = Uuid::new_v4().to_string();
        let record = MemoryRecord::new(id.clone(), content, metadata);

        let mut state = self.state.write();
        state.entries.push(IndexEntry { record, embedding });
        state.touch();
        debug!("inserted memory record (id={}, total={})", id, state.entries.len());
        Ok(id)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Recall, StoreError> {
        if self.state.read().entries.is_empty() {
            return Ok(Recall::Empty);
        }

        let query_embedding = self.embed(query).await?;
        let state = self.state.read();
        if state.entries.is_empty() {
            return Ok(Recall::Empty);
        }

        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(&query_embedding, &entry.embedding)))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let matches = scored
            .into_iter()
            .take(k)
            .map(|(position, _)| state.entries[position].record.clone())
            .collect();
        Ok(Recall::Matches(matches))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .entries
            .iter()
            .find(|entry| entry.record.metadata_id() == id)
            .map(|entry| entry.record.clone()))
    }

    async fn update(&self, id: &str, content: &str) -> Result<(), StoreError> {
        {
            let state = self.state.read();
            let entry = state
                .entries
                .iter()
                .find(|entry| entry.record.metadata_id() == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if entry.record.content == content {
                debug!("update of {} is a no-op, content unchanged", id);
                return Ok(());
            }
        }

        let embedding = self.embed(content).await?;
        let mut state = self.state.write();
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.record.metadata_id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.content = content.to_string();
        entry.record.touch();
        entry.embedding = embedding;
        state.touch();
        debug!("updated memory record (id={})", id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|entry| entry.record.metadata_id() != id);
        let removed = state.entries.len() != before;
        if removed {
            state.touch();
            debug!("removed memory record (id={})", id);
        }
        Ok(removed)
    }

    async fn records(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .entries
            .iter()
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().entries.len())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _writer = self.flush_lock.lock().await;
        let Some((generation, file)) = self.snapshot() else {
            return Ok(());
        };

        self.write_index(&file).await?;
        self.mark_saved(generation);
        info!("Persisted {} memory records to {}", file.entries.len(), self.path().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::embeddings::HashingEmbedder;
    use serde_json::Value;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::default())
    }

    fn source(name: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(name.to_string()));
        metadata
    }

    #[tokio::test]
    async fn empty_directory_loads_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 0);
        assert_eq!(index.search("anything", 3).await.unwrap(), Recall::Empty);
    }

    #[tokio::test]
    async fn get_works_right_after_insert() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        let id = index.insert("favorite color: blue", source("colors.txt")).await.unwrap();

        let record = index.get(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "favorite color: blue");
        assert_eq!(record.metadata_id(), id);
        assert_eq!(record.source(), Some("colors.txt"));
    }

    #[tokio::test]
    async fn search_ranks_most_relevant_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        index.insert("lives in Berlin with two cats", Metadata::new()).await.unwrap();
        let color = index.insert("favorite color: blue", Metadata::new()).await.unwrap();
        index.insert("works as a nurse at night", Metadata::new()).await.unwrap();

        let best = index.search("favorite color", 1).await.unwrap().best().unwrap();
        assert_eq!(best.id, color);

        match index.search("favorite color", 3).await.unwrap() {
            Recall::Matches(records) => assert_eq!(records.len(), 3),
            Recall::Empty => panic!("store is not empty"),
        }
    }

    #[tokio::test]
    async fn search_is_deterministic_for_ties() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        let first = index.insert("alpha", Metadata::new()).await.unwrap();
        let second = index.insert("beta", Metadata::new()).await.unwrap();

        for _ in 0..3 {
            // A query without tokens scores every record zero.
            match index.search("???", 2).await.unwrap() {
                Recall::Matches(records) => {
                    assert_eq!(records[0].id, first);
                    assert_eq!(records[1].id, second);
                }
                Recall::Empty => panic!("store is not empty"),
            }
        }
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        let id = index.insert("X", Metadata::new()).await.unwrap();

        index.update(&id, "Y").await.unwrap();
        let once = index.records().await.unwrap();
        index.update(&id, "Y").await.unwrap();
        let twice = index.records().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice[0].content, "Y");
        assert_eq!(twice[0].metadata_id(), id);
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        let err = index.update("missing", "Y").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn flush_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
            let id = index.insert("favorite color: blue", Metadata::new()).await.unwrap();
            index.update(&id, "favorite color: green").await.unwrap();
            index.flush().await.unwrap();
            id
        };

        let reloaded = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        assert_eq!(reloaded.len().await.unwrap(), 1);
        let record = reloaded.get(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "favorite color: green");
    }

    #[tokio::test]
    async fn unflushed_writes_are_not_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
            index.insert("scratch", Metadata::new()).await.unwrap();
        }
        let reloaded = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        assert_eq!(reloaded.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_during_flush_stays_unsaved() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        index.insert("favorite color: blue", Metadata::new()).await.unwrap();

        let (generation, file) = index.snapshot().unwrap();
        index.insert("lives in Berlin", Metadata::new()).await.unwrap();
        index.write_index(&file).await.unwrap();
        index.mark_saved(generation);

        assert!(index.state.read().is_dirty());
        index.flush().await.unwrap();
        assert!(index.snapshot().is_none());

        let reloaded = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        assert_eq!(reloaded.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_deletes_record() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path(), embedder()).await.unwrap();
        let id = index.insert("to forget", Metadata::new()).await.unwrap();

        assert!(index.remove(&id).await.unwrap());
        assert!(!index.remove(&id).await.unwrap());
        assert_eq!(index.search("forget", 1).await.unwrap(), Recall::Empty);
    }

    #[tokio::test]
    async fn reload_with_new_dimensions_re_embeds() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = LocalIndex::load(dir.path(), Arc::new(HashingEmbedder::new(16)))
                .await
                .unwrap();
            index.insert("favorite color: blue", Metadata::new()).await.unwrap();
            index.flush().await.unwrap();
        }

        let index = LocalIndex::load(dir.path(), Arc::new(HashingEmbedder::new(64)))
            .await
            .unwrap();
        let best = index.search("favorite color", 1).await.unwrap().best().unwrap();
        assert_eq!(best.content, "favorite color: blue");
    }
}
