use super::qdrant_config::create_qdrant_client;
use super::vector_db::{MemoryRecord, MemoryStore, Metadata, Recall, StoreError};
use crate::llm::embeddings::Embedder;
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, value::Kind, CountPointsBuilder, CreateCollectionBuilder,
        DeletePointsBuilder, Distance, GetPointsBuilder, PointId, PointStruct, PointsIdsList,
        ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
        VectorParamsBuilder,
    },
    Payload, Qdrant,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const SCROLL_LIMIT: u32 = 1000;

/// Memory records kept in a Qdrant collection. Upserts wait for the write to
/// be applied, so `flush` has nothing left to do.
pub struct QdrantStore {
    client: Arc<Qdrant>,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl QdrantStore {
    pub async fn connect(url: &str, collection: &str, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let client = create_qdrant_client(url).await?;
        let store = Self {
            client: Arc::new(client),
            collection: collection.to_string(),
            embedder,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let exists = self
            .client
            .collection_exists(self.collection.clone())
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        if exists {
            log::info!("Collection {} already exists, skipping creation", self.collection);
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(self.collection.clone()).vectors_config(VectorParamsBuilder::new(
                    self.embedder.dimensions() as u64,
                    Distance::Cosine,
                )),
            )
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        log::info!("Created collection {}", self.collection);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| StoreError::Embedding(e.to_string()))
    }

    async fn upsert(&self, record: &MemoryRecord, vector: Vec<f32>) -> Result<(), StoreError> {
        let payload = Payload::try_from(serde_json::json!({
            "content": record.content,
            "metadata": record.metadata,
        }))
        .map_err(|e| StoreError::Operation(e.to_string()))?;

        let point = PointStruct::new(record.id.clone(), vector, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true))
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for QdrantStore {
    async fn insert(&self, content: &str, metadata: Metadata) -> Result<String, StoreError> {
        let vector = self.embed(content).await?;
        let id = Uuid::new_v4().to_string();
        let record = MemoryRecord::new(id.clone(), content, metadata);
        self.upsert(&record, vector).await?;
        Ok(id)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Recall, StoreError> {
        if self.len().await? == 0 {
            return Ok(Recall::Empty);
        }

        let vector = self.embed(query).await?;
        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.clone(), vector, k as u64).with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        let records = results
            .result
            .into_iter()
            .filter_map(|point| record_from_point(point.id, point.payload))
            .collect();
        Ok(Recall::Matches(records))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(self.collection.clone(), vec![PointId::from(id.to_string())])
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .find_map(|point| record_from_point(point.id, point.payload)))
    }

    async fn update(&self, id: &str, content: &str) -> Result<(), StoreError> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.content == content {
            return Ok(());
        }

        record.content = content.to_string();
        record.touch();
        let vector = self.embed(content).await?;
        self.upsert(&record, vector).await
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.clone())
                    .points(PointsIdsList {
                        ids: vec![PointId::from(id.to_string())],
                    })
                    .wait(true),
            )
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(true)
    }

    async fn records(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(self.collection.clone())
                    .limit(SCROLL_LIMIT)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        let mut records: Vec<MemoryRecord> = response
            .result
            .into_iter()
            .filter_map(|point| record_from_point(point.id, point.payload))
            .collect();
        // Qdrant scrolls by id; present records in creation order instead.
        records.sort_by(|a, b| created_at(a).cmp(created_at(b)));
        Ok(records)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(response.result.map(|result| result.count as usize).unwrap_or(0))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        log::debug!("Qdrant collection {} is flushed on every write", self.collection);
        Ok(())
    }
}

fn created_at(record: &MemoryRecord) -> &str {
    record
        .metadata
        .get("created_at")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

fn record_from_point(id: Option<PointId>, payload: HashMap<String, Value>) -> Option<MemoryRecord> {
    let id = match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => return None,
    };

    let content = match payload.get("content").and_then(|value| value.kind.clone()) {
        Some(Kind::StringValue(content)) => content,
        _ => return None,
    };

    let metadata = match payload.get("metadata").and_then(|value| value.kind.clone()) {
        Some(Kind::StructValue(fields)) => fields
            .fields
            .into_iter()
            .map(|(key, value)| (key, to_json(value)))
            .collect(),
        _ => Metadata::new(),
    };

    let mut record = MemoryRecord {
        id,
        content,
        metadata,
    };
    record
        .metadata
        .entry("id".to_string())
        .or_insert_with(|| serde_json::Value::String(record.id.clone()));
    Some(record)
}

fn to_json(value: Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Value::from(d),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(to_json).collect())
        }
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .into_iter()
                .map(|(key, value)| (key, to_json(value)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    #[test]
    fn converts_scalar_values_to_json() {
        assert_eq!(to_json(string("blue")), serde_json::json!("blue"));
        assert_eq!(
            to_json(Value {
                kind: Some(Kind::IntegerValue(42))
            }),
            serde_json::json!(42)
        );
        assert_eq!(to_json(Value { kind: None }), serde_json::Value::Null);
    }

    #[test]
    fn point_without_content_is_skipped() {
        let id = Some(PointId::from(Uuid::new_v4().to_string()));
        assert!(record_from_point(id, HashMap::new()).is_none());
    }

    #[test]
    fn point_payload_becomes_record() {
        let uuid = Uuid::new_v4().to_string();
        let mut payload = HashMap::new();
        payload.insert("content".to_string(), string("favorite color: blue"));

        let record = record_from_point(Some(PointId::from(uuid.clone())), payload).unwrap();
        assert_eq!(record.id, uuid);
        assert_eq!(record.metadata_id(), uuid);
        assert_eq!(record.content, "favorite color: blue");
    }
}
