pub mod database;
pub mod local_index;
pub mod qdrant_config;
pub mod qdrant_store;
pub mod vector_db;

pub use database::Database;
pub use database::DatabaseError;
pub use local_index::LocalIndex;
pub use qdrant_store::QdrantStore;
pub use vector_db::{MemoryRecord, MemoryStore, Metadata, Recall, StoreError};
