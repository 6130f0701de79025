pub mod chat;
pub mod embeddings;
pub mod extractors;
pub mod intent;

pub use chat::{ChatSession, ChatTurn, RenderError, Renderer, Role};
pub use embeddings::{Embedder, HashingEmbedder};
pub use extractors::MemoryExtractor;
pub use intent::Intent;
