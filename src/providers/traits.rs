use anyhow::Result;
use async_trait::async_trait;

/// A hosted text-generation model. Each call is a single prompted completion;
/// the provider keeps no conversation memory of its own.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
