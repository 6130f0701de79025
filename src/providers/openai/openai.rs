use crate::config::ProviderConfig;
use crate::llm::embeddings::Embedder;
use crate::providers::traits::CompletionProvider;
use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::env;

const EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Clone)]
pub struct OpenAIProvider {
    system_message: String,
    client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn with_config(api_key: String, system_message: String, config: ProviderConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.api_url.clone());
        let client = Client::with_config(openai_config);

        let chat_model = config.primary_model().unwrap_or("gpt-4-0613").to_string();
        let embedding_model = env::var("OPENAI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        Self {
            system_message,
            client,
            chat_model,
            embedding_model,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(self.temperature)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_message.clone())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.to_string())
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No response content"))
    }
}

#[async_trait]
impl Embedder for OpenAIProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text.to_string())
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        response
            .data
            .first()
            .map(|embedding| embedding.embedding.clone())
            .ok_or_else(|| anyhow!("No embedding returned from OpenAI"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}
