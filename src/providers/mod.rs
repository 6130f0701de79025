pub mod groq;
pub mod openai;
pub mod traits;

use crate::config::{ModelChoice, ProviderConfig};
use anyhow::Result;
use groq::GroqProvider;
use openai::OpenAIProvider;
use traits::CompletionProvider;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful personal assistant that keeps and consults a memory of facts about the user.";

/// Builds the provider behind a model choice with the given credential.
pub fn connect(choice: ModelChoice, api_key: String) -> Result<Box<dyn CompletionProvider>> {
    let config = ProviderConfig::from_env(choice.provider_name());
    let provider: Box<dyn CompletionProvider> = match choice {
        ModelChoice::Llama3 => Box::new(GroqProvider::with_config(
            api_key,
            SYSTEM_PROMPT.to_string(),
            config,
        )?),
        ModelChoice::Gpt4 => Box::new(OpenAIProvider::with_config(
            api_key,
            SYSTEM_PROMPT.to_string(),
            config,
        )),
    };
    log::info!("Connected {} provider", choice.provider_name());
    Ok(provider)
}
