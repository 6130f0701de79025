use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub models: Vec<String>,
    pub api_url: String,
    pub temperature: f32,
}

impl ProviderConfig {
    pub fn from_env(provider: &str) -> Self {
        let prefix = provider.to_uppercase();

        // Get models from env or use defaults
        let models = env::var(format!("{}_MODELS", prefix))
            .map(|m| m.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| match provider {
                "groq" => vec!["llama3-8b-8192".to_string()],
                "openai" => vec!["gpt-4-0613".to_string()],
                _ => vec![],
            });

        // Get API URL from env or use default
        let api_url = env::var(format!("{}_API_URL", prefix)).unwrap_or_else(|_| match provider {
            "groq" => "https://api.groq.com/openai/v1/chat/completions".to_string(),
            "openai" => "https://api.openai.com/v1".to_string(),
            _ => String::new(),
        });

        // Classification and extraction want repeatable output
        let temperature = env::var(format!("{}_TEMPERATURE", prefix))
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0.0);

        Self {
            models,
            api_url,
            temperature,
        }
    }

    pub fn primary_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }
}

/// The model selector. Both choices are wired to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    #[default]
    Llama3,
    Gpt4,
}

impl ModelChoice {
    pub fn provider_name(&self) -> &'static str {
        match self {
            ModelChoice::Llama3 => "groq",
            ModelChoice::Gpt4 => "openai",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelChoice::Llama3 => "Llama3 - 8B",
            ModelChoice::Gpt4 => "gpt-4-0613",
        }
    }

    /// Looks up the credential for this model: `<PROVIDER>_API_KEY`, then `API_KEY`.
    pub fn api_key_from_env(&self) -> Option<String> {
        let key_var = format!("{}_API_KEY", self.provider_name().to_uppercase());
        env::var(key_var)
            .or_else(|_| env::var("API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl FromStr for ModelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llama3" | "llama" | "groq" | "llama3-8b" => Ok(ModelChoice::Llama3),
            "gpt4" | "gpt-4" | "openai" | "gpt-4-0613" => Ok(ModelChoice::Gpt4),
            other => Err(format!("Unknown model: {}. Available models: llama3, gpt4", other)),
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Local,
    Qdrant,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "disk" => Ok(StoreBackend::Local),
            "qdrant" => Ok(StoreBackend::Qdrant),
            other => Err(format!("Unknown memory backend: {}. Use local or qdrant", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingKind {
    #[default]
    Hashing,
    OpenAI,
}

impl FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hashing" | "local" => Ok(EmbeddingKind::Hashing),
            "openai" => Ok(EmbeddingKind::OpenAI),
            other => Err(format!("Unknown embeddings: {}. Use hashing or openai", other)),
        }
    }
}

/// Process-wide settings, resolved once at startup and handed to constructors.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upload_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub backend: StoreBackend,
    pub qdrant_url: String,
    pub collection: String,
    pub transcript_db: PathBuf,
    pub deduce_top_k: usize,
    pub embeddings: EmbeddingKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./text_files"),
            memory_dir: PathBuf::from("./memory_db"),
            backend: StoreBackend::Local,
            qdrant_url: "http://localhost:6333".to_string(),
            collection: "memory_records".to_string(),
            transcript_db: PathBuf::from("data/transcript.db"),
            deduce_top_k: 3,
            embeddings: EmbeddingKind::Hashing,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match env::var("MEMORY_BACKEND") {
            Ok(value) => value.parse().unwrap_or_else(|e: String| {
                log::warn!("{}; falling back to local", e);
                StoreBackend::Local
            }),
            Err(_) => defaults.backend,
        };

        let embeddings = match env::var("EMBEDDINGS") {
            Ok(value) => value.parse().unwrap_or_else(|e: String| {
                log::warn!("{}; falling back to hashing", e);
                EmbeddingKind::Hashing
            }),
            Err(_) => defaults.embeddings,
        };

        Self {
            upload_dir: env::var("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            memory_dir: env::var("MEMORY_DIR").map(PathBuf::from).unwrap_or(defaults.memory_dir),
            backend,
            qdrant_url: env::var("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            collection: env::var("MEMORY_COLLECTION").unwrap_or(defaults.collection),
            transcript_db: env::var("TRANSCRIPT_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.transcript_db),
            deduce_top_k: env::var("DEDUCE_TOP_K")
                .ok()
                .and_then(|k| k.parse().ok())
                .filter(|k| *k > 0)
                .unwrap_or(defaults.deduce_top_k),
            embeddings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_choices() {
        assert_eq!("llama3".parse::<ModelChoice>().unwrap(), ModelChoice::Llama3);
        assert_eq!("GPT-4".parse::<ModelChoice>().unwrap(), ModelChoice::Gpt4);
        assert!("claude".parse::<ModelChoice>().is_err());
    }

    #[test]
    fn model_choice_maps_to_provider() {
        assert_eq!(ModelChoice::Llama3.provider_name(), "groq");
        assert_eq!(ModelChoice::Gpt4.provider_name(), "openai");
        assert_eq!(ModelChoice::default(), ModelChoice::Llama3);
    }

    #[test]
    fn parses_backends() {
        assert_eq!("qdrant".parse::<StoreBackend>().unwrap(), StoreBackend::Qdrant);
        assert_eq!("Local".parse::<StoreBackend>().unwrap(), StoreBackend::Local);
        assert!("chroma".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn default_config_uses_relative_paths() {
        let config = AppConfig::default();
        assert_eq!(config.upload_dir, PathBuf::from("./text_files"));
        assert_eq!(config.deduce_top_k, 3);
        assert_eq!(config.backend, StoreBackend::Local);
    }

    #[test]
    fn unknown_provider_has_no_models() {
        let config = ProviderConfig::from_env("nonexistent_provider_xyz");
        assert!(config.models.is_empty());
        assert!(config.primary_model().is_none());
    }
}
