pub mod api;
pub mod commands;
pub mod config;
pub mod database;
pub mod document;
pub mod llm;
pub mod providers;

// Re-export commonly used items
pub use commands::{CommandHandler, Dispatcher, TurnReport};
pub use config::{AppConfig, ModelChoice};
pub use database::{MemoryRecord, MemoryStore, Recall};
pub use llm::Intent;
