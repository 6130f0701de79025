use crate::config::ModelChoice;
use crate::document::Upload;
use crate::providers;
use colored::Colorize;

pub mod dispatch;
pub mod render;
mod system;

pub use dispatch::{DispatchState, Dispatcher, TurnError, TurnReport};
pub use render::{LogRenderer, Spinner, TerminalRenderer};
pub use system::SystemAction;

/// Interprets REPL input: `/`-prefixed local commands, everything else is a
/// conversation turn for the dispatcher.
pub struct CommandHandler {
    dispatcher: Dispatcher,
    model: ModelChoice,
    // Key given on the command line or with `/key`; wins over the environment
    api_key: Option<String>,
    staged_upload: Option<Upload>,
    spinner: Spinner,
}

impl CommandHandler {
    pub fn new(
        dispatcher: Dispatcher,
        model: ModelChoice,
        api_key: Option<String>,
        spinner: Spinner,
    ) -> Self {
        Self {
            dispatcher,
            model,
            api_key,
            staged_upload: None,
            spinner,
        }
    }

    pub fn model(&self) -> ModelChoice {
        self.model
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stage_upload(&mut self, upload: Upload) {
        println!(
            "📎 Attached {} ({} characters). It will be sent with your next prompt.",
            upload.file_name.bright_yellow(),
            upload.text.chars().count()
        );
        self.staged_upload = Some(upload);
    }

    pub async fn handle_command(&mut self, input: &str) -> Result<SystemAction, String> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(SystemAction::Continue);
        }

        let Some(command) = input.strip_prefix('/') else {
            self.handle_turn(input).await;
            return Ok(SystemAction::Continue);
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name.to_lowercase().as_str() {
            "help" | "exit" | "quit" => system::handle_command(name),
            "reset" => {
                self.dispatcher.reset().await;
                self.staged_upload = None;
                println!("🔄 Conversation cleared");
                Ok(SystemAction::Continue)
            }
            "memory" => self.list_memory().await.map(|_| SystemAction::Continue),
            "key" => self.set_api_key(arg.to_string()).map(|_| SystemAction::Continue),
            "model" => self.switch_model(arg).map(|_| SystemAction::Continue),
            "upload" => {
                if arg.is_empty() {
                    return Err("Usage: /upload <file>".to_string());
                }
                let upload = Upload::from_path(arg).await.map_err(|e| e.to_string())?;
                self.stage_upload(upload);
                Ok(SystemAction::Continue)
            }
            "forget" => self.forget(arg).await.map(|_| SystemAction::Continue),
            _ => Err(format!(
                "Unknown command /{}. Type /help for available commands.",
                name
            )),
        }
    }

    async fn handle_turn(&mut self, prompt: &str) {
        let upload = self.staged_upload.take();
        self.spinner.start("Thinking...");
        let report = self.dispatcher.handle_turn(prompt, upload).await;
        self.spinner.stop();

        if let Some(intent) = report.intent {
            log::debug!("Turn finished as {} with {} messages", intent, report.messages.len());
        }
        if report.reset {
            println!("🔄 The conversation was reset. {}", crate::llm::chat::GREETING);
        }
    }

    fn set_api_key(&mut self, key: String) -> Result<(), String> {
        if key.is_empty() {
            return Err("Usage: /key <api-key>".to_string());
        }
        self.api_key = Some(key);
        self.connect()?;
        println!("🔑 API key set for {}", self.model.to_string().cyan());
        Ok(())
    }

    fn switch_model(&mut self, name: &str) -> Result<(), String> {
        let model: ModelChoice = name.parse()?;
        self.model = model;
        self.connect()?;
        println!("🔄 Switched to {}", model.to_string().cyan());
        Ok(())
    }

    /// Rebuilds the provider for the current model. Without a key the
    /// dispatcher is left without one and turns ask for it.
    fn connect(&mut self) -> Result<(), String> {
        let key = self.api_key.clone().or_else(|| self.model.api_key_from_env());
        match key {
            Some(key) => {
                let provider = providers::connect(self.model, key)
                    .map_err(|e| format!("Failed to initialize {} provider: {}", self.model, e))?;
                self.dispatcher.set_provider(Some(provider));
            }
            None => {
                self.dispatcher.set_provider(None);
                println!("{}", dispatch::MISSING_KEY.yellow());
            }
        }
        Ok(())
    }

    async fn list_memory(&self) -> Result<(), String> {
        let records = self
            .dispatcher
            .store()
            .records()
            .await
            .map_err(|e| format!("Failed to read memory: {}", e))?;

        if records.is_empty() {
            println!("{}", dispatch::NOTHING_IN_MEMORY);
            return Ok(());
        }

        println!("\n🗂️ Stored memory ({} records):", records.len());
        for record in records {
            let preview: String = record.content.lines().next().unwrap_or_default().chars().take(60).collect();
            println!(
                "  • {} [{}] {}",
                record.id.cyan(),
                record.source().unwrap_or("-").bright_yellow(),
                preview
            );
        }
        println!();
        Ok(())
    }

    async fn forget(&mut self, id: &str) -> Result<(), String> {
        if id.is_empty() {
            return Err("Usage: /forget <id>".to_string());
        }
        let removed = self
            .dispatcher
            .forget(id)
            .await
            .map_err(|e| format!("Failed to remove memory: {}", e))?;
        if removed {
            println!("🗑️ Removed memory {}", id.cyan());
        } else {
            println!("No memory with id {}", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{LocalIndex, MemoryStore, Metadata};
    use crate::llm::chat::{ChatSession, Role};
    use crate::llm::embeddings::HashingEmbedder;
    use crate::llm::intent::Intent;
    use crate::providers::traits::CompletionProvider;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Classifies every prompt as a delete and answers everything else with
    /// the category, counting all calls.
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl CompletionProvider for Counting {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if prompt.starts_with("Classify") {
                Ok(Intent::Delete.label().to_string())
            } else {
                Ok("favorite color".to_string())
            }
        }
    }

    type Fixture = (CommandHandler, Arc<dyn MemoryStore>, String, Arc<AtomicUsize>);

    async fn handler(dir: &tempfile::TempDir) -> Fixture {
        let store: Arc<dyn MemoryStore> = Arc::new(
            LocalIndex::load(dir.path().join("memory"), Arc::new(HashingEmbedder::default()))
                .await
                .unwrap(),
        );
        let id = store
            .insert("favorite color: blue", Metadata::new())
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider: Box<dyn CompletionProvider> = Box::new(Counting(Arc::clone(&calls)));
        let dispatcher = Dispatcher::new(
            Some(provider),
            Arc::clone(&store),
            ChatSession::new(),
            Box::new(LogRenderer),
        );
        let handler = CommandHandler::new(dispatcher, ModelChoice::Llama3, None, Spinner::default());
        (handler, store, id, calls)
    }

    fn said_by_user(handler: &CommandHandler, text: &str) -> bool {
        handler
            .dispatcher()
            .transcript()
            .iter()
            .any(|turn| turn.role == Role::User && turn.text == text)
    }

    #[tokio::test]
    async fn natural_language_delete_reaches_the_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handler, store, _, calls) = handler(&dir).await;

        let action = handler.handle_command("forget my favorite color").await;

        assert!(matches!(action, Ok(SystemAction::Continue)));
        assert!(calls.load(Ordering::SeqCst) > 0);
        assert!(said_by_user(&handler, "forget my favorite color"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prompts_starting_with_command_words_are_turns() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handler, _, _, calls) = handler(&dir).await;

        let prompts = [
            "key facts about me please",
            "model trains are my hobby",
            "upload speeds are slow",
            "memory of my trip",
            "reset my favorite color",
        ];
        for prompt in prompts {
            let before = calls.load(Ordering::SeqCst);
            handler.handle_command(prompt).await.unwrap();
            assert!(calls.load(Ordering::SeqCst) > before, "prompt={prompt:?}");
            assert!(said_by_user(&handler, prompt), "prompt={prompt:?}");
        }
        assert!(handler.api_key.is_none());
        assert_eq!(handler.model(), ModelChoice::Llama3);
    }

    #[tokio::test]
    async fn slash_forget_removes_by_id_without_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handler, store, id, calls) = handler(&dir).await;

        handler.handle_command(&format!("/forget {}", id)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handler.dispatcher().transcript().len(), 1);
    }

    #[tokio::test]
    async fn slash_key_sets_the_credential() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handler, _, _, calls) = handler(&dir).await;

        handler.handle_command("/key gsk-test").await.unwrap();

        assert_eq!(handler.api_key.as_deref(), Some("gsk-test"));
        assert!(handler.dispatcher().has_provider());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(handler.handle_command("/key").await.is_err());
    }

    #[tokio::test]
    async fn slash_upload_stages_a_file_for_the_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colors.txt");
        std::fs::write(&path, "favorite color: blue").unwrap();
        let (mut handler, _, _, calls) = handler(&dir).await;

        handler
            .handle_command(&format!("/upload {}", path.display()))
            .await
            .unwrap();

        let staged = handler.staged_upload.as_ref().unwrap();
        assert_eq!(staged.file_name, "colors.txt");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn system_and_unknown_slash_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handler, _, _, calls) = handler(&dir).await;

        assert!(matches!(handler.handle_command("/exit").await, Ok(SystemAction::Exit)));
        assert!(matches!(handler.handle_command("/HELP").await, Ok(SystemAction::Continue)));
        assert!(handler.handle_command("/reboot").await.is_err());
        assert!(matches!(handler.handle_command("   ").await, Ok(SystemAction::Continue)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
