use crate::database::{MemoryStore, Metadata, Recall, StoreError};
use crate::document::{Upload, UploadArchive};
use crate::llm::chat::{ChatSession, ChatTurn, RenderError, Renderer, Role};
use crate::llm::extractors::MemoryExtractor;
use crate::llm::intent::{self, Intent};
use crate::providers::traits::CompletionProvider;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const MISSING_KEY: &str = "Please add your Model API key to continue.";
pub const MISSING_UPLOAD: &str =
    "You have not uploaded any file to save in memory! Please upload a file and enter a new prompt.";
pub const NOTHING_IN_MEMORY: &str = "There is Nothing in Memory";
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong. Please try again later.";

const DATA_UPLOADED: &str = "Data uploaded";
const DATA_STORED: &str = "Data stored in DB";
const UPDATING: &str = "Loading Old Memory....Updating Memory";
const UPDATED: &str = "Updated DB with new data";
const DELETING: &str = "Deleting Memory";
const DELETED: &str = "Memory updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Classifying,
    Saving,
    Deducing,
    Updating,
    Deleting,
    Chatting,
}

impl DispatchState {
    fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::Save => DispatchState::Saving,
            Intent::Deduce => DispatchState::Deducing,
            Intent::Update => DispatchState::Updating,
            Intent::Delete => DispatchState::Deleting,
            Intent::OffTopic => DispatchState::Chatting,
        }
    }
}

/// Every way a turn can stop short. None of these leave the dispatcher: each
/// one ends as a rendered message.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("No model API key configured")]
    MissingCredential,
    #[error("Save requested without an upload")]
    MissingUpload,
    #[error("Memory store is empty")]
    EmptyStore,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Language model request failed: {0}")]
    Provider(#[from] anyhow::Error),
    #[error("Memory store failed: {0}")]
    Store(#[from] StoreError),
}

impl TurnError {
    pub fn user_message(&self) -> String {
        match self {
            TurnError::MissingCredential => MISSING_KEY.to_string(),
            TurnError::MissingUpload => MISSING_UPLOAD.to_string(),
            TurnError::EmptyStore => NOTHING_IN_MEMORY.to_string(),
            TurnError::Render(_) => SOMETHING_WENT_WRONG.to_string(),
            TurnError::Provider(e) => format!("The language model could not answer: {}", e),
            TurnError::Store(e) => format!("The memory store could not complete the request: {}", e),
        }
    }

    /// Whether the message belongs in the transcript or is an out-of-band notice.
    fn is_conversational(&self) -> bool {
        matches!(self, TurnError::MissingUpload | TurnError::EmptyStore)
    }
}

/// What a single turn produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnReport {
    pub intent: Option<Intent>,
    /// Assistant messages appended to the transcript, in order.
    pub messages: Vec<String>,
    /// Out-of-band notice shown instead of, or after, the messages.
    pub notice: Option<String>,
    /// The transcript was wiped back to the greeting.
    pub reset: bool,
}

/// Routes each prompt to the memory workflow its intent calls for.
pub struct Dispatcher {
    provider: Option<Box<dyn CompletionProvider>>,
    store: Arc<dyn MemoryStore>,
    session: ChatSession,
    renderer: Box<dyn Renderer>,
    archive: Option<UploadArchive>,
    top_k: usize,
    state: DispatchState,
}

impl Dispatcher {
    pub fn new(
        provider: Option<Box<dyn CompletionProvider>>,
        store: Arc<dyn MemoryStore>,
        session: ChatSession,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        Self {
            provider,
            store,
            session,
            renderer,
            archive: None,
            top_k: 3,
            state: DispatchState::Idle,
        }
    }

    pub fn with_archive(mut self, archive: UploadArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn set_provider(&mut self, provider: Option<Box<dyn CompletionProvider>>) {
        self.provider = provider;
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        self.session.turns()
    }

    pub fn store(&self) -> Arc<dyn MemoryStore> {
        Arc::clone(&self.store)
    }

    /// User-triggered reset: the transcript goes back to the greeting.
    pub async fn reset(&mut self) {
        info!("Resetting conversation");
        self.session.clear().await;
        self.state = DispatchState::Idle;
    }

    /// Physically removes a record and persists the store.
    pub async fn forget(&mut self, id: &str) -> Result<bool, StoreError> {
        let removed = self.store.remove(id).await?;
        if removed {
            self.store.flush().await?;
            info!("Removed memory record {}", id);
        } else {
            warn!("No memory record with id {}", id);
        }
        Ok(removed)
    }

    /// Runs one full turn. Always returns to `Idle`.
    pub async fn handle_turn(&mut self, prompt: &str, upload: Option<Upload>) -> TurnReport {
        let mut report = TurnReport::default();

        if let Err(err) = self.run_turn(prompt, upload, &mut report).await {
            self.recover(err, &mut report).await;
        }

        self.enter(DispatchState::Idle);
        report
    }

    async fn run_turn(
        &mut self,
        prompt: &str,
        upload: Option<Upload>,
        report: &mut TurnReport,
    ) -> Result<(), TurnError> {
        self.show(Role::User, prompt).await?;

        if self.provider.is_none() {
            return Err(TurnError::MissingCredential);
        }

        self.enter(DispatchState::Classifying);
        let intent = intent::classify(self.provider()?, prompt).await;
        report.intent = Some(intent);
        self.session.set_step("intent", intent.label());
        self.enter(DispatchState::for_intent(intent));

        match intent {
            Intent::Save => self.save(upload, report).await,
            Intent::Deduce => self.deduce(prompt, report).await,
            Intent::Update => self.update(prompt, report).await,
            Intent::Delete => self.delete(prompt, report).await,
            Intent::OffTopic => self.chat(prompt, report).await,
        }
    }

    async fn save(&mut self, upload: Option<Upload>, report: &mut TurnReport) -> Result<(), TurnError> {
        let upload = upload.ok_or(TurnError::MissingUpload)?;
        self.say(DATA_UPLOADED, report).await?;

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(&upload).await {
                warn!("Could not archive {}: {}", upload.file_name, e);
            }
        }

        let structured = MemoryExtractor::new(self.provider()?)
            .extract_structured(&upload.text)
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), serde_json::Value::String(upload.file_name.clone()));
        let id = self.store.insert(&structured, metadata).await?;
        self.store.flush().await?;
        info!(
            "Stored memory {} from {} ({} records)",
            id,
            upload.file_name,
            self.store.len().await?
        );

        self.say(DATA_STORED, report).await
    }

    async fn deduce(&mut self, prompt: &str, report: &mut TurnReport) -> Result<(), TurnError> {
        let records = match self.store.search(prompt, self.top_k).await? {
            Recall::Matches(records) if !records.is_empty() => records,
            _ => return Err(TurnError::EmptyStore),
        };
        debug!("Answering from {} memory records", records.len());

        let context: Vec<String> = records.into_iter().map(|record| record.content).collect();
        let answer = MemoryExtractor::new(self.provider()?)
            .answer(prompt, &context)
            .await?;

        self.say(answer, report).await
    }

    async fn update(&mut self, prompt: &str, report: &mut TurnReport) -> Result<(), TurnError> {
        self.say(UPDATING, report).await?;

        let existing = self
            .store
            .search(prompt, 1)
            .await?
            .best()
            .ok_or(TurnError::EmptyStore)?;
        let id = existing.metadata_id().to_string();

        let merged = MemoryExtractor::new(self.provider()?)
            .merge(&existing.content, prompt)
            .await?;
        self.store.update(&id, &merged).await?;
        self.store.flush().await?;
        info!("Updated memory {}", id);

        self.say(UPDATED, report).await
    }

    async fn delete(&mut self, prompt: &str, report: &mut TurnReport) -> Result<(), TurnError> {
        let category = MemoryExtractor::new(self.provider()?)
            .extract_category(prompt)
            .await?;
        debug!("Delete request targets {:?}", category);

        let existing = self
            .store
            .search(&category.to_lowercase(), 1)
            .await?
            .best()
            .ok_or(TurnError::EmptyStore)?;
        let id = existing.metadata_id().to_string();

        self.say(DELETING, report).await?;
        let residual = MemoryExtractor::new(self.provider()?)
            .compute_residual(&existing.content, prompt)
            .await?;

        if residual.is_empty() {
            warn!("Nothing would remain of memory {}, leaving it unchanged", id);
            let notice = format!(
                "Nothing would remain of memory {id}, so it was left unchanged. \
                 Use `/forget {id}` to remove it completely."
            );
            self.renderer.notice(&notice);
            report.notice = Some(notice);
            return Ok(());
        }

        self.store.update(&id, &residual).await?;
        self.store.flush().await?;
        info!("Removed details from memory {}", id);
        self.say(DELETED, report).await
    }

    async fn chat(&mut self, prompt: &str, report: &mut TurnReport) -> Result<(), TurnError> {
        let response = self.provider()?.complete(prompt).await?;
        self.say(response, report).await
    }

    fn provider(&self) -> Result<&dyn CompletionProvider, TurnError> {
        self.provider.as_deref().ok_or(TurnError::MissingCredential)
    }

    fn enter(&mut self, state: DispatchState) {
        if self.state != state {
            debug!("Dispatcher {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    async fn say(&mut self, text: impl Into<String>, report: &mut TurnReport) -> Result<(), TurnError> {
        let text = text.into();
        self.show(Role::Assistant, text.clone()).await?;
        report.messages.push(text);
        Ok(())
    }

    async fn show(&mut self, role: Role, text: impl Into<String>) -> Result<(), TurnError> {
        let turn = self.session.append(role, text).await.clone();
        self.renderer.render(&turn)?;
        Ok(())
    }

    async fn recover(&mut self, err: TurnError, report: &mut TurnReport) {
        let err = if err.is_conversational() {
            info!("{}", err);
            match self.say(err.user_message(), report).await {
                Ok(()) => return,
                Err(render_failure) => render_failure,
            }
        } else {
            err
        };

        let message = err.user_message();
        match &err {
            TurnError::Render(e) => {
                error!("{}; resetting conversation", e);
                self.session.clear().await;
                report.reset = true;
            }
            TurnError::MissingCredential => info!("{}", err),
            _ => error!("{}", err),
        }
        self.renderer.notice(&message);
        report.notice = Some(message);
    }
}
