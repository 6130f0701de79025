use crate::database::Database;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const GREETING: &str = "How can I help you?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
#[error("Failed to render {role} message: {reason}")]
pub struct RenderError {
    pub role: Role,
    pub reason: String,
}

/// Where chat turns end up: a terminal, an HTTP response buffer, a test recorder.
pub trait Renderer: Send + Sync {
    fn render(&mut self, turn: &ChatTurn) -> Result<(), RenderError>;

    /// Out-of-band notice; never part of the transcript.
    fn notice(&mut self, message: &str);
}

/// The transcript of the current conversation plus pending-step metadata.
///
/// When a [`Database`] is attached every appended turn is written through, a
/// reset clears the table, and [`ChatSession::restore`] rebuilds the session
/// from it. Persistence failures are logged and otherwise ignored.
pub struct ChatSession {
    transcript: Vec<ChatTurn>,
    steps: HashMap<String, String>,
    db: Option<Database>,
}

impl ChatSession {
    /// A fresh session holding only the greeting.
    pub fn new() -> Self {
        Self {
            transcript: vec![ChatTurn::new(Role::Assistant, GREETING)],
            steps: HashMap::new(),
            db: None,
        }
    }

    /// Restores the transcript from `db`, or starts fresh when it is empty.
    pub async fn restore(db: Database) -> Self {
        let mut session = Self {
            transcript: Vec::new(),
            steps: HashMap::new(),
            db: Some(db.clone()),
        };

        match db.load_transcript().await {
            Ok(turns) if !turns.is_empty() => {
                log::info!("Restored {} turns from the previous session", turns.len());
                session.transcript = turns;
            }
            Ok(_) => session.clear().await,
            Err(e) => {
                log::warn!("Could not restore transcript, starting fresh: {}", e);
                session.clear().await;
            }
        }
        session
    }

    pub async fn append(&mut self, role: Role, text: impl Into<String>) -> &ChatTurn {
        let turn = ChatTurn::new(role, text);
        if let Some(db) = &self.db {
            if let Err(e) = db.save_turn(&turn).await {
                log::warn!("Failed to persist {} turn: {}", role, e);
            }
        }
        self.transcript.push(turn);
        &self.transcript[self.transcript.len() - 1]
    }

    /// Drops the whole history and leaves a single greeting turn.
    pub async fn clear(&mut self) {
        self.transcript.clear();
        self.steps.clear();
        if let Some(db) = &self.db {
            if let Err(e) = db.clear_transcript().await {
                log::warn!("Failed to clear persisted transcript: {}", e);
            }
        }
        self.append(Role::Assistant, GREETING).await;
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.transcript
    }

    pub fn set_step(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.steps.insert(key.into(), value.into());
    }

    pub fn step(&self, key: &str) -> Option<&str> {
        self.steps.get(key).map(String::as_str)
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_greeting() {
        let session = ChatSession::new();
        assert_eq!(session.len(), 1);
        assert_eq!(session.turns()[0].role, Role::Assistant);
        assert_eq!(session.turns()[0].text, GREETING);
    }

    #[tokio::test]
    async fn clear_resets_to_single_greeting() {
        let mut session = ChatSession::new();
        session.append(Role::User, "hello").await;
        session.append(Role::Assistant, "hi").await;
        session.set_step("intent", "off_topic");

        session.clear().await;

        assert_eq!(session.len(), 1);
        assert_eq!(session.turns().last().unwrap().text, GREETING);
        assert!(session.step("intent").is_none());
    }

    #[tokio::test]
    async fn restore_replays_persisted_turns() {
        let db = Database::open_in_memory().await.unwrap();
        {
            let mut session = ChatSession::restore(db.clone()).await;
            session.append(Role::User, "remember this").await;
        }

        let restored = ChatSession::restore(db).await;
        let texts: Vec<&str> = restored.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec![GREETING, "remember this"]);
    }

    #[test]
    fn role_parses_from_its_name() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }
}
