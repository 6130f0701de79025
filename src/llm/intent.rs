use crate::providers::traits::CompletionProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user wants done with their memory this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Save,
    Deduce,
    Update,
    Delete,
    OffTopic,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Save,
        Intent::Deduce,
        Intent::Update,
        Intent::Delete,
        Intent::OffTopic,
    ];

    /// The exact category string the model is asked to answer with.
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Save => "save something in memory",
            Intent::Deduce => "deduce memory from unstructured text",
            Intent::Update => "update memory",
            Intent::Delete => "delete memory",
            Intent::OffTopic => "off_topic",
        }
    }

    /// Maps raw model output onto an intent. Anything unrecognized is
    /// `OffTopic`, so a stray answer can never reach a mutating branch.
    pub fn from_label(raw: &str) -> Intent {
        let normalized = normalize_label(raw);
        Intent::ALL
            .into_iter()
            .find(|intent| intent.label() == normalized)
            .unwrap_or_else(|| {
                log::debug!("Unrecognized intent label {:?}, treating as off_topic", raw);
                Intent::OffTopic
            })
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn normalize_label(raw: &str) -> String {
    let lowered = strip_noise(raw).to_lowercase();
    let label = match lowered.strip_prefix("category:") {
        Some(rest) => strip_noise(rest),
        None => lowered.as_str(),
    };
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_noise(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.'))
}

fn classification_prompt(prompt: &str) -> String {
    let categories = Intent::ALL
        .iter()
        .map(|intent| format!("- {}", intent.label()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Classify the user's message into exactly one of these categories:\n\
         {}\n\n\
         Use \"save something in memory\" when the user wants uploaded information stored, \
         \"deduce memory from unstructured text\" when they ask what is known or want an answer \
         drawn from stored memory, \"update memory\" when they add to or change something \
         already stored, \"delete memory\" when they want something forgotten, and \"off_topic\" \
         for anything else.\n\
         Answer with the category text only, exactly as written above, with no explanation.\n\n\
         Message: {}\n\n\
         Category:",
        categories, prompt
    )
}

/// Classifies a prompt with one model call. Never fails: provider errors and
/// unrecognized answers both come back as `Intent::OffTopic`.
pub async fn classify(provider: &dyn CompletionProvider, prompt: &str) -> Intent {
    match provider.complete(&classification_prompt(prompt)).await {
        Ok(answer) => {
            let intent = Intent::from_label(&answer);
            log::info!("Classified prompt as {}", intent);
            intent
        }
        Err(e) => {
            log::warn!("Intent classification failed, treating as off_topic: {}", e);
            Intent::OffTopic
        }
    }
}
