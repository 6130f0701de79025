use crate::providers::traits::CompletionProvider;
use anyhow::Result;

/// The narrow model calls behind each memory branch. Outputs are untrusted
/// free text and are handed on without validation.
pub struct MemoryExtractor<'a> {
    provider: &'a dyn CompletionProvider,
}

impl<'a> MemoryExtractor<'a> {
    pub fn new(provider: &'a dyn CompletionProvider) -> Self {
        Self { provider }
    }

    /// Turns an unstructured upload into a normalized record.
    pub async fn extract_structured(&self, raw_text: &str) -> Result<String> {
        let prompt = format!(
            "Extract every fact about the user from the text below and rewrite them as a \
             structured record, one \"key: value\" line per fact (for example \
             \"favorite color: blue\"). Keep the user's wording for values, do not invent \
             facts, and return only the record.\n\n\
             Text:\n{}\n\n\
             Record:",
            raw_text
        );
        self.provider.complete(&prompt).await
    }

    /// Folds new information from the prompt into an existing record.
    pub async fn merge(&self, existing_content: &str, new_prompt: &str) -> Result<String> {
        let prompt = format!(
            "Here is a stored memory record:\n{}\n\n\
             The user now says: {}\n\n\
             Rewrite the record so it includes the new or changed information. Keep every \
             unrelated detail exactly as it is, keep the same \"key: value\" layout, and return \
             only the updated record.\n\n\
             Updated record:",
            existing_content, new_prompt
        );
        self.provider.complete(&prompt).await
    }

    /// Names the topic the user wants forgotten, used as the search query.
    pub async fn extract_category(&self, prompt: &str) -> Result<String> {
        let prompt = format!(
            "The user wants something removed from their stored memory. Reply with only the \
             category or topic to remove, in a few words (for example \"favorite color\").\n\n\
             Request: {}\n\n\
             Category:",
            prompt
        );
        let category = self.provider.complete(&prompt).await?;
        Ok(category.trim().to_string())
    }

    /// The record left after removing what the prompt asks to forget. An
    /// empty result means nothing remains.
    pub async fn compute_residual(&self, existing_content: &str, prompt: &str) -> Result<String> {
        let prompt = format!(
            "Here is a stored memory record:\n{}\n\n\
             The user asks: {}\n\n\
             Remove the information the user wants forgotten and return the rest of the record \
             unchanged. If nothing would remain, return an empty reply. Return only the \
             remaining record.\n\n\
             Remaining record:",
            existing_content, prompt
        );
        let residual = self.provider.complete(&prompt).await?;
        Ok(normalize_residual(&residual))
    }

    /// Answers a question from retrieved memory records in a single call.
    pub async fn answer(&self, question: &str, context: &[String]) -> Result<String> {
        let context = context
            .iter()
            .enumerate()
            .map(|(i, record)| format!("[{}]\n{}", i + 1, record))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Use the following pieces of stored memory to answer the question at the end. \
             If the memory does not contain the answer, say that you don't know instead of \
             guessing.\n\n\
             {}\n\n\
             Question: {}\n\
             Helpful answer:",
            context, question
        );
        self.provider.complete(&prompt).await
    }
}

fn normalize_residual(residual: &str) -> String {
    let trimmed = residual.trim();
    if trimmed == "\"\"" || trimmed == "''" {
        return String::new();
    }
    trimmed.to_string()
}
