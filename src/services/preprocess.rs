use std::sync::Arc;

use tracing::{info, warn};

use crate::completion::{CompletionModel, Message};
use crate::models::document::{Document, DocumentMetadata};

pub const MIN_SUMMARY_WORDS: usize = 10;

const PII_PROMPT: &str = "You can only respond with the word \"True\" or \"False\", where your answer \
indicates whether the text in the user's message contains PII. Do not explain your answer, and do \
not use punctuation. Your task is to identify whether the text extracted from company files \
contains sensitive PII that should not be shared with the broader company. Look out for:\n\
- An email address that identifies a specific person in either the local-part or the domain\n\
- The postal address of a private residence (must include at least a street name)\n\
- The postal address of a public place (must include either a street name or business name)\n\
- Notes about hiring decisions with mentioned names of candidates.";

const METADATA_PROMPT: &str = "Given a document from a user, try to extract the following metadata:\n\
- name: string, a short title for the document\n\
- originalOwnersName: string or don't specify\n\
- originalOwnersEmail: string or don't specify\n\
- originalCreatedTime: string or don't specify\n\
- originalModifiedTime: string or don't specify\n\
Respond with a JSON object containing the extracted metadata in key value pairs. \
If you don't find a metadata field, don't specify it.";

/// Which LLM-backed steps run on documents before they are chunked.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    pub screen_for_pii: bool,
    pub extract_metadata: bool,
    pub summary_words: Option<usize>,
}

impl PreprocessOptions {
    pub fn is_enabled(&self) -> bool {
        self.screen_for_pii || self.extract_metadata || self.summary_words.is_some()
    }
}

pub struct Preprocessor {
    completion_model: Arc<dyn CompletionModel>,
    options: PreprocessOptions,
}

impl Preprocessor {
    pub fn new(completion_model: Arc<dyn CompletionModel>, options: PreprocessOptions) -> anyhow::Result<Self> {
        if let Some(words) = options.summary_words {
            if words < MIN_SUMMARY_WORDS {
                anyhow::bail!("summary_words must be at least {MIN_SUMMARY_WORDS}, got {words}");
            }
        }
        Ok(Self {
            completion_model,
            options,
        })
    }

    /// True when the model flags the text as containing PII.
    pub async fn screen_text_for_pii(&self, text: &str) -> anyhow::Result<bool> {
        let messages = [Message::system(PII_PROMPT), Message::user(text)];
        let result = self.completion_model.complete(&messages, None, Some(0.0)).await?;
        Ok(result.content.trim_start().starts_with("True"))
    }

    /// Ask the model for metadata fields. Unparseable replies yield empty metadata.
    pub async fn extract_metadata(&self, text: &str) -> anyhow::Result<DocumentMetadata> {
        let messages = [Message::system(METADATA_PROMPT), Message::user(text)];
        let result = self.completion_model.complete(&messages, None, Some(0.0)).await?;
        Ok(parse_metadata_reply(&result.content))
    }

    /// Summarize `text` in at most `num_words` words.
    pub async fn summarize(&self, text: &str, num_words: usize) -> anyhow::Result<String> {
        if num_words < MIN_SUMMARY_WORDS {
            anyhow::bail!("num_words must be at least {MIN_SUMMARY_WORDS}");
        }
        if text.split_whitespace().count() <= num_words {
            return Ok(text.to_string());
        }
        let prompt = format!(
            "Your task is to summarize the text by using at most {num_words} words while preserving \
             the meaning of the text as much as possible. If the text cannot be summarized give me \
             the text as it is. Your only possible responses are either the initial text or its \
             summary. Do not explain your response."
        );
        let messages = [Message::system(prompt), Message::user(text)];
        let result = self.completion_model.complete(&messages, None, None).await?;
        Ok(result.content)
    }

    /// Run the enabled steps over `documents`. Documents flagged for PII are dropped.
    pub async fn process(&self, documents: Vec<Document>) -> anyhow::Result<Vec<Document>> {
        let mut kept = Vec::with_capacity(documents.len());
        for mut document in documents {
            if self.options.screen_for_pii && self.screen_text_for_pii(&document.text).await? {
                info!(
                    "Dropping document {} flagged for PII",
                    document.id.as_deref().unwrap_or("<unnamed>")
                );
                continue;
            }

            if self.options.extract_metadata {
                let extracted = self.extract_metadata(&document.text).await?;
                document
                    .metadata
                    .get_or_insert_with(DocumentMetadata::default)
                    .merge_missing(extracted);
            }

            if let Some(words) = self.options.summary_words {
                document.text = self.summarize(&document.text, words).await?;
            }

            kept.push(document);
        }
        Ok(kept)
    }
}

fn parse_metadata_reply(reply: &str) -> DocumentMetadata {
    let json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            warn!("Metadata extraction returned no JSON object");
            return DocumentMetadata::default();
        }
    };
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Failed to parse extracted metadata: {e}");
        DocumentMetadata::default()
    })
}
