//! services/api/src/adapters/language_llm.rs
//!
//! Implements the `LanguageDetectionService` port with a chat-completion model.

use super::openai_json::complete_json;
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use residency_core::ports::{LanguageDetectionService, LanguageVerdict, PortResult};

const SYSTEM_PROMPT: &str =
    "You are a linguistic expert specialized in identifying languages in official documents.";

#[derive(Clone)]
pub struct OpenAiLanguageAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiLanguageAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn prompt(text: &str) -> String {
    format!(
        "Analyze the following text and determine the main language of the document.\n\
         Ignore proper names, places, dates, numbers, seals and signatures.\n\
         Focus only on the language of the body of the document.\n\n\
         Text:\n{}\n\n\
         Respond only with a JSON object in this format:\n\
         {{\"isSpanish\": boolean, \"detectedLanguage\": \"language name in English\", \"confidence\": number between 0 and 1}}",
        text
    )
}

#[async_trait]
impl LanguageDetectionService for OpenAiLanguageAdapter {
    async fn detect_language(&self, text: &str) -> PortResult<LanguageVerdict> {
        complete_json(&self.client, &self.model, SYSTEM_PROMPT, prompt(text), 0.1).await
    }
}
