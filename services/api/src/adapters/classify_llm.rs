//! services/api/src/adapters/classify_llm.rs
//!
//! Implements the `DocumentClassificationService` port. The model is told whether
//! the vision stage found a face, which separates identity documents from certificates.

use super::openai_json::complete_json;
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use residency_core::domain::DocumentType;
use residency_core::ports::{Classification, DocumentClassificationService, PortResult};

const SYSTEM_PROMPT: &str = "You are an expert in official documentation.";

#[derive(Clone)]
pub struct OpenAiClassifierAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClassifierAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn prompt(text: &str, has_face: bool) -> String {
    let face = if has_face {
        "The document contains a photo of a face."
    } else {
        "The document does not contain a photo of a face."
    };
    let types = DocumentType::ALL
        .iter()
        .map(|t| format!("- {}", t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze the following text extracted from an official document and determine its type \
         and issuing country.\n{}\n\n\
         The document type must be exactly one of:\n{}\n\n\
         Text:\n{}\n\n\
         Respond only with a JSON object in this format:\n\
         {{\"documentType\": \"one of the types above\", \"country\": \"issuing country\", \"confidence\": number between 0 and 1}}",
        face, types, text
    )
}

#[async_trait]
impl DocumentClassificationService for OpenAiClassifierAdapter {
    async fn classify(&self, text: &str, has_face: bool) -> PortResult<Classification> {
        complete_json(&self.client, &self.model, SYSTEM_PROMPT, prompt(text, has_face), 0.1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_type_and_the_face_hint() {
        let p = prompt("CERTIFICADO", true);
        for t in DocumentType::ALL {
            assert!(p.contains(t.as_str()));
        }
        assert!(p.contains("contains a photo of a face"));
        assert!(prompt("CERTIFICADO", false).contains("does not contain"));
    }
}
