//! services/api/src/adapters/openai_json.rs
//!
//! Shared plumbing for the chat-completion adapters that expect a JSON object back.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use residency_core::ports::{PortError, PortResult};
use serde::de::DeserializeOwned;

/// Sends one system and one user message and parses the reply as `T`.
pub(crate) async fn complete_json<T: DeserializeOwned>(
    client: &Client<OpenAIConfig>,
    model: &str,
    system: &str,
    prompt: String,
    temperature: f32,
) -> PortResult<T> {
    let messages = vec![
        ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        ),
        ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        ),
    ];

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .temperature(temperature)
        .response_format(ResponseFormat::JsonObject)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

    let response = client
        .chat()
        .create(request)
        .await
        .map_err(|e| PortError::Unavailable(format!("Chat completion failed: {}", e)))?;

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| PortError::Unexpected("Empty completion".to_string()))?;

    parse_reply(&content)
}

/// Parses a model reply, tolerating a surrounding Markdown code fence.
pub(crate) fn parse_reply<T: DeserializeOwned>(content: &str) -> PortResult<T> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
        .map_err(|e| PortError::Unexpected(format!("Unparseable model reply: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use residency_core::ports::{BotReply, Classification, LanguageVerdict};
    use residency_core::domain::DocumentType;

    #[test]
    fn fenced_replies_are_unwrapped() {
        let reply: BotReply =
            parse_reply("```json\n{\"content\": \"Hola\", \"confidence\": 0.9}\n```").unwrap();
        assert_eq!(reply.content, "Hola");
    }

    #[test]
    fn camel_case_fields_are_read() {
        let verdict: LanguageVerdict = parse_reply(
            r#"{"isSpanish": false, "detectedLanguage": "English", "confidence": 0.97}"#,
        )
        .unwrap();
        assert!(!verdict.is_spanish);

        let classification: Classification = parse_reply(
            r#"{"documentType": "Criminal Record Certificate", "country": "Argentina", "confidence": 0.8}"#,
        )
        .unwrap();
        assert_eq!(classification.document_type, DocumentType::CriminalRecordCertificate);
    }

    #[test]
    fn unknown_document_types_are_rejected() {
        let result: PortResult<Classification> =
            parse_reply(r#"{"documentType": "Library Card", "country": "Chile", "confidence": 0.5}"#);
        assert!(matches!(result, Err(PortError::Unexpected(_))));
    }
}
