//! services/api/src/adapters/bot_llm.rs
//!
//! Implements the `ChatResponderService` port: the support bot that answers customers
//! until a human agent takes over.

use super::openai_json::complete_json;
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use residency_core::domain::ChatMessage;
use residency_core::ports::{BotReply, ChatResponderService, PortResult};

const SYSTEM_PROMPT: &str = "Eres un asistente especializado en trámites de residencia en Paraguay.";

#[derive(Clone)]
pub struct OpenAiBotAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBotAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn prompt(history: &[ChatMessage]) -> String {
    let transcript = history
        .iter()
        .map(|m| format!("{}: {}", m.sender_type, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Eres un asistente experto en trámites de residencia en Paraguay. \
         Responde de manera concisa y profesional.\n\n\
         Historial de la conversación:\n{}\n\n\
         Instrucciones:\n\
         - Responde en español\n\
         - Sé conciso y directo\n\
         - Si no estás seguro, deriva al agente humano\n\
         - No inventes información sobre trámites\n\n\
         Responde únicamente con un objeto JSON con este formato:\n\
         {{\"content\": \"tu respuesta\", \"confidence\": número entre 0 y 1}}",
        transcript
    )
}

#[async_trait]
impl ChatResponderService for OpenAiBotAdapter {
    async fn reply(&self, history: &[ChatMessage]) -> PortResult<BotReply> {
        complete_json(&self.client, &self.model, SYSTEM_PROMPT, prompt(history), 0.7).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use residency_core::domain::SenderType;
    use uuid::Uuid;

    fn message(sender_type: SenderType, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            seq: 0,
            conversation_id: Uuid::nil(),
            sender_id: None,
            sender_type,
            content: content.to_string(),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[test]
    fn transcript_lines_are_tagged_by_sender() {
        let p = prompt(&[
            message(SenderType::User, "¿Cuánto tarda?"),
            message(SenderType::Bot, "Entre 3 y 4 meses."),
        ]);
        assert!(p.contains("user: ¿Cuánto tarda?\nbot: Entre 3 y 4 meses."));
    }
}
