//! crates/residency_core/src/responder.rs
//!
//! The automated responder. Answers customer messages while the conversation's
//! bot flag is on and hands the conversation to a human when it is unsure.

use crate::chat::ChatService;
use crate::domain::{ChatMessage, NewMessage, SenderType};
use crate::ports::{BotReply, ChatResponderService, DatabaseService, PortResult};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Replies below this confidence hand the conversation to a human.
pub const HANDOFF_THRESHOLD: f64 = 0.70;

pub const HANDOFF_SUFFIX: &str =
    "\n\nPermítame conectarlo con un agente humano para mejor asistencia.";

pub const FALLBACK_REPLY: &str =
    "Lo siento, estoy teniendo problemas técnicos. Por favor, espere a que un agente humano lo atienda.";

#[derive(Clone)]
pub struct AutoResponder {
    db: Arc<dyn DatabaseService>,
    chat: ChatService,
    bot: Arc<dyn ChatResponderService>,
}

impl AutoResponder {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        chat: ChatService,
        bot: Arc<dyn ChatResponderService>,
    ) -> Self {
        Self { db, chat, bot }
    }

    /// Runs `respond_to` in the background. Failures are logged only.
    pub fn spawn(&self, trigger: ChatMessage) {
        if trigger.sender_type != SenderType::User {
            return;
        }
        let responder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = responder.respond_to(&trigger).await {
                error!(
                    conversation_id = %trigger.conversation_id,
                    "Automated reply failed: {:?}", e
                );
            }
        });
    }

    /// Answers `trigger` if it came from a customer and the bot is still on.
    /// Returns the inserted bot message, if any.
    pub async fn respond_to(&self, trigger: &ChatMessage) -> PortResult<Option<ChatMessage>> {
        match trigger.sender_type {
            SenderType::User => {}
            SenderType::Agency | SenderType::Bot => return Ok(None),
        }

        let conversation = self.db.get_conversation(trigger.conversation_id).await?;
        if !conversation.is_bot_active {
            return Ok(None);
        }

        let history = self.chat.history(conversation.id).await?;
        let reply = match self.bot.reply(&history).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conversation_id = %conversation.id, "Bot call failed, sending fallback: {:?}", e);
                BotReply {
                    content: FALLBACK_REPLY.to_string(),
                    confidence: 0.0,
                }
            }
        };

        let mut content = reply.content;
        if reply.confidence < HANDOFF_THRESHOLD {
            content.push_str(HANDOFF_SUFFIX);
            self.chat.hand_off(conversation.id).await?;
            info!(
                conversation_id = %conversation.id,
                confidence = reply.confidence,
                "Bot handed conversation to a human"
            );
        }

        let message = self
            .chat
            .append(NewMessage {
                id: Uuid::new_v4(),
                conversation_id: conversation.id,
                sender_id: None,
                sender_type: SenderType::Bot,
                content,
            })
            .await?;
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, User};
    use crate::feed::ChangeFeed;
    use crate::memory::InMemoryDatabase;
    use crate::ports::PortError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBot {
        confidence: Option<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatResponderService for FixedBot {
        async fn reply(&self, history: &[ChatMessage]) -> PortResult<BotReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.confidence {
                Some(confidence) => Ok(BotReply {
                    content: format!("Respuesta a {} mensajes", history.len()),
                    confidence,
                }),
                None => Err(PortError::Unexpected("status 500".to_string())),
            }
        }
    }

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        chat: ChatService,
        bot: Arc<FixedBot>,
        responder: AutoResponder,
        customer: User,
    }

    fn fixture(confidence: Option<f64>) -> Fixture {
        let db = Arc::new(InMemoryDatabase::new());
        let chat = ChatService::new(db.clone(), Arc::new(ChangeFeed::default()));
        let bot = Arc::new(FixedBot {
            confidence,
            calls: AtomicUsize::new(0),
        });
        let responder = AutoResponder::new(db.clone(), chat.clone(), bot.clone());
        let customer = db.add_user("c@example.com", Role::Customer);
        Fixture {
            db,
            chat,
            bot,
            responder,
            customer,
        }
    }

    #[tokio::test]
    async fn low_confidence_hands_off_and_appends_the_suffix() {
        let f = fixture(Some(0.69));
        let conversation = f.chat.open_conversation(f.customer.user_id).await.unwrap();
        let trigger = f.chat.send(&f.customer, conversation.id, "¿Cuánto tarda?").await.unwrap();

        let reply = f.responder.respond_to(&trigger).await.unwrap().unwrap();
        assert!(reply.content.ends_with(HANDOFF_SUFFIX));
        assert_eq!(reply.sender_type, SenderType::Bot);
        assert_eq!(reply.sender_id, None);

        let after = f.db.get_conversation(conversation.id).await.unwrap();
        assert!(!after.is_bot_active);
        assert_eq!(after.agency_id, None);
    }

    #[tokio::test]
    async fn threshold_confidence_keeps_the_bot_on() {
        let f = fixture(Some(0.70));
        let conversation = f.chat.open_conversation(f.customer.user_id).await.unwrap();
        let trigger = f.chat.send(&f.customer, conversation.id, "Hola").await.unwrap();

        let reply = f.responder.respond_to(&trigger).await.unwrap().unwrap();
        assert!(!reply.content.contains(HANDOFF_SUFFIX.trim()));
        assert_eq!(reply.content, "Respuesta a 1 mensajes");
        assert!(f.db.get_conversation(conversation.id).await.unwrap().is_bot_active);
    }

    #[tokio::test]
    async fn failed_call_sends_fallback_and_hands_off() {
        let f = fixture(None);
        let conversation = f.chat.open_conversation(f.customer.user_id).await.unwrap();
        let trigger = f.chat.send(&f.customer, conversation.id, "Hola").await.unwrap();

        let reply = f.responder.respond_to(&trigger).await.unwrap().unwrap();
        assert!(reply.content.starts_with(FALLBACK_REPLY));
        assert!(!f.db.get_conversation(conversation.id).await.unwrap().is_bot_active);
    }

    #[tokio::test]
    async fn bot_stays_silent_once_handed_off() {
        let f = fixture(Some(0.2));
        let conversation = f.chat.open_conversation(f.customer.user_id).await.unwrap();

        let first = f.chat.send(&f.customer, conversation.id, "uno").await.unwrap();
        f.responder.respond_to(&first).await.unwrap();
        let second = f.chat.send(&f.customer, conversation.id, "dos").await.unwrap();
        assert!(f.responder.respond_to(&second).await.unwrap().is_none());
        assert_eq!(f.bot.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn agency_and_bot_messages_never_trigger_a_reply() {
        let f = fixture(Some(0.9));
        let agent = f.db.add_user("a@example.com", Role::Agency);
        let conversation = f.chat.open_conversation(f.customer.user_id).await.unwrap();
        let from_agent = f.chat.send(&agent, conversation.id, "Hola").await.unwrap();

        assert!(f.responder.respond_to(&from_agent).await.unwrap().is_none());
        assert_eq!(f.bot.calls.load(Ordering::SeqCst), 0);
    }
}
