//! crates/residency_core/src/chat.rs
//!
//! Conversation and messaging use-cases. Every write that reaches the
//! datastore is published on the change feed afterwards.

use crate::domain::{
    ChatMessage, Conversation, ConversationOverview, NewMessage, ParticipantRole, SenderType, User,
};
use crate::feed::{ChangeFeed, MessageEvent};
use crate::ports::{DatabaseService, PortError, PortResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

/// One async lock per conversation. An insert and its publish run under the
/// conversation's lock, so the feed carries messages in commit order.
#[derive(Default)]
struct WriteGates {
    gates: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl WriteGates {
    fn gate(&self, conversation_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Gates nobody else holds are idle.
        gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        gates.entry(conversation_id).or_default().clone()
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<dyn DatabaseService>,
    feed: Arc<ChangeFeed>,
    writes: Arc<WriteGates>,
}

impl ChatService {
    pub fn new(db: Arc<dyn DatabaseService>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            db,
            feed,
            writes: Arc::new(WriteGates::default()),
        }
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Finds the customer's most recent active conversation, creating one on first use.
    ///
    /// Creation is two writes. If registering the participant fails the new
    /// conversation is left in place and the next call finds it.
    pub async fn open_conversation(&self, customer_id: Uuid) -> PortResult<Conversation> {
        if let Some(existing) = self.db.find_active_conversation(customer_id).await? {
            return Ok(existing);
        }

        let conversation = self.db.create_conversation(customer_id).await?;
        info!(conversation_id = %conversation.id, %customer_id, "Created conversation");

        if let Err(e) = self
            .db
            .add_participant(conversation.id, customer_id, ParticipantRole::User)
            .await
        {
            warn!(
                conversation_id = %conversation.id,
                "Conversation created without its participant: {:?}", e
            );
            return Err(e);
        }
        Ok(conversation)
    }

    /// Loads a conversation the caller is allowed to see.
    pub async fn conversation_for(&self, caller: &User, conversation_id: Uuid) -> PortResult<Conversation> {
        let conversation = self.db.get_conversation(conversation_id).await?;
        if !caller.is_agency() && conversation.user_id != caller.user_id {
            return Err(PortError::Unauthorized);
        }
        Ok(conversation)
    }

    pub async fn history(&self, conversation_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        self.db.list_messages(conversation_id).await
    }

    /// Appends a message written by a signed-in account.
    pub async fn send(&self, caller: &User, conversation_id: Uuid, content: &str) -> PortResult<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(PortError::InvalidInput("Message content is empty".to_string()));
        }
        self.conversation_for(caller, conversation_id).await?;
        self.append(NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Some(caller.user_id),
            sender_type: SenderType::for_role(caller.role),
            content: content.to_string(),
        })
        .await
    }

    /// Appends any message and publishes it.
    pub async fn append(&self, message: NewMessage) -> PortResult<ChatMessage> {
        let gate = self.writes.gate(message.conversation_id);
        let _write = gate.lock().await;
        let stored = self.db.insert_message(message).await?;
        self.feed.publish(MessageEvent::Inserted(stored.clone()));
        Ok(stored)
    }

    /// Marks unread customer and bot messages as read, up to `up_to` when given.
    /// `read_at` is only ever set on rows where it is still empty.
    pub async fn mark_read(&self, conversation_id: Uuid, up_to: Option<Uuid>) -> PortResult<usize> {
        let changed = self.db.mark_messages_read(conversation_id, up_to).await?;
        let count = changed.len();
        for message in changed {
            self.feed.publish(MessageEvent::Updated(message));
        }
        Ok(count)
    }

    /// Turns the bot off for a conversation and clears any agency assignment.
    pub async fn hand_off(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        self.db.set_bot_state(conversation_id, false, None).await
    }

    /// The agency dashboard: one row per customer email, unread first, then most recent.
    pub async fn dashboard(&self, search: Option<&str>) -> PortResult<Vec<ConversationOverview>> {
        let rows = self.db.list_conversation_overviews().await?;
        Ok(summarize_conversations(rows, search))
    }
}

/// Keeps the most recently active conversation per email and orders them for the dashboard.
pub fn summarize_conversations(
    rows: Vec<ConversationOverview>,
    search: Option<&str>,
) -> Vec<ConversationOverview> {
    let mut by_email: HashMap<String, ConversationOverview> = HashMap::new();
    for row in rows {
        match by_email.get(&row.user_email) {
            Some(existing) if existing.last_message_at >= row.last_message_at => {}
            _ => {
                by_email.insert(row.user_email.clone(), row);
            }
        }
    }

    let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    let mut rows: Vec<ConversationOverview> = by_email
        .into_values()
        .filter(|row| match &needle {
            Some(needle) => matches_search(
                needle,
                &row.user_email,
                row.user_first_name.as_deref(),
                row.user_last_name.as_deref(),
            ),
            None => true,
        })
        .collect();

    rows.sort_by(|a, b| {
        let a_unread = a.unread_count > 0;
        let b_unread = b.unread_count > 0;
        b_unread
            .cmp(&a_unread)
            .then_with(|| b.last_message_at.cmp(&a.last_message_at))
    });
    rows
}

/// Case-insensitive match against an email or "first last".
pub fn matches_search(needle: &str, email: &str, first: Option<&str>, last: Option<&str>) -> bool {
    let full_name = format!("{} {}", first.unwrap_or_default(), last.unwrap_or_default());
    email.to_lowercase().contains(needle) || full_name.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::memory::InMemoryDatabase;
    use chrono::{Duration, Utc};

    fn service() -> (Arc<InMemoryDatabase>, ChatService) {
        let db = Arc::new(InMemoryDatabase::new());
        let chat = ChatService::new(db.clone(), Arc::new(ChangeFeed::default()));
        (db, chat)
    }

    #[tokio::test]
    async fn first_open_creates_conversation_and_participant() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);

        let first = chat.open_conversation(customer.user_id).await.unwrap();
        assert!(first.is_bot_active);
        assert_eq!(db.participants(first.id), vec![(customer.user_id, ParticipantRole::User)]);

        let second = chat.open_conversation(customer.user_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.conversation_count(customer.user_id), 1);
    }

    #[tokio::test]
    async fn failed_participant_insert_leaves_the_conversation_behind() {
        let (db, chat) = service();
        let customer = db.add_user("orphan@example.com", Role::Customer);
        db.fail_participant_inserts();

        assert!(chat.open_conversation(customer.user_id).await.is_err());
        assert_eq!(db.conversation_count(customer.user_id), 1);

        let reopened = chat.open_conversation(customer.user_id).await.unwrap();
        assert_eq!(db.conversation_count(customer.user_id), 1);
        assert!(db.participants(reopened.id).is_empty());
    }

    #[tokio::test]
    async fn sender_type_comes_from_the_callers_role() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);
        let agent = db.add_user("a@example.com", Role::Agency);
        let conversation = chat.open_conversation(customer.user_id).await.unwrap();

        let from_customer = chat.send(&customer, conversation.id, "Hola").await.unwrap();
        let from_agent = chat.send(&agent, conversation.id, "Buenos días").await.unwrap();
        assert_eq!(from_customer.sender_type, SenderType::User);
        assert_eq!(from_agent.sender_type, SenderType::Agency);
    }

    #[tokio::test]
    async fn customers_cannot_write_to_other_conversations() {
        let (db, chat) = service();
        let owner = db.add_user("owner@example.com", Role::Customer);
        let stranger = db.add_user("stranger@example.com", Role::Customer);
        let conversation = chat.open_conversation(owner.user_id).await.unwrap();

        let err = chat.send(&stranger, conversation.id, "hi").await.unwrap_err();
        assert!(matches!(err, PortError::Unauthorized));
    }

    #[tokio::test]
    async fn inserts_from_two_senders_are_all_delivered_once_in_commit_order() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);
        let agent = db.add_user("a@example.com", Role::Agency);
        let conversation = chat.open_conversation(customer.user_id).await.unwrap();
        let mut sub = chat.feed().subscribe(conversation.id);

        let (a, b) = tokio::join!(
            chat.send(&customer, conversation.id, "from customer"),
            chat.send(&agent, conversation.id, "from agency"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let history = chat.history(conversation.id).await.unwrap();
        assert_eq!(history.len(), 2);
        let ids: Vec<Uuid> = history.iter().map(|m| m.id).collect();
        assert!(ids.contains(&a.id) && ids.contains(&b.id));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.message().id, ids[0]);
        assert_eq!(second.message().id, ids[1]);
    }

    #[tokio::test]
    async fn slow_acknowledgements_do_not_reorder_the_feed() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);
        let agent = db.add_user("a@example.com", Role::Agency);
        let conversation = chat.open_conversation(customer.user_id).await.unwrap();
        let mut sub = chat.feed().subscribe(conversation.id);

        db.slow_next_insert_ack(std::time::Duration::from_millis(50));
        let (first, second) = tokio::join!(
            chat.send(&customer, conversation.id, "first"),
            chat.send(&agent, conversation.id, "second"),
        );
        assert!(first.unwrap().seq < second.unwrap().seq);

        let committed: Vec<String> = chat
            .history(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let mut delivered = Vec::new();
        for _ in 0..2 {
            delivered.push(sub.recv().await.unwrap().message().content.clone());
        }
        assert_eq!(committed, ["first", "second"]);
        assert_eq!(delivered, committed);
    }

    #[tokio::test]
    async fn retried_inserts_store_the_message_once() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);
        let conversation = chat.open_conversation(customer.user_id).await.unwrap();

        let message = NewMessage {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            sender_id: Some(customer.user_id),
            sender_type: SenderType::User,
            content: "Hola".to_string(),
        };
        let stored = db.insert_message(message.clone()).await.unwrap();
        let again = db.insert_message(message).await.unwrap();
        assert_eq!(stored, again);
        assert_eq!(chat.history(conversation.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_at_is_set_once_and_never_cleared() {
        let (db, chat) = service();
        let customer = db.add_user("c@example.com", Role::Customer);
        let agent = db.add_user("a@example.com", Role::Agency);
        let conversation = chat.open_conversation(customer.user_id).await.unwrap();

        let first = chat.send(&customer, conversation.id, "one").await.unwrap();
        chat.send(&agent, conversation.id, "reply").await.unwrap();
        assert_eq!(chat.mark_read(conversation.id, None).await.unwrap(), 1);

        let stamped = chat.history(conversation.id).await.unwrap()[0].read_at;
        assert!(stamped.is_some());

        chat.send(&customer, conversation.id, "two").await.unwrap();
        assert_eq!(chat.mark_read(conversation.id, Some(first.id)).await.unwrap(), 0);
        assert_eq!(chat.mark_read(conversation.id, None).await.unwrap(), 1);

        let history = chat.history(conversation.id).await.unwrap();
        assert_eq!(history[0].read_at, stamped);
        assert!(history[1].read_at.is_none(), "agency messages are never marked");
        assert!(history[2].read_at.is_some());
    }

    fn overview(email: &str, unread: i64, minutes_ago: i64) -> ConversationOverview {
        ConversationOverview {
            conversation: Conversation {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                status: crate::domain::ConversationStatus::Active,
                is_bot_active: true,
                agency_id: None,
                created_at: Utc::now(),
            },
            user_email: email.to_string(),
            user_first_name: Some("Ana".to_string()),
            user_last_name: Some(email.split('@').next().unwrap_or_default().to_string()),
            unread_count: unread,
            last_message_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
        }
    }

    #[test]
    fn dashboard_keeps_latest_per_email_and_puts_unread_first() {
        let old = overview("dup@example.com", 3, 60);
        let recent = overview("dup@example.com", 0, 1);
        let unread = overview("unread@example.com", 2, 30);
        let quiet = overview("quiet@example.com", 0, 5);

        let rows = summarize_conversations(vec![old, recent.clone(), unread.clone(), quiet], None);
        let emails: Vec<&str> = rows.iter().map(|r| r.user_email.as_str()).collect();
        assert_eq!(emails, ["unread@example.com", "dup@example.com", "quiet@example.com"]);
        assert_eq!(rows[1].conversation.id, recent.conversation.id);
    }

    #[test]
    fn dashboard_search_matches_email_or_name() {
        let rows = vec![overview("maria@example.com", 0, 1), overview("li@example.com", 0, 2)];
        let found = summarize_conversations(rows.clone(), Some("ANA MAR"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_email, "maria@example.com");
        assert_eq!(summarize_conversations(rows, Some("  ")).len(), 2);
    }
}
