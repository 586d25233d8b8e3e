//! crates/residency_core/src/feed.rs
//!
//! In-process change feed for chat messages. Subscriptions are scoped either to
//! one conversation or to the whole message table.

use crate::domain::ChatMessage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

/// A committed change to the messages table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum MessageEvent {
    Inserted(ChatMessage),
    Updated(ChatMessage),
}

impl MessageEvent {
    pub fn message(&self) -> &ChatMessage {
        match self {
            MessageEvent::Inserted(m) | MessageEvent::Updated(m) => m,
        }
    }
}

pub type Subscription = broadcast::Receiver<MessageEvent>;

pub struct ChangeFeed {
    capacity: usize,
    conversations: Mutex<HashMap<Uuid, broadcast::Sender<MessageEvent>>>,
    all: broadcast::Sender<MessageEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            capacity,
            conversations: Mutex::new(HashMap::new()),
            all,
        }
    }

    /// Events for a single conversation, in commit order. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        let mut channels = self
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Events for every conversation.
    pub fn subscribe_all(&self) -> Subscription {
        self.all.subscribe()
    }

    /// Fans an event out to its conversation's subscribers and the table-wide ones.
    pub fn publish(&self, event: MessageEvent) {
        let conversation_id = event.message().conversation_id;
        {
            let mut channels = self
                .conversations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels.retain(|_, sender| sender.receiver_count() > 0);
            if let Some(sender) = channels.get(&conversation_id) {
                // An error only means every receiver went away since the prune above.
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.all.send(event);
        debug!(%conversation_id, "Published message event");
    }

    pub fn active_conversations(&self) -> usize {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|s| s.receiver_count() > 0)
            .count()
    }
}
