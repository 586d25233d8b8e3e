//! crates/residency_core/src/message_log.rs
//!
//! The ordered view of one conversation. Server messages (loaded or pushed)
//! and optimistic local sends are merged into a single list keyed by message id.
//! Stored messages are kept in commit (`seq`) order whatever order they arrive in;
//! pending sends stay where they were shown until the server answers.

use crate::domain::ChatMessage;
use crate::feed::MessageEvent;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A send the server has not confirmed yet, keyed by the client-chosen id.
    Pending { local_id: Uuid, message: ChatMessage },
    Confirmed(ChatMessage),
}

impl LogEntry {
    pub fn message(&self) -> &ChatMessage {
        match self {
            LogEntry::Pending { message, .. } | LogEntry::Confirmed(message) => message,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LogEntry::Pending { .. })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    known: HashSet<Uuid>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(LogEntry::message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.known.contains(&message_id)
    }

    /// Adds a server message at its commit position unless it is already present.
    /// Returns whether it was new.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.known.insert(message.id) {
            return false;
        }
        self.insert_ordered(message);
        true
    }

    /// Appends a batch of server messages, returning the ones that were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Vec<ChatMessage> {
        messages
            .into_iter()
            .filter(|m| self.append(m.clone()))
            .collect()
    }

    /// Shows a local send before the server confirms it.
    pub fn push_optimistic(&mut self, local_id: Uuid, message: ChatMessage) {
        self.entries.push(LogEntry::Pending { local_id, message });
    }

    /// Hands a pending entry over to the id the server assigned. When the feed
    /// already delivered that message, the pending entry is dropped instead.
    pub fn confirm(&mut self, local_id: Uuid, message: ChatMessage) {
        let position = self.pending_position(local_id);
        if self.known.contains(&message.id) {
            if let Some(index) = position {
                self.entries.remove(index);
            }
            return;
        }
        self.known.insert(message.id);
        if let Some(index) = position {
            self.entries.remove(index);
        }
        self.insert_ordered(message);
    }

    /// Removes a send that failed. Returns whether an entry was removed.
    pub fn retract(&mut self, local_id: Uuid) -> bool {
        match self.pending_position(local_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Applies a change-feed event. Returns whether the log changed.
    pub fn apply(&mut self, event: MessageEvent) -> bool {
        match event {
            MessageEvent::Inserted(message) => self.append(message),
            MessageEvent::Updated(update) => self.patch(update),
        }
    }

    fn patch(&mut self, update: ChatMessage) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| match e {
            LogEntry::Confirmed(m) => m.id == update.id,
            LogEntry::Pending { .. } => false,
        }) else {
            return false;
        };
        let LogEntry::Confirmed(current) = entry else {
            return false;
        };
        let read_at = current.read_at.or(update.read_at);
        *current = ChatMessage { read_at, ..update };
        true
    }

    /// Places `message` before the first stored message committed after it.
    fn insert_ordered(&mut self, message: ChatMessage) {
        let index = self
            .entries
            .iter()
            .position(|e| matches!(e, LogEntry::Confirmed(m) if m.seq > message.seq))
            .unwrap_or(self.entries.len());
        self.entries.insert(index, LogEntry::Confirmed(message));
    }

    fn pending_position(&self, local_id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| match e {
            LogEntry::Pending { local_id: id, .. } => *id == local_id,
            LogEntry::Confirmed(_) => false,
        })
    }
}
