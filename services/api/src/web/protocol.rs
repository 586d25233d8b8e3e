//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the live support chat.

use residency_core::domain::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the session on one conversation. This must be the first message sent.
    Init { conversation_id: Uuid },

    /// Sends a message. `client_id` lets the browser match the answer to its optimistic entry.
    Send { client_id: Uuid, content: String },

    /// The window regained focus. Agency sessions mark the conversation read.
    MarkRead,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms initialization and carries the history loaded so far.
    SessionInitialized {
        conversation_id: Uuid,
        messages: Vec<ChatMessage>,
    },

    /// A message this connection has not seen yet.
    MessageInserted { message: ChatMessage },

    /// A message this connection already has changed, e.g. it was read.
    MessageUpdated { message: ChatMessage },

    /// The datastore accepted a `Send`.
    MessageAccepted { client_id: Uuid, message: ChatMessage },

    /// A `Send` failed; the client should drop its optimistic entry.
    MessageRejected { client_id: Uuid, reason: String },

    /// Reports an error to the client, which should display it.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_tagged_by_type() {
        let id = Uuid::new_v4();
        let init: ClientMessage =
            serde_json::from_str(&format!(r#"{{"type":"init","conversation_id":"{}"}}"#, id)).unwrap();
        assert!(matches!(init, ClientMessage::Init { conversation_id } if conversation_id == id));

        let mark: ClientMessage = serde_json::from_str(r#"{"type":"mark_read"}"#).unwrap();
        assert!(matches!(mark, ClientMessage::MarkRead));
    }

    #[test]
    fn rejected_sends_carry_the_client_id() {
        let client_id = Uuid::new_v4();
        let json = serde_json::to_value(ServerMessage::MessageRejected {
            client_id,
            reason: "Message content is empty".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "message_rejected");
        assert_eq!(json["client_id"], client_id.to_string());
    }
}
