//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a chat WebSocket connection.
//! The session subscribes to the change feed before loading history and merges both
//! through its message log, so every message is forwarded to the browser exactly once.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, SessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use chrono::Utc;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use residency_core::domain::{ChatMessage, SenderType, User};
use residency_core::message_log::MessageLog;
use residency_core::ports::{PortError, PortResult};
use residency_core::{retry_if, MessageEvent, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = SplitSink<WebSocket, Message>;

/// One retry, three seconds after a failed history load.
const HISTORY_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_secs(3),
    max_delay: Duration::from_secs(3),
};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: User) {
    info!(user_id = %user.user_id, "New chat WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let conversation_id = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Init { conversation_id }) => conversation_id,
            _ => {
                error!("First message was not a valid Init message.");
                send_error(&mut sender, "The first message must be init.").await;
                return;
            }
        },
        _ => {
            info!("Client disconnected before sending Init message.");
            return;
        }
    };

    let conversation = match app_state.chat.conversation_for(&user, conversation_id).await {
        Ok(conversation) => conversation,
        Err(e) => {
            warn!(%conversation_id, "Refused chat session: {:?}", e);
            send_error(&mut sender, "Conversation not available.").await;
            return;
        }
    };
    let mut session = SessionState::new(user, conversation);

    let mut events = app_state.chat.feed().subscribe(conversation_id);

    let history = match load_history(&app_state, conversation_id).await {
        Ok(history) => history,
        Err(e) => {
            error!(%conversation_id, "Failed to load chat history: {:?}", e);
            send_error(&mut sender, "Failed to load conversation.").await;
            return;
        }
    };
    let messages = session.log.extend(history);
    let init = ServerMessage::SessionInitialized {
        conversation_id,
        messages,
    };
    if !send_frame(&mut sender, &init).await {
        return;
    }
    if session.is_agency() {
        mark_read(&app_state, conversation_id, None).await;
    }

    // --- 2. Main Message Loop ---
    loop {
        tokio::select! {
            _ = app_state.shutdown.cancelled() => {
                info!("Server shutting down, closing chat session.");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !handle_text_message(text.as_str(), &app_state, &mut session, &mut sender).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client disconnected.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {:?}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if !forward_event(&app_state, &mut session, &mut sender, event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Chat session fell behind the feed, reloading history.");
                    if !resync(&app_state, &mut session, &mut sender).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    // --- 3. Cleanup ---
    // Dropping `events` unsubscribes from the feed.
    info!(%conversation_id, "Chat WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
/// Returns `false` once the socket can no longer be written to.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session: &mut SessionState,
    sender: &mut WsSender,
) -> bool {
    let conversation_id = session.conversation.id;
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Send { client_id, content }) => {
            session
                .log
                .push_optimistic(client_id, optimistic_message(&session.user, conversation_id, &content));

            match app_state.chat.send(&session.user, conversation_id, &content).await {
                Ok(message) => {
                    session.log.confirm(client_id, message.clone());
                    app_state.responder.spawn(message.clone());
                    send_frame(sender, &ServerMessage::MessageAccepted { client_id, message }).await
                }
                Err(e) => {
                    session.log.retract(client_id);
                    let reason = rejection_reason(e);
                    send_frame(sender, &ServerMessage::MessageRejected { client_id, reason }).await
                }
            }
        }
        Ok(ClientMessage::MarkRead) => {
            if session.is_agency() {
                mark_read(app_state, conversation_id, None).await;
            }
            true
        }
        Ok(ClientMessage::Init { .. }) => {
            warn!("Received a second Init message.");
            send_error(sender, "Session already initialized.").await
        }
        Err(e) => {
            warn!("Failed to parse client message: {:?}", e);
            send_error(sender, "Unrecognized message.").await
        }
    }
}

/// Forwards a feed event the log has not seen. Agency sessions mark inbound messages read.
async fn forward_event(
    app_state: &Arc<AppState>,
    session: &mut SessionState,
    sender: &mut WsSender,
    event: MessageEvent,
) -> bool {
    let inbound = match &event {
        MessageEvent::Inserted(m) if m.sender_type != SenderType::Agency => Some(m.id),
        _ => None,
    };
    let Some(frame) = event_frame(&mut session.log, event) else {
        return true;
    };
    if !send_frame(sender, &frame).await {
        return false;
    }
    if let (true, Some(message_id)) = (session.is_agency(), inbound) {
        mark_read(app_state, session.conversation.id, Some(message_id)).await;
    }
    true
}

/// The frame to send for `event`, or `None` when the log already reflected it.
fn event_frame(log: &mut MessageLog, event: MessageEvent) -> Option<ServerMessage> {
    let message_id = event.message().id;
    let inserted = matches!(event, MessageEvent::Inserted(_));
    if !log.apply(event) {
        return None;
    }
    let message = log.messages().find(|m| m.id == message_id)?.clone();
    Some(if inserted {
        ServerMessage::MessageInserted { message }
    } else {
        ServerMessage::MessageUpdated { message }
    })
}

async fn resync(app_state: &Arc<AppState>, session: &mut SessionState, sender: &mut WsSender) -> bool {
    match load_history(app_state, session.conversation.id).await {
        Ok(history) => {
            for message in session.log.extend(history) {
                if !send_frame(sender, &ServerMessage::MessageInserted { message }).await {
                    return false;
                }
            }
            true
        }
        Err(e) => {
            error!("Failed to reload chat history: {:?}", e);
            send_error(sender, "Failed to load conversation.").await
        }
    }
}

async fn load_history(app_state: &Arc<AppState>, conversation_id: Uuid) -> PortResult<Vec<ChatMessage>> {
    retry_if(
        &HISTORY_RETRY,
        "load_history",
        |_: &PortError| true,
        || app_state.chat.history(conversation_id),
    )
    .await
}

async fn mark_read(app_state: &Arc<AppState>, conversation_id: Uuid, up_to: Option<Uuid>) {
    if let Err(e) = app_state.chat.mark_read(conversation_id, up_to).await {
        error!(%conversation_id, "Failed to mark messages read: {:?}", e);
    }
}

fn optimistic_message(user: &User, conversation_id: Uuid, content: &str) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4(),
        seq: 0,
        conversation_id,
        sender_id: Some(user.user_id),
        sender_type: SenderType::for_role(user.role),
        content: content.to_string(),
        created_at: Utc::now(),
        read_at: None,
    }
}

fn rejection_reason(e: PortError) -> String {
    match e {
        PortError::InvalidInput(reason) => reason,
        PortError::Unauthorized => "Access denied".to_string(),
        other => {
            error!("Failed to send chat message: {:?}", other);
            "Failed to send message".to_string()
        }
    }
}

async fn send_frame(sender: &mut WsSender, frame: &ServerMessage) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return true;
        }
    };
    if sender.send(Message::Text(json.into())).await.is_err() {
        warn!("Failed to write to WebSocket, closing session.");
        return false;
    }
    true
}

async fn send_error(sender: &mut WsSender, message: &str) -> bool {
    send_frame(
        sender,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender_type: SenderType) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            seq: 0,
            conversation_id: Uuid::nil(),
            sender_id: None,
            sender_type,
            content: "Hola".to_string(),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[test]
    fn history_entries_are_not_forwarded_again() {
        let mut log = MessageLog::new();
        let loaded = message(SenderType::User);
        log.extend(vec![loaded.clone()]);

        assert!(event_frame(&mut log, MessageEvent::Inserted(loaded)).is_none());

        let fresh = message(SenderType::Bot);
        let frame = event_frame(&mut log, MessageEvent::Inserted(fresh.clone()));
        assert!(matches!(frame, Some(ServerMessage::MessageInserted { message }) if message.id == fresh.id));
    }

    #[test]
    fn read_updates_are_forwarded_with_the_merged_row() {
        let mut log = MessageLog::new();
        let original = message(SenderType::User);
        log.extend(vec![original.clone()]);

        let mut read = original.clone();
        read.read_at = Some(Utc::now());
        let frame = event_frame(&mut log, MessageEvent::Updated(read.clone()));
        assert!(matches!(
            frame,
            Some(ServerMessage::MessageUpdated { message }) if message.read_at == read.read_at
        ));
    }

    #[test]
    fn own_sends_confirmed_before_the_feed_are_deduplicated() {
        let mut log = MessageLog::new();
        let user = User {
            user_id: Uuid::new_v4(),
            email: "c@example.com".to_string(),
            role: residency_core::domain::Role::Customer,
            created_at: Utc::now(),
        };
        let client_id = Uuid::new_v4();
        log.push_optimistic(client_id, optimistic_message(&user, Uuid::nil(), "Hola"));

        let stored = message(SenderType::User);
        log.confirm(client_id, stored.clone());
        assert!(event_frame(&mut log, MessageEvent::Inserted(stored)).is_none());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn only_input_errors_reach_the_client_verbatim() {
        assert_eq!(
            rejection_reason(PortError::InvalidInput("Message content is empty".into())),
            "Message content is empty"
        );
        assert_eq!(
            rejection_reason(PortError::Unavailable("pool timed out".into())),
            "Failed to send message"
        );
    }
}
