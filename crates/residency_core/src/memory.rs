//! crates/residency_core/src/memory.rs
//!
//! An in-memory `DatabaseService` with the same observable behavior as the
//! Postgres adapter. Used by the unit tests of this crate and, through the
//! `memory` feature, by the service's integration tests.

use crate::domain::{
    ChatMessage, Conversation, ConversationOverview, ConversationStatus, CustomerOverview,
    Document, NewMessage, OverallStatus, ParticipantRole, ProfileFields, ResidencyProgress,
    ResidencyStep, Role, SenderType, StepStatus, StepUpdate, User, UserCredentials, UserProfile,
};
use crate::ports::{DatabaseService, NewDocument, PortError, PortResult};
use crate::progress::STEP_CATALOG;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredProgress {
    id: Uuid,
    user_id: Uuid,
    cached_status: OverallStatus,
    steps: Vec<ResidencyStep>,
}

#[derive(Default)]
struct State {
    users: Vec<UserCredentials>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    documents: Vec<Document>,
    progress: Vec<StoredProgress>,
    conversations: Vec<Conversation>,
    participants: Vec<(Uuid, Uuid, ParticipantRole)>,
    messages: Vec<ChatMessage>,
    profiles: Vec<UserProfile>,
    last_seq: i64,
    fail_participant_inserts: bool,
    /// Held back after the next message insert commits, before it is acknowledged.
    slow_insert_ack: Option<Duration>,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    state: Mutex<State>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts an account directly, bypassing password hashing.
    pub fn add_user(&self, email: &str, role: Role) -> User {
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            created_at: Utc::now(),
        };
        self.lock().users.push(UserCredentials {
            user: user.clone(),
            hashed_password: String::new(),
        });
        user
    }

    /// Stands in for the external provisioning process: one pending step per catalog entry.
    pub fn provision_progress(&self, user_id: Uuid) -> Uuid {
        let steps = STEP_CATALOG
            .iter()
            .rev()
            .map(|c| ResidencyStep {
                id: Uuid::new_v4(),
                order: c.order,
                title: c.title.to_string(),
                description: c.description.to_string(),
                estimated_time: c.estimated_time.to_string(),
                requirements: c.requirements.to_string(),
                status: StepStatus::Pending,
                notes: None,
                completed_at: None,
            })
            .collect();
        let id = Uuid::new_v4();
        self.lock().progress.push(StoredProgress {
            id,
            user_id,
            cached_status: OverallStatus::InProgress,
            steps,
        });
        id
    }

    pub fn cached_progress_status(&self, progress_id: Uuid) -> Option<OverallStatus> {
        self.lock()
            .progress
            .iter()
            .find(|p| p.id == progress_id)
            .map(|p| p.cached_status)
    }

    /// Makes every following participant insert fail.
    pub fn fail_participant_inserts(&self) {
        self.lock().fail_participant_inserts = true;
    }

    /// The next message insert commits at once but returns only after `delay`.
    pub fn slow_next_insert_ack(&self, delay: Duration) {
        self.lock().slow_insert_ack = Some(delay);
    }

    pub fn conversation_count(&self, user_id: Uuid) -> usize {
        self.lock()
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    pub fn participants(&self, conversation_id: Uuid) -> Vec<(Uuid, ParticipantRole)> {
        self.lock()
            .participants
            .iter()
            .filter(|(c, _, _)| *c == conversation_id)
            .map(|(_, u, r)| (*u, *r))
            .collect()
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> PortError {
    PortError::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let mut state = self.lock();
        if state.users.iter().any(|u| u.user.email == email) {
            return Err(PortError::InvalidInput(format!("Email {} is already registered", email)));
        }
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            role: Role::Customer,
            created_at: Utc::now(),
        };
        state.users.push(UserCredentials {
            user: user.clone(),
            hashed_password: hashed_password.to_string(),
        });
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.lock()
            .users
            .iter()
            .find(|u| u.user.email == email)
            .cloned()
            .ok_or_else(|| not_found("User", email))
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.user.user_id == user_id)
            .map(|u| u.user.clone())
            .ok_or_else(|| not_found("User", user_id))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.lock()
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<User> {
        let state = self.lock();
        let (user_id, expires_at) = state
            .sessions
            .get(session_id)
            .copied()
            .ok_or(PortError::Unauthorized)?;
        if expires_at <= Utc::now() {
            return Err(PortError::Unauthorized);
        }
        state
            .users
            .iter()
            .find(|u| u.user.user_id == user_id)
            .map(|u| u.user.clone())
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.lock().sessions.remove(session_id);
        Ok(())
    }

    async fn list_customers(&self) -> PortResult<Vec<CustomerOverview>> {
        let state = self.lock();
        Ok(state
            .users
            .iter()
            .filter(|u| u.user.role != Role::Agency)
            .map(|u| {
                let profile = state.profiles.iter().find(|p| p.user_id == u.user.user_id);
                CustomerOverview {
                    user: u.user.clone(),
                    first_name: profile.and_then(|p| p.fields.first_name.clone()),
                    last_name: profile.and_then(|p| p.fields.last_name.clone()),
                    step_statuses: state
                        .progress
                        .iter()
                        .find(|p| p.user_id == u.user.user_id)
                        .map(|p| p.steps.iter().map(|s| s.status).collect()),
                }
            })
            .collect())
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let mut state = self.lock();
        let before = state.users.len();
        state.users.retain(|u| u.user.user_id != user_id);
        if state.users.len() == before {
            return Err(not_found("User", user_id));
        }
        state.sessions.retain(|_, (owner, _)| *owner != user_id);
        state.documents.retain(|d| d.user_id != user_id);
        state.progress.retain(|p| p.user_id != user_id);
        state.profiles.retain(|p| p.user_id != user_id);
        let owned: Vec<Uuid> = state
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();
        state.conversations.retain(|c| c.user_id != user_id);
        state.participants.retain(|(c, u, _)| !owned.contains(c) && *u != user_id);
        state.messages.retain(|m| !owned.contains(&m.conversation_id));
        Ok(())
    }

    async fn create_document(&self, document: NewDocument) -> PortResult<Document> {
        let stored = Document {
            id: Uuid::new_v4(),
            user_id: document.user_id,
            document_type: document.document_type(),
            analysis_result: document.analysis_result,
            file_path: document.file_path,
            agency_notes: None,
            created_at: Utc::now(),
        };
        self.lock().documents.push(stored.clone());
        Ok(stored)
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        Ok(self
            .lock()
            .documents
            .iter()
            .rev()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.lock()
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| not_found("Document", document_id))
    }

    async fn set_document_notes(&self, document_id: Uuid, notes: &str) -> PortResult<()> {
        let mut state = self.lock();
        let document = state
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| not_found("Document", document_id))?;
        document.agency_notes = Some(notes.to_string());
        Ok(())
    }

    async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<ResidencyProgress>> {
        Ok(self
            .lock()
            .progress
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| {
                let mut steps = p.steps.clone();
                steps.sort_by_key(|s| s.order);
                ResidencyProgress {
                    id: p.id,
                    user_id: p.user_id,
                    steps,
                }
            }))
    }

    async fn update_step(
        &self,
        progress_id: Uuid,
        step_id: Uuid,
        update: &StepUpdate,
    ) -> PortResult<()> {
        let mut state = self.lock();
        let step = state
            .progress
            .iter_mut()
            .find(|p| p.id == progress_id)
            .and_then(|p| p.steps.iter_mut().find(|s| s.id == step_id))
            .ok_or_else(|| not_found("Step", step_id))?;
        step.status = update.status;
        step.notes = update.notes.clone();
        step.completed_at = update.completed_at;
        Ok(())
    }

    async fn cache_progress_status(
        &self,
        progress_id: Uuid,
        status: OverallStatus,
    ) -> PortResult<()> {
        let mut state = self.lock();
        let progress = state
            .progress
            .iter_mut()
            .find(|p| p.id == progress_id)
            .ok_or_else(|| not_found("Progress", progress_id))?;
        progress.cached_status = status;
        Ok(())
    }

    async fn find_active_conversation(&self, user_id: Uuid) -> PortResult<Option<Conversation>> {
        Ok(self
            .lock()
            .conversations
            .iter()
            .rev()
            .find(|c| c.user_id == user_id && c.status == ConversationStatus::Active)
            .cloned())
    }

    async fn create_conversation(&self, user_id: Uuid) -> PortResult<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id,
            status: ConversationStatus::Active,
            is_bot_active: true,
            agency_id: None,
            created_at: Utc::now(),
        };
        self.lock().conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> PortResult<()> {
        let mut state = self.lock();
        if state.fail_participant_inserts {
            return Err(PortError::Unexpected("participant insert rejected".to_string()));
        }
        state.participants.push((conversation_id, user_id, role));
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        self.lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| not_found("Conversation", conversation_id))
    }

    async fn set_bot_state(
        &self,
        conversation_id: Uuid,
        is_bot_active: bool,
        agency_id: Option<Uuid>,
    ) -> PortResult<Conversation> {
        let mut state = self.lock();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| not_found("Conversation", conversation_id))?;
        conversation.is_bot_active = is_bot_active;
        conversation.agency_id = agency_id;
        Ok(conversation.clone())
    }

    async fn insert_message(&self, message: NewMessage) -> PortResult<ChatMessage> {
        let (stored, delay) = {
            let mut state = self.lock();
            if !state.conversations.iter().any(|c| c.id == message.conversation_id) {
                return Err(not_found("Conversation", message.conversation_id));
            }
            if let Some(existing) = state.messages.iter().find(|m| m.id == message.id) {
                return Ok(existing.clone());
            }
            state.last_seq += 1;
            let stored = ChatMessage {
                id: message.id,
                seq: state.last_seq,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                sender_type: message.sender_type,
                content: message.content,
                created_at: Utc::now(),
                read_at: None,
            };
            state.messages.push(stored.clone());
            (stored, state.slow_insert_ack.take())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        up_to: Option<Uuid>,
    ) -> PortResult<Vec<ChatMessage>> {
        let now = Utc::now();
        let mut state = self.lock();
        let mut changed = Vec::new();
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id)
        {
            if message.read_at.is_none() && message.sender_type != SenderType::Agency {
                message.read_at = Some(now);
                changed.push(message.clone());
            }
            if Some(message.id) == up_to {
                break;
            }
        }
        Ok(changed)
    }

    async fn list_conversation_overviews(&self) -> PortResult<Vec<ConversationOverview>> {
        let state = self.lock();
        let mut rows = Vec::new();
        for conversation in &state.conversations {
            let Some(owner) = state
                .users
                .iter()
                .find(|u| u.user.user_id == conversation.user_id)
            else {
                continue;
            };
            let profile = state.profiles.iter().find(|p| p.user_id == conversation.user_id);
            let messages: Vec<&ChatMessage> = state
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation.id)
                .collect();
            rows.push(ConversationOverview {
                conversation: conversation.clone(),
                user_email: owner.user.email.clone(),
                user_first_name: profile.and_then(|p| p.fields.first_name.clone()),
                user_last_name: profile.and_then(|p| p.fields.last_name.clone()),
                unread_count: messages
                    .iter()
                    .filter(|m| m.read_at.is_none() && m.sender_type != SenderType::Agency)
                    .count() as i64,
                last_message_at: messages.last().map(|m| m.created_at),
            });
        }
        Ok(rows)
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        Ok(self
            .lock()
            .profiles
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn upsert_profile(&self, user_id: Uuid, fields: &ProfileFields) -> PortResult<UserProfile> {
        let mut state = self.lock();
        let email = state
            .users
            .iter()
            .find(|u| u.user.user_id == user_id)
            .map(|u| u.user.email.clone())
            .ok_or_else(|| not_found("User", user_id))?;
        let now = Utc::now();
        if let Some(existing) = state.profiles.iter_mut().find(|p| p.user_id == user_id) {
            existing.fields = fields.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let profile = UserProfile {
            id: Uuid::new_v4(),
            user_id,
            email,
            fields: fields.clone(),
            created_at: now,
            updated_at: now,
        };
        state.profiles.push(profile.clone());
        Ok(profile)
    }
}
