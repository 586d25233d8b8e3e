//! crates/residency_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the datastore, the blob store, and the remote vision and
//! text-generation services.

use crate::domain::{
    AnalysisResult, ChatMessage, Conversation, ConversationOverview, CustomerOverview, Document,
    DocumentType, NewMessage, OverallStatus, ParticipantRole, ProfileFields, ResidencyProgress,
    StepUpdate, User, UserCredentials, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A transport-level failure that may succeed if attempted again.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Datastore Port
//=========================================================================================

/// Fields of a document row; `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: Uuid,
    pub analysis_result: AnalysisResult,
    pub file_path: String,
}

impl NewDocument {
    pub fn document_type(&self) -> DocumentType {
        self.analysis_result.document_type
    }
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users and Auth Sessions ---
    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves an unexpired session token to its account.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<User>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    /// Every non-agency account with its profile names and step statuses.
    async fn list_customers(&self) -> PortResult<Vec<CustomerOverview>>;

    /// Removes an account and everything it owns.
    async fn delete_user(&self, user_id: Uuid) -> PortResult<()>;

    // --- Documents ---
    async fn create_document(&self, document: NewDocument) -> PortResult<Document>;

    /// A user's documents, newest first.
    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>>;

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document>;

    async fn set_document_notes(&self, document_id: Uuid, notes: &str) -> PortResult<()>;

    // --- Residency Progress ---
    /// Zero or one progress record, steps ordered by their catalog order.
    async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<ResidencyProgress>>;

    async fn update_step(
        &self,
        progress_id: Uuid,
        step_id: Uuid,
        update: &StepUpdate,
    ) -> PortResult<()>;

    /// Writes the cached overall status column.
    async fn cache_progress_status(
        &self,
        progress_id: Uuid,
        status: OverallStatus,
    ) -> PortResult<()>;

    // --- Conversations and Messages ---
    /// The most recently created active conversation of a customer.
    async fn find_active_conversation(&self, user_id: Uuid) -> PortResult<Option<Conversation>>;

    async fn create_conversation(&self, user_id: Uuid) -> PortResult<Conversation>;

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> PortResult<()>;

    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation>;

    async fn set_bot_state(
        &self,
        conversation_id: Uuid,
        is_bot_active: bool,
        agency_id: Option<Uuid>,
    ) -> PortResult<Conversation>;

    async fn insert_message(&self, message: NewMessage) -> PortResult<ChatMessage>;

    /// All messages of a conversation in commit order.
    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<ChatMessage>>;

    /// Stamps `read_at` on unread non-agency messages, optionally only up to
    /// and including `up_to`. Returns the rows that changed.
    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        up_to: Option<Uuid>,
    ) -> PortResult<Vec<ChatMessage>>;

    async fn list_conversation_overviews(&self) -> PortResult<Vec<ConversationOverview>>;

    // --- Profiles ---
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>>;

    /// Creates or replaces the profile keyed by `user_id`.
    async fn upsert_profile(&self, user_id: Uuid, fields: &ProfileFields) -> PortResult<UserProfile>;
}

//=========================================================================================
// Blob Storage Port
//=========================================================================================

/// What a HEAD request against a stored object reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProbe {
    pub ok: bool,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Uploads an object without overwriting, returning the stored path.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<String>;

    fn public_url(&self, path: &str) -> String;

    async fn probe(&self, url: &str) -> PortResult<ObjectProbe>;

    async fn signed_url(&self, path: &str, ttl: Duration) -> PortResult<String>;
}

//=========================================================================================
// Remote Analysis Ports
//=========================================================================================

/// Output of the OCR/vision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub has_face: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageVerdict {
    pub is_spanish: bool,
    pub detected_language: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub document_type: DocumentType,
    pub country: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotReply {
    pub content: String,
    pub confidence: f64,
}

#[async_trait]
pub trait TextExtractionService: Send + Sync {
    /// Runs text and face detection over an image encoded as base64.
    async fn extract(&self, image_base64: &str) -> PortResult<ExtractedText>;
}

#[async_trait]
pub trait LanguageDetectionService: Send + Sync {
    async fn detect_language(&self, text: &str) -> PortResult<LanguageVerdict>;
}

#[async_trait]
pub trait DocumentClassificationService: Send + Sync {
    async fn classify(&self, text: &str, has_face: bool) -> PortResult<Classification>;
}

#[async_trait]
pub trait ChatResponderService: Send + Sync {
    /// Produces the next bot reply for a conversation history.
    async fn reply(&self, history: &[ChatMessage]) -> PortResult<BotReply>;
}
