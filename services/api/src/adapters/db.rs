//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`. Every query goes through the shared
//! retry wrapper, which repeats it only on connection-level failures.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use residency_core::domain::{
    AnalysisResult, ChatMessage, Conversation, ConversationOverview, CustomerOverview, Document,
    NewMessage, OverallStatus, ParticipantRole, ProfileFields, ResidencyProgress, ResidencyStep,
    ShippingAddress, StepUpdate, User, UserCredentials, UserProfile,
};
use residency_core::ports::{DatabaseService, NewDocument, PortError, PortResult};
use residency_core::progress::STEP_CATALOG;
use residency_core::retry::{retry_if, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    retry: RetryPolicy,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Opens the pool, retrying at a fixed interval while the database is unreachable.
    pub async fn connect(
        database_url: &str,
        interval: Duration,
        attempts: u32,
    ) -> Result<PgPool, sqlx::Error> {
        let mut attempt = 1;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
            {
                Ok(pool) => return Ok(pool),
                Err(e) if attempt < attempts => {
                    warn!(attempt, "Database not reachable yet, retrying in {:?}: {}", interval, e);
                    attempt += 1;
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Writes the step catalog into `residency_steps`. Safe to run on every start.
    pub async fn seed_step_catalog(&self) -> PortResult<()> {
        let pool = &self.pool;
        for step in STEP_CATALOG.iter() {
            self.run("seed_step_catalog", move || {
                sqlx::query(
                    "INSERT INTO residency_steps (order_number, title, description, estimated_time, requirements)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (order_number) DO UPDATE SET
                        title = EXCLUDED.title,
                        description = EXCLUDED.description,
                        estimated_time = EXCLUDED.estimated_time,
                        requirements = EXCLUDED.requirements",
                )
                .bind(step.order)
                .bind(step.title)
                .bind(step.description)
                .bind(step.estimated_time)
                .bind(step.requirements)
                .execute(pool)
            })
            .await?;
        }
        info!(steps = STEP_CATALOG.len(), "Step catalog seeded");
        Ok(())
    }

    async fn run<T, F, Fut>(&self, operation: &str, query: F) -> PortResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        retry_if(&self.retry, operation, is_connection_error, query)
            .await
            .map_err(|e| to_port_error(operation, e))
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

fn to_port_error(operation: &str, e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{}: no matching row", operation)),
        ref err if is_connection_error(err) => PortError::Unavailable(err.to_string()),
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::InvalidInput(db.message().to_string())
        }
        other => PortError::Unexpected(other.to_string()),
    }
}

fn parse_column<T>(raw: &str) -> PortResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

fn parse_optional<T>(raw: Option<String>) -> PortResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.as_deref().map(parse_column).transpose()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "user_id, email, role, created_at";
const DOCUMENT_COLUMNS: &str = "id, user_id, analysis_result, file_path, agency_notes, created_at";
const CONVERSATION_COLUMNS: &str = "id, user_id, status, is_bot_active, agency_id, created_at";
const MESSAGE_COLUMNS: &str =
    "seq, id, conversation_id, sender_id, sender_type, content, created_at, read_at";

/// Inserts a message under its writer-chosen id. A repeat of the same insert
/// (a retry after a lost acknowledgement) returns the row already stored.
fn insert_message_sql() -> String {
    format!(
        "WITH inserted AS (
             INSERT INTO chat_messages (id, conversation_id, sender_id, sender_type, content)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING
             RETURNING {cols}
         )
         SELECT {cols} FROM inserted
         UNION ALL
         SELECT {cols} FROM chat_messages
         WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM inserted)",
        cols = MESSAGE_COLUMNS
    )
}

const PROFILE_COLUMNS: &str = "p.id, p.user_id, u.email, p.first_name, p.last_name, p.country, \
    p.preferred_language, p.whatsapp, p.birth_date, p.shipping_address, p.nationality_country, \
    p.desired_residency_type, p.birth_country, p.primary_residency_country, p.residency_goal, \
    p.marital_status, p.internal_agency_notes, p.client_to_agency_notes, p.agency_to_client_notes, \
    p.created_at, p.updated_at";

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            user_id: self.user_id,
            email: self.email,
            role: parse_column(&self.role)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    #[sqlx(flatten)]
    user: UserRecord,
    hashed_password: String,
}

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    user_id: Uuid,
    analysis_result: Json<AnalysisResult>,
    file_path: String,
    agency_notes: Option<String>,
    created_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> Document {
        let analysis_result = self.analysis_result.0;
        Document {
            id: self.id,
            user_id: self.user_id,
            document_type: analysis_result.document_type,
            analysis_result,
            file_path: self.file_path,
            agency_notes: self.agency_notes,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StepRecord {
    id: Uuid,
    order_number: i32,
    title: String,
    description: String,
    estimated_time: String,
    requirements: String,
    status: String,
    notes: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}
impl StepRecord {
    fn to_domain(self) -> PortResult<ResidencyStep> {
        Ok(ResidencyStep {
            id: self.id,
            order: self.order_number,
            title: self.title,
            description: self.description,
            estimated_time: self.estimated_time,
            requirements: self.requirements,
            status: parse_column(&self.status)?,
            notes: self.notes,
            completed_at: self.completed_at,
        })
    }
}

#[derive(FromRow)]
struct CustomerRecord {
    #[sqlx(flatten)]
    user: UserRecord,
    first_name: Option<String>,
    last_name: Option<String>,
    step_statuses: Option<Vec<String>>,
}
impl CustomerRecord {
    fn to_domain(self) -> PortResult<CustomerOverview> {
        let step_statuses = self
            .step_statuses
            .map(|statuses| statuses.iter().map(|s| parse_column(s)).collect::<PortResult<Vec<_>>>())
            .transpose()?;
        Ok(CustomerOverview {
            user: self.user.to_domain()?,
            first_name: self.first_name,
            last_name: self.last_name,
            step_statuses,
        })
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    is_bot_active: bool,
    agency_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> PortResult<Conversation> {
        Ok(Conversation {
            id: self.id,
            user_id: self.user_id,
            status: parse_column(&self.status)?,
            is_bot_active: self.is_bot_active,
            agency_id: self.agency_id,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ConversationOverviewRecord {
    #[sqlx(flatten)]
    conversation: ConversationRecord,
    user_email: String,
    user_first_name: Option<String>,
    user_last_name: Option<String>,
    unread_count: i64,
    last_message_at: Option<DateTime<Utc>>,
}
impl ConversationOverviewRecord {
    fn to_domain(self) -> PortResult<ConversationOverview> {
        Ok(ConversationOverview {
            conversation: self.conversation.to_domain()?,
            user_email: self.user_email,
            user_first_name: self.user_first_name,
            user_last_name: self.user_last_name,
            unread_count: self.unread_count,
            last_message_at: self.last_message_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    seq: i64,
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Option<Uuid>,
    sender_type: String,
    content: String,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<ChatMessage> {
        Ok(ChatMessage {
            id: self.id,
            seq: self.seq,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            sender_type: parse_column(&self.sender_type)?,
            content: self.content,
            created_at: self.created_at,
            read_at: self.read_at,
        })
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    user_id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    country: Option<String>,
    preferred_language: Option<String>,
    whatsapp: Option<String>,
    birth_date: Option<NaiveDate>,
    shipping_address: Option<Json<ShippingAddress>>,
    nationality_country: Option<String>,
    desired_residency_type: Option<String>,
    birth_country: Option<String>,
    primary_residency_country: Option<String>,
    residency_goal: Option<String>,
    marital_status: Option<String>,
    internal_agency_notes: Option<String>,
    client_to_agency_notes: Option<String>,
    agency_to_client_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ProfileRecord {
    fn to_domain(self) -> PortResult<UserProfile> {
        Ok(UserProfile {
            id: self.id,
            user_id: self.user_id,
            email: self.email,
            fields: ProfileFields {
                first_name: self.first_name,
                last_name: self.last_name,
                country: self.country,
                preferred_language: self.preferred_language,
                whatsapp: self.whatsapp,
                birth_date: self.birth_date,
                shipping_address: self.shipping_address.map(|j| j.0),
                nationality_country: self.nationality_country,
                desired_residency_type: parse_optional(self.desired_residency_type)?,
                birth_country: self.birth_country,
                primary_residency_country: self.primary_residency_country,
                residency_goal: parse_optional(self.residency_goal)?,
                marital_status: parse_optional(self.marital_status)?,
                internal_agency_notes: self.internal_agency_notes,
                client_to_agency_notes: self.client_to_agency_notes,
                agency_to_client_notes: self.agency_to_client_notes,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- Users and Auth Sessions ---

    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let pool = &self.pool;
        let sql = format!(
            "INSERT INTO users (email, hashed_password) VALUES ($1, $2) RETURNING {}",
            USER_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("create_user_with_email", move || {
                sqlx::query_as::<_, UserRecord>(sql)
                    .bind(email)
                    .bind(hashed_password)
                    .fetch_one(pool)
            })
            .await?;
        record.to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let pool = &self.pool;
        let sql = format!("SELECT {}, hashed_password FROM users WHERE email = $1", USER_COLUMNS);
        let sql = sql.as_str();
        let record = self
            .run("get_user_by_email", move || {
                sqlx::query_as::<_, CredentialsRecord>(sql)
                    .bind(email)
                    .fetch_one(pool)
            })
            .await?;
        Ok(UserCredentials {
            user: record.user.to_domain()?,
            hashed_password: record.hashed_password,
        })
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS);
        let sql = sql.as_str();
        let record = self
            .run("get_user", move || {
                sqlx::query_as::<_, UserRecord>(sql).bind(user_id).fetch_one(pool)
            })
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => PortError::NotFound(format!("User {} not found", user_id)),
                other => other,
            })?;
        record.to_domain()
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let pool = &self.pool;
        self.run("create_auth_session", move || {
            sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
                .bind(session_id)
                .bind(user_id)
                .bind(expires_at)
                .execute(pool)
        })
        .await?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<User> {
        let pool = &self.pool;
        let record = self
            .run("validate_auth_session", move || {
                sqlx::query_as::<_, UserRecord>(
                    "SELECT u.user_id, u.email, u.role, u.created_at
                     FROM auth_sessions s JOIN users u ON u.user_id = s.user_id
                     WHERE s.id = $1 AND s.expires_at > now()",
                )
                .bind(session_id)
                .fetch_one(pool)
            })
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => PortError::Unauthorized,
                other => other,
            })?;
        record.to_domain()
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        let pool = &self.pool;
        self.run("delete_auth_session", move || {
            sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
                .bind(session_id)
                .execute(pool)
        })
        .await?;
        Ok(())
    }

    async fn list_customers(&self) -> PortResult<Vec<CustomerOverview>> {
        let pool = &self.pool;
        let records = self
            .run("list_customers", move || {
                sqlx::query_as::<_, CustomerRecord>(
                    "SELECT u.user_id, u.email, u.role, u.created_at, p.first_name, p.last_name,
                        (SELECT array_agg(sp.status ORDER BY s.order_number)
                         FROM residency_progress rp
                         JOIN residency_step_progress sp ON sp.progress_id = rp.id
                         JOIN residency_steps s ON s.id = sp.step_id
                         WHERE rp.user_id = u.user_id) AS step_statuses
                     FROM users u
                     LEFT JOIN user_profiles p ON p.user_id = u.user_id
                     WHERE u.role <> 'agency'
                     ORDER BY u.created_at DESC",
                )
                .fetch_all(pool)
            })
            .await?;
        records.into_iter().map(CustomerRecord::to_domain).collect()
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let pool = &self.pool;
        let result = self
            .run("delete_user", move || {
                sqlx::query("DELETE FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .execute(pool)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    // --- Documents ---

    async fn create_document(&self, document: NewDocument) -> PortResult<Document> {
        let pool = &self.pool;
        let sql = format!(
            "INSERT INTO documents (user_id, document_type, analysis_result, file_path)
             VALUES ($1, $2, $3, $4) RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let sql = sql.as_str();
        let document = &document;
        let record = self
            .run("create_document", move || {
                sqlx::query_as::<_, DocumentRecord>(sql)
                    .bind(document.user_id)
                    .bind(document.document_type().as_str())
                    .bind(Json(&document.analysis_result))
                    .bind(document.file_path.as_str())
                    .fetch_one(pool)
            })
            .await?;
        Ok(record.to_domain())
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {} FROM documents WHERE user_id = $1 ORDER BY created_at DESC",
            DOCUMENT_COLUMNS
        );
        let sql = sql.as_str();
        let records = self
            .run("list_documents", move || {
                sqlx::query_as::<_, DocumentRecord>(sql).bind(user_id).fetch_all(pool)
            })
            .await?;
        Ok(records.into_iter().map(DocumentRecord::to_domain).collect())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let sql = sql.as_str();
        let record = self
            .run("get_document", move || {
                sqlx::query_as::<_, DocumentRecord>(sql).bind(document_id).fetch_one(pool)
            })
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    PortError::NotFound(format!("Document {} not found", document_id))
                }
                other => other,
            })?;
        Ok(record.to_domain())
    }

    async fn set_document_notes(&self, document_id: Uuid, notes: &str) -> PortResult<()> {
        let pool = &self.pool;
        let result = self
            .run("set_document_notes", move || {
                sqlx::query("UPDATE documents SET agency_notes = $2 WHERE id = $1")
                    .bind(document_id)
                    .bind(notes)
                    .execute(pool)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(())
    }

    // --- Residency Progress ---

    async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<ResidencyProgress>> {
        let pool = &self.pool;
        let progress_id: Option<Uuid> = self
            .run("get_progress", move || {
                sqlx::query_scalar("SELECT id FROM residency_progress WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(pool)
            })
            .await?;
        let Some(progress_id) = progress_id else {
            return Ok(None);
        };

        let records = self
            .run("get_progress_steps", move || {
                sqlx::query_as::<_, StepRecord>(
                    "SELECT s.id, s.order_number, s.title, s.description, s.estimated_time,
                        s.requirements, sp.status, sp.notes, sp.completed_at
                     FROM residency_step_progress sp
                     JOIN residency_steps s ON s.id = sp.step_id
                     WHERE sp.progress_id = $1
                     ORDER BY s.order_number ASC",
                )
                .bind(progress_id)
                .fetch_all(pool)
            })
            .await?;

        let steps = records
            .into_iter()
            .map(StepRecord::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        Ok(Some(ResidencyProgress {
            id: progress_id,
            user_id,
            steps,
        }))
    }

    async fn update_step(
        &self,
        progress_id: Uuid,
        step_id: Uuid,
        update: &StepUpdate,
    ) -> PortResult<()> {
        let pool = &self.pool;
        let result = self
            .run("update_step", move || {
                sqlx::query(
                    "UPDATE residency_step_progress
                     SET status = $3, notes = $4, completed_at = $5, updated_at = now()
                     WHERE progress_id = $1 AND step_id = $2",
                )
                .bind(progress_id)
                .bind(step_id)
                .bind(update.status.as_str())
                .bind(update.notes.as_deref())
                .bind(update.completed_at)
                .execute(pool)
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Step {} not found in progress {}",
                step_id, progress_id
            )));
        }
        Ok(())
    }

    async fn cache_progress_status(
        &self,
        progress_id: Uuid,
        status: OverallStatus,
    ) -> PortResult<()> {
        let pool = &self.pool;
        self.run("cache_progress_status", move || {
            sqlx::query("UPDATE residency_progress SET status = $2, updated_at = now() WHERE id = $1")
                .bind(progress_id)
                .bind(status.as_str())
                .execute(pool)
        })
        .await?;
        Ok(())
    }

    // --- Conversations and Messages ---

    async fn find_active_conversation(&self, user_id: Uuid) -> PortResult<Option<Conversation>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {} FROM chat_conversations
             WHERE user_id = $1 AND status = 'active'
             ORDER BY created_at DESC LIMIT 1",
            CONVERSATION_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("find_active_conversation", move || {
                sqlx::query_as::<_, ConversationRecord>(sql)
                    .bind(user_id)
                    .fetch_optional(pool)
            })
            .await?;
        record.map(ConversationRecord::to_domain).transpose()
    }

    async fn create_conversation(&self, user_id: Uuid) -> PortResult<Conversation> {
        let pool = &self.pool;
        let sql = format!(
            "INSERT INTO chat_conversations (user_id) VALUES ($1) RETURNING {}",
            CONVERSATION_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("create_conversation", move || {
                sqlx::query_as::<_, ConversationRecord>(sql).bind(user_id).fetch_one(pool)
            })
            .await?;
        record.to_domain()
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> PortResult<()> {
        let pool = &self.pool;
        self.run("add_participant", move || {
            sqlx::query(
                "INSERT INTO chat_participants (conversation_id, user_id, role)
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(role.as_str())
            .execute(pool)
        })
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM chat_conversations WHERE id = $1", CONVERSATION_COLUMNS);
        let sql = sql.as_str();
        let record = self
            .run("get_conversation", move || {
                sqlx::query_as::<_, ConversationRecord>(sql)
                    .bind(conversation_id)
                    .fetch_one(pool)
            })
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    PortError::NotFound(format!("Conversation {} not found", conversation_id))
                }
                other => other,
            })?;
        record.to_domain()
    }

    async fn set_bot_state(
        &self,
        conversation_id: Uuid,
        is_bot_active: bool,
        agency_id: Option<Uuid>,
    ) -> PortResult<Conversation> {
        let pool = &self.pool;
        let sql = format!(
            "UPDATE chat_conversations SET is_bot_active = $2, agency_id = $3
             WHERE id = $1 RETURNING {}",
            CONVERSATION_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("set_bot_state", move || {
                sqlx::query_as::<_, ConversationRecord>(sql)
                    .bind(conversation_id)
                    .bind(is_bot_active)
                    .bind(agency_id)
                    .fetch_one(pool)
            })
            .await?;
        record.to_domain()
    }

    async fn insert_message(&self, message: NewMessage) -> PortResult<ChatMessage> {
        let pool = &self.pool;
        let sql = insert_message_sql();
        let sql = sql.as_str();
        let message = &message;
        let record = self
            .run("insert_message", move || {
                sqlx::query_as::<_, MessageRecord>(sql)
                    .bind(message.id)
                    .bind(message.conversation_id)
                    .bind(message.sender_id)
                    .bind(message.sender_type.as_str())
                    .bind(message.content.as_str())
                    .fetch_one(pool)
            })
            .await?;
        record.to_domain()
    }

    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE conversation_id = $1 ORDER BY seq ASC",
            MESSAGE_COLUMNS
        );
        let sql = sql.as_str();
        let records = self
            .run("list_messages", move || {
                sqlx::query_as::<_, MessageRecord>(sql)
                    .bind(conversation_id)
                    .fetch_all(pool)
            })
            .await?;
        records.into_iter().map(MessageRecord::to_domain).collect()
    }

    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        up_to: Option<Uuid>,
    ) -> PortResult<Vec<ChatMessage>> {
        let pool = &self.pool;
        let sql = format!(
            "UPDATE chat_messages SET read_at = now()
             WHERE conversation_id = $1
               AND read_at IS NULL
               AND sender_type <> 'agency'
               AND ($2::uuid IS NULL
                    OR seq <= (SELECT seq FROM chat_messages WHERE id = $2))
             RETURNING {}",
            MESSAGE_COLUMNS
        );
        let sql = sql.as_str();
        let mut records = self
            .run("mark_messages_read", move || {
                sqlx::query_as::<_, MessageRecord>(sql)
                    .bind(conversation_id)
                    .bind(up_to)
                    .fetch_all(pool)
            })
            .await?;
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(MessageRecord::to_domain).collect()
    }

    async fn list_conversation_overviews(&self) -> PortResult<Vec<ConversationOverview>> {
        let pool = &self.pool;
        let records = self
            .run("list_conversation_overviews", move || {
                sqlx::query_as::<_, ConversationOverviewRecord>(
                    "SELECT c.id, c.user_id, c.status, c.is_bot_active, c.agency_id, c.created_at,
                        u.email AS user_email,
                        p.first_name AS user_first_name,
                        p.last_name AS user_last_name,
                        (SELECT COUNT(*) FROM chat_messages m
                         WHERE m.conversation_id = c.id
                           AND m.read_at IS NULL
                           AND m.sender_type <> 'agency') AS unread_count,
                        (SELECT MAX(m.created_at) FROM chat_messages m
                         WHERE m.conversation_id = c.id) AS last_message_at
                     FROM chat_conversations c
                     JOIN users u ON u.user_id = c.user_id
                     LEFT JOIN user_profiles p ON p.user_id = c.user_id",
                )
                .fetch_all(pool)
            })
            .await?;
        records
            .into_iter()
            .map(ConversationOverviewRecord::to_domain)
            .collect()
    }

    // --- Profiles ---

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {} FROM user_profiles p JOIN users u ON u.user_id = p.user_id
             WHERE p.user_id = $1",
            PROFILE_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("get_profile", move || {
                sqlx::query_as::<_, ProfileRecord>(sql)
                    .bind(user_id)
                    .fetch_optional(pool)
            })
            .await?;
        record.map(ProfileRecord::to_domain).transpose()
    }

    async fn upsert_profile(&self, user_id: Uuid, fields: &ProfileFields) -> PortResult<UserProfile> {
        let pool = &self.pool;
        let sql = format!(
            "WITH p AS (
                INSERT INTO user_profiles (
                    user_id, first_name, last_name, country, preferred_language, whatsapp,
                    birth_date, shipping_address, nationality_country, desired_residency_type,
                    birth_country, primary_residency_country, residency_goal, marital_status,
                    internal_agency_notes, client_to_agency_notes, agency_to_client_notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (user_id) DO UPDATE SET
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    country = EXCLUDED.country,
                    preferred_language = EXCLUDED.preferred_language,
                    whatsapp = EXCLUDED.whatsapp,
                    birth_date = EXCLUDED.birth_date,
                    shipping_address = EXCLUDED.shipping_address,
                    nationality_country = EXCLUDED.nationality_country,
                    desired_residency_type = EXCLUDED.desired_residency_type,
                    birth_country = EXCLUDED.birth_country,
                    primary_residency_country = EXCLUDED.primary_residency_country,
                    residency_goal = EXCLUDED.residency_goal,
                    marital_status = EXCLUDED.marital_status,
                    internal_agency_notes = EXCLUDED.internal_agency_notes,
                    client_to_agency_notes = EXCLUDED.client_to_agency_notes,
                    agency_to_client_notes = EXCLUDED.agency_to_client_notes,
                    updated_at = now()
                RETURNING *
             )
             SELECT {} FROM p JOIN users u ON u.user_id = p.user_id",
            PROFILE_COLUMNS
        );
        let sql = sql.as_str();
        let record = self
            .run("upsert_profile", move || {
                sqlx::query_as::<_, ProfileRecord>(sql)
                    .bind(user_id)
                    .bind(fields.first_name.as_deref())
                    .bind(fields.last_name.as_deref())
                    .bind(fields.country.as_deref())
                    .bind(fields.preferred_language.as_deref())
                    .bind(fields.whatsapp.as_deref())
                    .bind(fields.birth_date)
                    .bind(fields.shipping_address.as_ref().map(Json))
                    .bind(fields.nationality_country.as_deref())
                    .bind(fields.desired_residency_type.map(|v| v.as_str()))
                    .bind(fields.birth_country.as_deref())
                    .bind(fields.primary_residency_country.as_deref())
                    .bind(fields.residency_goal.map(|v| v.as_str()))
                    .bind(fields.marital_status.map(|v| v.as_str()))
                    .bind(fields.internal_agency_notes.as_deref())
                    .bind(fields.client_to_agency_notes.as_deref())
                    .bind(fields.agency_to_client_notes.as_deref())
                    .fetch_one(pool)
            })
            .await?;
        record.to_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_retried() {
        assert!(is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(is_connection_error(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn errors_map_onto_port_errors() {
        assert!(matches!(
            to_port_error("get_user", sqlx::Error::RowNotFound),
            PortError::NotFound(_)
        ));
        assert!(to_port_error("list_messages", sqlx::Error::PoolClosed).is_transient());
        assert!(matches!(
            to_port_error("x", sqlx::Error::Protocol("bad frame".into())),
            PortError::Unexpected(_)
        ));
    }

    #[test]
    fn repeated_message_inserts_fall_back_to_the_stored_row() {
        let sql = insert_message_sql();
        assert!(sql.contains("INSERT INTO chat_messages (id,"));
        assert!(sql.contains("ON CONFLICT (id) DO NOTHING"));
        assert!(sql.contains("WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM inserted)"));
    }

    #[test]
    fn unknown_stored_values_surface_as_unexpected() {
        let err = parse_column::<residency_core::domain::StepStatus>("done").unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
        assert_eq!(parse_optional::<residency_core::domain::MaritalStatus>(None).unwrap(), None);
    }
}
