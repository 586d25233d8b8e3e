//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the customer-facing REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use residency_core::domain::{ProfileFields, Upload, User};
use residency_core::ports::PortError;
use residency_core::intake::MAX_UPLOAD_BYTES;
use residency_core::{IntakeError, SubmitError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        upload_document_handler,
        list_documents_handler,
        document_links_handler,
        get_progress_handler,
        get_profile_handler,
        put_profile_handler,
        open_conversation_handler,
        list_messages_handler,
        send_message_handler,
        crate::web::agency::list_customers_handler,
        crate::web::agency::customer_detail_handler,
        crate::web::agency::delete_customer_handler,
        crate::web::agency::update_progress_handler,
        crate::web::agency::get_customer_profile_handler,
        crate::web::agency::put_customer_profile_handler,
        crate::web::agency::annotate_document_handler,
        crate::web::agency::list_conversations_handler,
        crate::web::agency::mark_conversation_read_handler,
    ),
    components(
        schemas(
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            SendMessageRequest,
            crate::web::agency::UpdateStepRequest,
            crate::web::agency::DocumentNotesRequest,
            crate::web::agency::MarkReadResponse,
        )
    ),
    tags(
        (name = "Residency Assistant API", description = "Document intake, residency progress, profiles and support chat.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Payload Structs
//=========================================================================================

#[derive(Deserialize, Serialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
}

/// `?q=` filter shared by the agency list endpoints.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    /// Case-insensitive match against email and full name.
    pub q: Option<String>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Reduces a port failure to a status and a short message, logging server-side failures.
pub(crate) fn port_error(action: &str, e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        PortError::Unauthorized => (StatusCode::FORBIDDEN, "Access denied".to_string()),
        PortError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
        other => {
            error!("Failed to {}: {:?}", action, other);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", action))
        }
    }
}

fn submit_error(e: SubmitError) -> (StatusCode, String) {
    let status = match &e {
        SubmitError::Intake(IntakeError::TooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
        SubmitError::Intake(intake) if intake.is_validation() => StatusCode::BAD_REQUEST,
        SubmitError::Intake(_) | SubmitError::Analysis(_) => StatusCode::BAD_GATEWAY,
        SubmitError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("Upload rejected: {}", e);
    } else {
        error!("Document submission failed: {:?}", e);
    }
    (status, e.to_string())
}

/// A body cut off by the upload limit is the intake's size rejection; any other
/// multipart failure is a malformed form.
fn multipart_error(e: MultipartError, declared_len: Option<usize>) -> (StatusCode, String) {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let size = declared_len.unwrap_or(MAX_UPLOAD_BYTES + 1);
        return submit_error(SubmitError::Intake(IntakeError::TooLarge(size)));
    }
    (
        StatusCode::BAD_REQUEST,
        format!("Failed to read multipart data: {}", e),
    )
}

//=========================================================================================
// Documents
//=========================================================================================

/// Upload one identity or certificate image for classification.
///
/// Accepts a multipart/form-data request; the part named `file` (or the first part
/// carrying a file name) is used.
#[utoipa::path(
    post,
    path = "/documents",
    request_body(content_type = "multipart/form-data", description = "A JPG, PNG or WebP image of at most 10MB."),
    responses(
        (status = 201, description = "Document stored, analyzed and recorded"),
        (status = 400, description = "Missing file or unsupported type"),
        (status = 413, description = "File larger than 10MB"),
        (status = 502, description = "Storage or analysis service failed")
    )
)]
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, declared_len))?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().unwrap_or("document").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, declared_len))?;
        upload = Some(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Multipart form must include a file".to_string(),
        )
    })?;

    let document = state
        .documents
        .submit(user.user_id, upload)
        .await
        .map_err(submit_error)?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// The caller's documents, newest first.
#[utoipa::path(
    get,
    path = "/documents",
    responses((status = 200, description = "Documents with their analysis results"))
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let documents = state
        .documents
        .list(user.user_id)
        .await
        .map_err(|e| port_error("list documents", e))?;
    Ok(Json(documents))
}

/// Preview and time-limited download links for one document.
#[utoipa::path(
    get,
    path = "/documents/{id}/links",
    params(("id" = Uuid, Path, description = "The document id.")),
    responses(
        (status = 200, description = "Public preview URL and signed download URL"),
        (status = 403, description = "Document belongs to another customer"),
        (status = 404, description = "No such document")
    )
)]
pub async fn document_links_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let links = state
        .documents
        .links(&user, document_id)
        .await
        .map_err(|e| port_error("create document links", e))?;
    Ok(Json(links))
}

//=========================================================================================
// Progress and Profile
//=========================================================================================

/// The caller's residency progress, `null` until the process is started.
#[utoipa::path(
    get,
    path = "/progress",
    responses((status = 200, description = "Progress overview with the derived overall status"))
)]
pub async fn get_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let overview = state
        .progress
        .overview(user.user_id)
        .await
        .map_err(|e| port_error("load progress", e))?;
    Ok(Json(overview))
}

#[utoipa::path(
    get,
    path = "/profile",
    responses((status = 200, description = "The caller's profile, `null` when none was saved"))
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .profiles
        .get(user.user_id, user.role)
        .await
        .map_err(|e| port_error("load profile", e))?;
    Ok(Json(profile))
}

/// Creates or replaces the caller's profile. Agency-owned note fields are kept as stored.
#[utoipa::path(
    put,
    path = "/profile",
    request_body(content_type = "application/json", description = "Profile fields"),
    responses((status = 200, description = "The saved profile"))
)]
pub async fn put_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(fields): Json<ProfileFields>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .profiles
        .save(user.user_id, fields, user.role)
        .await
        .map_err(|e| port_error("save profile", e))?;
    Ok(Json(profile))
}

//=========================================================================================
// Chat
//=========================================================================================

/// Returns the customer's active support conversation, creating it on first use.
#[utoipa::path(
    post,
    path = "/chat/conversation",
    responses(
        (status = 200, description = "The active conversation"),
        (status = 403, description = "Agency accounts do not own conversations")
    )
)]
pub async fn open_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if user.is_agency() {
        return Err((
            StatusCode::FORBIDDEN,
            "Only customers have a support conversation".to_string(),
        ));
    }
    let conversation = state
        .chat
        .open_conversation(user.user_id)
        .await
        .map_err(|e| port_error("open conversation", e))?;
    Ok(Json(conversation))
}

#[utoipa::path(
    get,
    path = "/chat/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "The conversation id.")),
    responses(
        (status = 200, description = "Messages in send order"),
        (status = 403, description = "Conversation belongs to another customer")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .chat
        .conversation_for(&user, conversation_id)
        .await
        .map_err(|e| port_error("load conversation", e))?;
    let messages = state
        .chat
        .history(conversation_id)
        .await
        .map_err(|e| port_error("load messages", e))?;
    Ok(Json(messages))
}

/// Sends a message as the caller. A customer message wakes the automated responder.
#[utoipa::path(
    post,
    path = "/chat/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "The conversation id.")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "The stored message"),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Conversation belongs to another customer")
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = state
        .chat
        .send(&user, conversation_id, &req.content)
        .await
        .map_err(|e| port_error("send message", e))?;
    state.responder.spawn(message.clone());
    Ok((StatusCode::CREATED, Json(message)))
}
