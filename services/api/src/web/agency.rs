//! services/api/src/web/agency.rs
//!
//! Handlers for the agency back office. Every route here sits behind `require_agency`.

use crate::web::rest::{port_error, SearchParams};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use residency_core::domain::{ProfileFields, Role, StepStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStepRequest {
    pub step_id: Uuid,
    #[schema(value_type = String, example = "in_progress")]
    pub status: StepStatus,
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct DocumentNotesRequest {
    pub notes: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MarkReadResponse {
    pub updated: usize,
}

//=========================================================================================
// Customers
//=========================================================================================

/// Customer accounts with their names and a progress summary, newest first.
#[utoipa::path(
    get,
    path = "/api/customers",
    params(crate::web::rest::SearchParams),
    responses(
        (status = 200, description = "Customer list"),
        (status = 403, description = "Caller is not an agency account")
    )
)]
pub async fn list_customers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let customers = state
        .customers
        .list(params.q.as_deref())
        .await
        .map_err(|e| port_error("list customers", e))?;
    Ok(Json(customers))
}

#[utoipa::path(
    get,
    path = "/api/customers/{id}",
    params(("id" = Uuid, Path, description = "The customer's user id.")),
    responses(
        (status = 200, description = "Account, documents, progress and profile"),
        (status = 404, description = "No such customer")
    )
)]
pub async fn customer_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let detail = state
        .customers
        .detail(user_id)
        .await
        .map_err(|e| port_error("load customer", e))?;
    Ok(Json(detail))
}

/// Deletes the account and everything it owns.
#[utoipa::path(
    delete,
    path = "/api/customers/{id}",
    params(("id" = Uuid, Path, description = "The customer's user id.")),
    responses(
        (status = 204, description = "Customer deleted"),
        (status = 404, description = "No such customer")
    )
)]
pub async fn delete_customer_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .customers
        .delete(user_id)
        .await
        .map_err(|e| port_error("delete customer", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sets one step's status and notes, then returns the refreshed overview.
#[utoipa::path(
    put,
    path = "/api/customers/{id}/progress",
    params(("id" = Uuid, Path, description = "The customer's user id.")),
    request_body = UpdateStepRequest,
    responses(
        (status = 200, description = "Updated progress overview"),
        (status = 404, description = "No progress record or unknown step")
    )
)]
pub async fn update_progress_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateStepRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let overview = state
        .progress
        .update_step(user_id, req.step_id, req.status, req.notes)
        .await
        .map_err(|e| port_error("update progress", e))?;
    info!(%user_id, step_id = %req.step_id, status = %req.status, "Residency step updated");
    Ok(Json(overview))
}

#[utoipa::path(
    get,
    path = "/api/customers/{id}/profile",
    params(("id" = Uuid, Path, description = "The customer's user id.")),
    responses((status = 200, description = "The full profile including internal notes"))
)]
pub async fn get_customer_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .profiles
        .get(user_id, Role::Agency)
        .await
        .map_err(|e| port_error("load profile", e))?;
    Ok(Json(profile))
}

/// Saves a customer's profile. The customer's own note to the agency is kept as stored.
#[utoipa::path(
    put,
    path = "/api/customers/{id}/profile",
    params(("id" = Uuid, Path, description = "The customer's user id.")),
    request_body(content_type = "application/json", description = "Profile fields"),
    responses((status = 200, description = "The saved profile"))
)]
pub async fn put_customer_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(fields): Json<ProfileFields>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .profiles
        .save(user_id, fields, Role::Agency)
        .await
        .map_err(|e| port_error("save profile", e))?;
    Ok(Json(profile))
}

//=========================================================================================
// Documents and Conversations
//=========================================================================================

/// Attaches reviewer notes to a document. The analysis result is not touched.
#[utoipa::path(
    post,
    path = "/api/documents/{id}/notes",
    params(("id" = Uuid, Path, description = "The document id.")),
    request_body = DocumentNotesRequest,
    responses(
        (status = 200, description = "The annotated document"),
        (status = 404, description = "No such document")
    )
)]
pub async fn annotate_document_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<DocumentNotesRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let document = state
        .documents
        .annotate(document_id, &req.notes)
        .await
        .map_err(|e| port_error("annotate document", e))?;
    Ok(Json(document))
}

/// One row per customer, unread conversations first.
#[utoipa::path(
    get,
    path = "/api/conversations",
    params(crate::web::rest::SearchParams),
    responses((status = 200, description = "Conversation overview"))
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rows = state
        .chat
        .dashboard(params.q.as_deref())
        .await
        .map_err(|e| port_error("list conversations", e))?;
    Ok(Json(rows))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{id}/read",
    params(("id" = Uuid, Path, description = "The conversation id.")),
    responses(
        (status = 200, description = "How many messages were marked read", body = MarkReadResponse),
        (status = 404, description = "No such conversation")
    )
)]
pub async fn mark_conversation_read_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .get_conversation(conversation_id)
        .await
        .map_err(|e| port_error("load conversation", e))?;
    let updated = state
        .chat
        .mark_read(conversation_id, None)
        .await
        .map_err(|e| port_error("mark messages read", e))?;
    Ok(Json(MarkReadResponse { updated }))
}
