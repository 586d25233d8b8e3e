//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Extension,
};
use residency_core::domain::User;
use residency_core::ports::PortError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::state::AppState;

/// Reads the session token from the `session` cookie, falling back to a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        })
        .filter(|token| !token.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

/// Middleware that validates the session token and loads the signed-in user.
///
/// If valid, inserts the `User` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = session_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let user = state.db.validate_auth_session(token).await.map_err(|e| match e {
        PortError::Unauthorized | PortError::NotFound(_) => StatusCode::UNAUTHORIZED,
        other => {
            error!("Failed to validate auth session: {:?}", other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Runs after `require_auth`; lets only agency accounts through.
pub async fn require_agency(
    Extension(user): Extension<User>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !user.is_agency() {
        warn!(user_id = %user.user_id, path = %req.uri().path(), "Customer denied agency route");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(req).await)
}
