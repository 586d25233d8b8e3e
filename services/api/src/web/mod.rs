pub mod agency;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

pub use middleware::{require_agency, require_auth};
pub use ws_handler::ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use residency_core::intake::MAX_UPLOAD_BYTES;
use state::AppState;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Multipart framing on top of the largest accepted image.
const BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

/// Builds the complete application router: auth, customer routes, the agency back
/// office under `/api`, the chat socket and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Agency-only routes; `require_auth` runs first and supplies the user.
    let agency_routes = Router::new()
        .route("/api/customers", get(agency::list_customers_handler))
        .route(
            "/api/customers/{id}",
            get(agency::customer_detail_handler).delete(agency::delete_customer_handler),
        )
        .route("/api/customers/{id}/progress", put(agency::update_progress_handler))
        .route(
            "/api/customers/{id}/profile",
            get(agency::get_customer_profile_handler).put(agency::put_customer_profile_handler),
        )
        .route("/api/documents/{id}/notes", post(agency::annotate_document_handler))
        .route("/api/conversations", get(agency::list_conversations_handler))
        .route(
            "/api/conversations/{id}/read",
            post(agency::mark_conversation_read_handler),
        )
        .layer(axum_middleware::from_fn(require_agency));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/documents",
            post(rest::upload_document_handler).get(rest::list_documents_handler),
        )
        .route("/documents/{id}/links", get(rest::document_links_handler))
        .route("/progress", get(rest::get_progress_handler))
        .route(
            "/profile",
            get(rest::get_profile_handler).put(rest::put_profile_handler),
        )
        .route("/chat/conversation", post(rest::open_conversation_handler))
        .route(
            "/chat/conversations/{id}/messages",
            get(rest::list_messages_handler).post(rest::send_message_handler),
        )
        .route("/ws", get(ws_handler))
        .merge(agency_routes)
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors_layer(&app_state.config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", rest::ApiDoc::openapi()))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);
    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            layer
        }
    }
}
