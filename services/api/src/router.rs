//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the chat endpoints and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ChatLogPage, ChatLogSummary, ChatRequest, ChatSessionLog, ChatStarted, ChatStopped,
        ErrorResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_chat,
        handlers::stop_chat,
        handlers::chat_stream,
        handlers::list_chat_logs,
        handlers::get_chat_log,
    ),
    components(
        schemas(ChatRequest, ChatStarted, ChatStopped, ChatSessionLog, ChatLogSummary, ChatLogPage, ErrorResponse)
    ),
    tags(
        (name = "Parley API", description = "Voice calls with AI assistants")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/chat", post(handlers::start_chat))
        .route("/chat/stop", post(handlers::stop_chat))
        .route("/chat/stream", get(handlers::chat_stream))
        .route("/chat/logs", get(handlers::list_chat_logs))
        .route("/chat/logs/{id}", get(handlers::get_chat_log))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
