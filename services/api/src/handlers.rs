//! Axum Handlers for the REST API
//!
//! Starting and stopping calls, streaming their transcript over SSE, and
//! reading stored transcripts. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{
    StreamExt, future,
    stream::{self, BoxStream},
};
use parley_core::{StoppedSession, types::render_transcript};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        ChatLogPage, ChatLogSummary, ChatRequest, ChatSessionLog, ChatStarted, ChatStopped,
        ErrorResponse, LogsQuery, NewChatLog, SessionQuery,
    },
    state::AppState,
    store::Store,
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(message) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Start a voice call with an assistant.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 201, description = "Call started", body = ChatStarted),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unknown API key or secret", body = ErrorResponse),
        (status = 502, description = "The call could not be set up", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user placing the call")
    )
)]
pub async fn start_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    user_id(&headers)?;
    if request.assistant_id <= 0 {
        return Err(ApiError::BadRequest("assistantId is required".to_string()));
    }

    let credentials = state
        .store
        .find_credentials(&request.api_key, &request.api_secret)
        .await?
        .ok_or_else(|| {
            ApiError::Unauthorized(
                "Secret or key is invalid or wrong. Please check again.".to_string(),
            )
        })?;

    let stored_prompt = state
        .store
        .assistant_prompt(request.assistant_id)
        .await?
        .unwrap_or_default();
    let prompt = request.prompt_over(stored_prompt);

    let session_id = Uuid::new_v4().to_string();
    let session = state.new_call(&session_id, &credentials, &request, prompt)?;

    state
        .registry
        .start(&session_id, request.assistant_id, session)
        .await
        .map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Call startup failed.");
            ApiError::BadGateway(format!("Failed to start voice call: {}", e))
        })?;

    info!(session_id = %session_id, assistant_id = request.assistant_id, "Voice call started.");
    Ok((
        StatusCode::CREATED,
        Json(ChatStarted {
            session_id,
            message: "Voice call started".to_string(),
        }),
    ))
}

/// Persists the transcript of a stopped call. The session is already gone
/// from the registry, so a failed save logs the transcript in full.
async fn save_transcript(
    store: &dyn Store,
    session_id: &str,
    user_id: String,
    stopped: &StoppedSession,
) -> Result<Option<i64>, ApiError> {
    if stopped.transcript.is_empty() {
        info!(session_id, "Call ended without any transcript.");
        return Ok(None);
    }

    let content = render_transcript(&stopped.transcript);
    match store
        .save_chat_log(NewChatLog {
            session_id: session_id.to_string(),
            user_id,
            assistant_id: stopped.assistant_id,
            content: content.clone(),
        })
        .await
    {
        Ok(log) => Ok(Some(log.id)),
        Err(e) => {
            error!(
                session_id,
                assistant_id = stopped.assistant_id,
                transcript = %content,
                error = %e,
                "Failed to save transcript."
            );
            Err(e.into())
        }
    }
}

/// Stop a call and store its transcript.
#[utoipa::path(
    post,
    path = "/chat/stop",
    responses(
        (status = 200, description = "Call stopped", body = ChatStopped),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "No active call with this id", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        SessionQuery,
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn stop_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<Json<ChatStopped>, ApiError> {
    let user_id = user_id(&headers)?.to_string();

    let stopped = state
        .registry
        .stop(&query.session_id)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let log_id = save_transcript(state.store.as_ref(), &query.session_id, user_id, &stopped).await?;

    Ok(Json(ChatStopped {
        message: "Voice call stopped".to_string(),
        log_id,
    }))
}

/// Stream the live transcript of a call as server-sent events.
///
/// Each transcript line is a `message` event. An unknown session yields a
/// single `error` event.
#[utoipa::path(
    get,
    path = "/chat/stream",
    responses(
        (status = 200, description = "Event stream of transcript lines", content_type = "text/event-stream", body = String)
    ),
    params(SessionQuery)
)]
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(entry) = state.registry.lookup(&query.session_id) else {
        warn!(session_id = %query.session_id, "Stream requested for unknown session.");
        let event = Event::default()
            .event("error")
            .data("No active chat session");
        let events: BoxStream<'static, Result<Event, Infallible>> =
            stream::once(future::ready(Ok(event))).boxed();
        return Sse::new(events).into_response();
    };

    let closed = entry.session.cancellation().cancelled_owned();
    let lines = BroadcastStream::new(entry.session.subscribe())
        .filter_map(|item| {
            future::ready(match item {
                Ok(line) => Some(Ok(Event::default().event("message").data(line))),
                Err(e) => {
                    warn!(error = %e, "Transcript stream lagged; lines were dropped.");
                    None
                }
            })
        })
        .take_until(closed);

    let lines: BoxStream<'static, Result<Event, Infallible>> = lines.boxed();
    Sse::new(lines)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// List stored transcripts, oldest first.
#[utoipa::path(
    get,
    path = "/chat/logs",
    responses(
        (status = 200, description = "A page of transcripts", body = ChatLogPage),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        LogsQuery,
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_chat_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ChatLogPage>, ApiError> {
    let user_id = user_id(&headers)?;
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size <= 0 {
        return Err(ApiError::BadRequest("Invalid pageSize".to_string()));
    }
    let page_size = page_size.min(MAX_PAGE_SIZE);

    let logs = state
        .store
        .list_chat_logs(user_id, query.cursor, page_size)
        .await?;

    let has_more = logs.len() as i64 == page_size;
    let next_cursor = logs.last().map(|log| log.id);
    Ok(Json(ChatLogPage {
        logs: logs.into_iter().map(ChatLogSummary::from).collect(),
        next_cursor,
        has_more,
    }))
}

/// Get one stored transcript.
#[utoipa::path(
    get,
    path = "/chat/logs/{id}",
    responses(
        (status = 200, description = "Transcript details", body = ChatSessionLog),
        (status = 404, description = "Transcript not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = i64, Path, description = "Transcript ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_chat_log(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ChatSessionLog>, ApiError> {
    let user_id = user_id(&headers)?;
    let log = state
        .store
        .get_chat_log(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Chat log with id '{}' not found", id)))?;
    Ok(Json(log))
}
