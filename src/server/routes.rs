//! axum route handlers for starting and resuming streams.
//!
//! Each stream item becomes one SSE event whose sole `data:` field carries
//! the item JSON — no named event types, no event ids. Errors raised before
//! the stream opens map to status codes; once headers are out, errors travel
//! in-band as `stream_error` / `stream_fatal_error` items.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::callers::ServerSideCaller;
use crate::errors::{RiverError, RiverErrorKind};
use crate::provider::ItemReceiver;
use crate::router::RiverRouter;
use crate::token::decode_resumption_token;
use crate::types::{AbortSignal, AdapterRequest};

/// Shared state for the river endpoints.
#[derive(Clone)]
struct RiverState {
    caller: Arc<ServerSideCaller>,
}

/// Request body for starting a stream.
#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    /// Name of the stream in the router.
    pub router_stream_key: String,
    /// Raw input, validated against the stream's schema.
    pub input: Value,
}

#[derive(Debug, Deserialize)]
struct ResumeQuery {
    #[serde(rename = "resumeKey")]
    resume_key: Option<String>,
}

/// Build the axum router serving `router` at `/`.
///
/// Mount it wherever the endpoint should live, e.g.
/// `Router::new().nest("/api/river", river_routes(router))`.
pub fn river_routes(router: Arc<RiverRouter>) -> Router {
    let state = RiverState {
        caller: Arc::new(ServerSideCaller::new(router)),
    };
    Router::new()
        .route("/", post(start_handler).get(resume_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_status(error: &RiverError) -> StatusCode {
    match error.kind {
        RiverErrorKind::Validation | RiverErrorKind::InvalidResumptionToken => {
            StatusCode::BAD_REQUEST
        }
        RiverErrorKind::StreamNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: RiverError) -> (StatusCode, Json<Value>) {
    (error_status(&error), Json(serde_json::json!({"error": error})))
}

fn adapter_request(method: &str, headers: &HeaderMap) -> AdapterRequest {
    AdapterRequest {
        method: method.to_string(),
        path: "/".to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<HashMap<_, _>>(),
    }
}

/// Fires cooperative cancellation when the SSE body is dropped, i.e. when
/// the live transport goes away.
struct AbortOnDrop(AbortSignal);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct SseState {
    items: Box<dyn ItemReceiver>,
    _abort: Option<AbortOnDrop>,
}

fn sse_response(
    items: Box<dyn ItemReceiver>,
    abort: Option<AbortSignal>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state = SseState {
        items,
        _abort: abort.map(AbortOnDrop),
    };
    let stream = stream::unfold(state, |mut state| async move {
        let item = state.items.next().await?;
        let json = serde_json::to_string(&item).ok()?;
        Some((Ok(Event::default().data(json)), state))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /` — start a new stream.
async fn start_handler(
    State(state): State<RiverState>,
    headers: HeaderMap,
    Json(body): Json<StartStreamRequest>,
) -> Result<impl axum::response::IntoResponse, (StatusCode, Json<Value>)> {
    let caller = state
        .caller
        .stream(&body.router_stream_key)
        .map_err(reject)?;

    let started = caller
        .start(body.input, adapter_request("POST", &headers))
        .await
        .map_err(reject)?;

    Ok(sse_response(started.items, Some(started.abort)))
}

/// `GET /?resumeKey=<token>` — replay a run from its first item.
async fn resume_handler(
    State(state): State<RiverState>,
    Query(query): Query<ResumeQuery>,
) -> Result<impl axum::response::IntoResponse, (StatusCode, Json<Value>)> {
    let encoded = query.resume_key.ok_or_else(|| {
        reject(RiverError::invalid_resumption_token(
            "Missing resumeKey parameter",
        ))
    })?;

    // Decode up front to learn which stream the token belongs to.
    let token = decode_resumption_token(&encoded).map_err(reject)?;
    let caller = state
        .caller
        .stream(&token.router_stream_key)
        .map_err(reject)?;

    let items = caller.resume(&encoded).await.map_err(reject)?;

    Ok(sse_response(items, None))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
