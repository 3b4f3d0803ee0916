//! River demo chat server.
//!
//! Streams a canned chat response word by word. With `REDIS_URL` set the
//! stream is durable: disconnect mid-stream and replay it with the
//! resumption token from `stream_start`.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8000)
//! - `REDIS_URL` — Redis connection string; omit for the in-memory provider
//! - `RUST_LOG` — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! curl -N localhost:8000/api/river \
//!   -H 'Content-Type: application/json' \
//!   -d '{"router_stream_key": "chat", "input": {"prompt": "hello"}}'
//! curl -N 'localhost:8000/api/river?resumeKey=<token>'
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use river::{
    river_routes, runner_fn, MemoryProvider, RedisProvider, RedisProviderConfig, RiverProvider,
    RiverRouter, SerdeValidator, StreamContext, StreamDefinition,
};

#[derive(Serialize, Deserialize)]
struct ChatInput {
    prompt: String,
}

async fn chat_runner(ctx: Arc<StreamContext>) -> Result<(), river::RiverError> {
    let prompt = ctx.input["prompt"].as_str().unwrap_or_default().to_string();

    let response = format!(
        "You asked: '{prompt}'. Here's a simulated response: \
         River streams are durable and resumable. \
         Disconnect at any point and replay this run with its resumption token."
    );

    for (i, word) in response.split_whitespace().enumerate() {
        if ctx.abort.aborted() {
            return Ok(());
        }
        let chunk = if i == 0 {
            word.to_string()
        } else {
            format!(" {word}")
        };
        ctx.stream.append_chunk(chunk.into()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    ctx.stream.close().await;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "river-demo",
        "version": river::VERSION,
        "endpoints": {
            "start": "POST /api/river",
            "resume": "GET /api/river?resumeKey=<token>",
        },
    }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,river=debug".into()),
        )
        .init();

    let provider: Arc<dyn RiverProvider> = match std::env::var("REDIS_URL") {
        Ok(url) => {
            tracing::info!("using redis provider at {url}");
            let config = RedisProviderConfig {
                key_prefix: "chat_demo:".to_string(),
                ..RedisProviderConfig::new(url)
            };
            Arc::new(
                RedisProvider::connect(config)
                    .await
                    .expect("Failed to connect to redis"),
            )
        }
        Err(_) => {
            tracing::info!("REDIS_URL not set, using in-memory provider (not resumable)");
            Arc::new(MemoryProvider::new())
        }
    };

    let chat = StreamDefinition::new(
        Box::new(SerdeValidator::<ChatInput>::new()),
        provider,
        runner_fn(chat_runner),
    )
    .with_storage_id("chat-demo");

    let router = Arc::new(RiverRouter::new().with_stream("chat", chat));

    let app = axum::Router::new()
        .route("/health", get(health_handler))
        .nest("/api/river", river_routes(router))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let bind_addr = format!("0.0.0.0:{port}");

    tracing::info!("river demo server starting on {bind_addr}");
    tracing::info!("  GET  /health             — liveness probe");
    tracing::info!("  POST /api/river          — start a chat stream");
    tracing::info!("  GET  /api/river?resumeKey=<token> — replay a run");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server failed");
}
