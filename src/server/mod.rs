//! axum adapter exposing a river router over server-sent events.
//!
//! # Endpoints
//!
//! - `POST /` — Start a stream: body `{"router_stream_key": ..., "input": ...}`
//! - `GET  /?resumeKey=<token>` — Replay a run from its resumption token

pub mod routes;

pub use routes::{river_routes, StartStreamRequest};
