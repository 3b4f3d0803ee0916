//! # River
//!
//! Durable, resumable server-to-client streams.
//!
//! A client starts a named stream with a validated input; a user-supplied
//! runner emits chunks through a dual-write helper that persists every item
//! to an append-only replay log while fanning it out live. If the transport
//! drops, a new subscriber presents the resumption token from `stream_start`
//! and replays the full ordered sequence from the log — following the run
//! live if it is still producing — without re-running the runner.
//!
//! ```ignore
//! use std::sync::Arc;
//! use river::{
//!     river_routes, runner_fn, MemoryProvider, RiverRouter, SerdeValidator,
//!     StreamDefinition,
//! };
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct ChatInput { prompt: String }
//!
//! let chat = StreamDefinition::new(
//!     Box::new(SerdeValidator::<ChatInput>::new()),
//!     Arc::new(MemoryProvider::new()),
//!     runner_fn(|ctx| async move {
//!         ctx.stream.append_chunk("hello".into()).await;
//!         ctx.stream.close().await;
//!         Ok(())
//!     }),
//! );
//!
//! let router = Arc::new(RiverRouter::new().with_stream("chat", chat));
//! let app = axum::Router::new().nest("/api/river", river_routes(router));
//! ```

pub mod backend;
pub mod callers;
pub mod errors;
pub(crate) mod harness;
pub mod provider;
pub(crate) mod resume;
pub mod router;
pub mod server;
pub mod token;
pub mod types;

pub use callers::{ServerSideCaller, StartedStream, StreamCaller};
pub use errors::{RiverError, RiverErrorKind};
pub use provider::memory::MemoryProvider;
pub use provider::redis::{RedisProvider, RedisProviderConfig};
pub use provider::{ItemReceiver, RiverProvider, StreamRequest};
pub use router::RiverRouter;
pub use server::river_routes;
pub use token::{decode_resumption_token, encode_resumption_token};
pub use types::{
    runner_fn, AbortSignal, AdapterRequest, InputValidator, ResumptionToken, SerdeValidator,
    SpecialChunk, StreamContext, StreamDefinition, StreamHelper, StreamItem, StreamRunner,
    ValidatorFn,
};

/// Library version.
pub const VERSION: &str = "0.1.0";
