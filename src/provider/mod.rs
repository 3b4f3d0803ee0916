//! Stream providers: execution plus persistence for runs.
//!
//! A provider owns a log backend and drives the runner harness. The
//! [`MemoryProvider`](memory::MemoryProvider) runs in-process and cannot be
//! resumed; the [`RedisProvider`](redis::RedisProvider) persists every item
//! to redis streams and hands out resumption tokens.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::RiverError;
use crate::types::{AbortSignal, AdapterRequest, ResumptionToken, StreamItem, StreamRunner};

/// Pull-based source of stream items, live or replayed.
///
/// Yields `None` once the sequence is exhausted. Abstracts over the live
/// queue of a running stream and the tail of a replay log.
#[async_trait]
pub trait ItemReceiver: Send {
    /// Get the next item, or `None` at end of sequence.
    async fn next(&mut self) -> Option<StreamItem>;
}

/// Everything the caller façade hands a provider to start a run.
pub struct StreamRequest {
    /// Validated input for the runner.
    pub input: Value,
    /// Boundary request metadata.
    pub adapter_request: AdapterRequest,
    /// Cancellation signal shared with the adapter.
    pub abort: AbortSignal,
}

/// Provider contract for starting and resuming streams.
#[async_trait]
pub trait RiverProvider: Send + Sync {
    /// Stable identifier embedded in resumption tokens.
    fn provider_id(&self) -> &str;

    /// Whether runs can be resumed from this provider's log.
    fn is_resumable(&self) -> bool;

    /// Start a new run of `runner` under `storage_id`.
    ///
    /// `router_stream_key` is threaded into the resumption token so the
    /// resume endpoint can dispatch without an out-of-band name hint.
    async fn start_stream(
        &self,
        storage_id: &str,
        router_stream_key: &str,
        runner: Arc<dyn StreamRunner>,
        request: StreamRequest,
    ) -> Result<Box<dyn ItemReceiver>, RiverError>;

    /// Replay a persisted run from the beginning of its log.
    async fn resume_stream(
        &self,
        token: &ResumptionToken,
    ) -> Result<Box<dyn ItemReceiver>, RiverError>;
}
