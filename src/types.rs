//! Core types for river streams.
//!
//! The item model is a closed sum: user [`chunk`](StreamItem::Chunk) payloads,
//! lifecycle/error [`special`](StreamItem::Special) chunks, and the live-only
//! [`aborted`](StreamItem::Aborted) marker. Every item serializes to a single
//! JSON object with a `type` discriminator; the same encoding is used on the
//! wire and in the replay log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::errors::RiverError;
use crate::provider::RiverProvider;

// ---------------------------------------------------------------------------
// Stream items
// ---------------------------------------------------------------------------

/// Lifecycle and error markers interleaved with user chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpecialChunk {
    /// First item of every run on the live path.
    StreamStart {
        /// Identifier of this run.
        stream_run_id: String,
        /// Present iff the provider is resumable.
        #[serde(skip_serializing_if = "Option::is_none")]
        encoded_resumption_token: Option<String>,
    },
    /// Terminal marker of a clean run.
    StreamEnd {
        /// Number of `chunk` items emitted by the run.
        total_chunks: u64,
        /// Wall-clock duration of the run in milliseconds.
        total_time_ms: f64,
    },
    /// A recoverable error; the stream continues.
    StreamError {
        /// The error payload.
        error: RiverError,
    },
    /// A terminal error; no further items follow on this run.
    StreamFatalError {
        /// The error payload.
        error: RiverError,
    },
}

/// One item of a run's sequence, live or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamItem {
    /// A user-domain payload produced by the runner.
    Chunk {
        /// The payload.
        chunk: Value,
    },
    /// A lifecycle or error marker.
    Special {
        /// The marker.
        special: SpecialChunk,
    },
    /// The subscriber's cancellation fired. Live path only, never persisted.
    Aborted,
}

impl StreamItem {
    /// Wrap a payload as a chunk item.
    pub fn chunk(payload: impl Into<Value>) -> Self {
        Self::Chunk {
            chunk: payload.into(),
        }
    }

    /// Wrap a special chunk.
    pub fn special(special: SpecialChunk) -> Self {
        Self::Special { special }
    }

    /// True for `stream_end` and `stream_fatal_error` items.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Special {
                special: SpecialChunk::StreamEnd { .. } | SpecialChunk::StreamFatalError { .. }
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Resumption token
// ---------------------------------------------------------------------------

/// Routing metadata identifying one run's replay log.
///
/// All four fields are required and must round-trip bit-identically through
/// the encoded form (see [`crate::token`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumptionToken {
    /// Identifier of the provider that persisted the run.
    pub provider_id: String,
    /// Router key of the stream definition, for dispatch on resume.
    pub router_stream_key: String,
    /// Storage id of the stream definition.
    pub stream_storage_id: String,
    /// Identifier of the run.
    pub stream_run_id: String,
}

// ---------------------------------------------------------------------------
// Abort signal
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal shared between the adapter, the harness,
/// and the runner.
///
/// The runner is expected to observe [`aborted`](Self::aborted) at its
/// suspension points; the harness awaits [`cancelled`](Self::cancelled) while
/// draining the live queue.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    /// Create a fresh, un-fired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the signal has fired.
    pub fn aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        loop {
            if self.aborted() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check to close the store/notify race.
            if self.aborted() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Stream helper
// ---------------------------------------------------------------------------

/// The handle a runner uses to emit items.
///
/// Implementations perform the dual write: every emission is appended to the
/// replay log before it is published to the live queue. Log-append failures
/// are logged and swallowed so a backend hiccup does not tear down the live
/// subscriber.
#[async_trait]
pub trait StreamHelper: Send + Sync {
    /// Emit a user chunk.
    async fn append_chunk(&self, chunk: Value);

    /// Emit a recoverable error. The stream continues.
    async fn append_error(&self, error: RiverError);

    /// Emit a terminal error and close the stream. Later emissions from the
    /// runner are discarded.
    async fn send_fatal_error_and_close(&self, error: RiverError);

    /// Signal clean termination. The harness synthesizes `stream_end` when
    /// the runner returns.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Adapter request
// ---------------------------------------------------------------------------

/// Boundary metadata the adapter extracts from the incoming request and
/// makes visible to the runner.
#[derive(Debug, Clone, Default)]
pub struct AdapterRequest {
    /// HTTP method of the originating request.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers, lower-cased names.
    pub headers: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Stream context
// ---------------------------------------------------------------------------

/// Everything a runner can see: the validated input, its stream handle, the
/// adapter request, and the cancellation signal.
pub struct StreamContext {
    /// Validated input value.
    pub input: Value,
    /// Handle for emitting items.
    pub stream: Arc<dyn StreamHelper>,
    /// Boundary request metadata.
    pub adapter_request: AdapterRequest,
    /// Cooperative cancellation signal.
    pub abort: AbortSignal,
}

// ---------------------------------------------------------------------------
// Stream runner
// ---------------------------------------------------------------------------

/// User-supplied stream logic.
///
/// A runner reads `ctx.input`, emits items through `ctx.stream`, and returns
/// `Ok(())` for a clean run. A returned error is contained by the harness and
/// delivered in-band as `stream_fatal_error`.
#[async_trait]
pub trait StreamRunner: Send + Sync {
    /// Execute one run.
    async fn run(&self, ctx: Arc<StreamContext>) -> Result<(), RiverError>;
}

/// Adapter turning an async closure into a [`StreamRunner`].
pub struct RunnerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StreamRunner for RunnerFn<F>
where
    F: Fn(Arc<StreamContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), RiverError>> + Send,
{
    async fn run(&self, ctx: Arc<StreamContext>) -> Result<(), RiverError> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as a shared [`StreamRunner`].
pub fn runner_fn<F, Fut>(f: F) -> Arc<dyn StreamRunner>
where
    F: Fn(Arc<StreamContext>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), RiverError>> + Send + 'static,
{
    Arc::new(RunnerFn { f })
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Capability that validates raw input into the value handed to the runner.
pub trait InputValidator: Send + Sync {
    /// Validate the raw input, returning the validated value or a
    /// `VALIDATION` error.
    fn validate(&self, input: &Value) -> Result<Value, RiverError>;
}

/// Struct-backed validator: the input must deserialize into `T`.
///
/// The validated value is the serialization of the typed struct, so defaults
/// declared via serde are filled in.
pub struct SerdeValidator<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> SerdeValidator<T> {
    /// Create a validator for `T`.
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for SerdeValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InputValidator for SerdeValidator<T>
where
    T: DeserializeOwned + Serialize + Send + Sync,
{
    fn validate(&self, input: &Value) -> Result<Value, RiverError> {
        let typed: T = serde_json::from_value(input.clone())
            .map_err(|e| RiverError::validation(format!("Input validation failed: {e}")))?;
        serde_json::to_value(typed)
            .map_err(|e| RiverError::validation(format!("Input validation failed: {e}")))
    }
}

/// Hand-written validator backed by a closure.
pub struct ValidatorFn {
    f: Box<dyn Fn(&Value) -> Result<Value, RiverError> + Send + Sync>,
}

impl ValidatorFn {
    /// Wrap a closure as a validator.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, RiverError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl InputValidator for ValidatorFn {
    fn validate(&self, input: &Value) -> Result<Value, RiverError> {
        (self.f)(input)
    }
}

// ---------------------------------------------------------------------------
// Stream definition
// ---------------------------------------------------------------------------

/// A named stream: validator, provider, runner, and a stable storage id that
/// groups all of its runs in the log.
pub struct StreamDefinition {
    /// Validates raw input before the runner sees it.
    pub input_validator: Box<dyn InputValidator>,
    /// Executes and persists runs.
    pub provider: Arc<dyn RiverProvider>,
    /// User stream logic.
    pub runner: Arc<dyn StreamRunner>,
    /// Stable id grouping this definition's runs in the log.
    pub storage_id: String,
}

impl StreamDefinition {
    /// Create a definition with a freshly generated storage id.
    pub fn new(
        input_validator: Box<dyn InputValidator>,
        provider: Arc<dyn RiverProvider>,
        runner: Arc<dyn StreamRunner>,
    ) -> Self {
        Self {
            input_validator,
            provider,
            runner,
            storage_id: Uuid::new_v4().to_string(),
        }
    }

    /// Pin a stable storage id, so tokens survive process restarts.
    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = storage_id.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_item_wire_form() {
        let item = StreamItem::chunk(json!(10));
        let wire = serde_json::to_value(&item).unwrap();
        assert_eq!(wire, json!({"type": "chunk", "chunk": 10}));
    }

    #[test]
    fn test_stream_start_wire_form() {
        let item = StreamItem::special(SpecialChunk::StreamStart {
            stream_run_id: "run-1".into(),
            encoded_resumption_token: None,
        });
        let wire = serde_json::to_value(&item).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "special",
                "special": {"type": "stream_start", "stream_run_id": "run-1"},
            })
        );
    }

    #[test]
    fn test_stream_start_with_token_round_trip() {
        let item = StreamItem::special(SpecialChunk::StreamStart {
            stream_run_id: "run-1".into(),
            encoded_resumption_token: Some("abc".into()),
        });
        let wire = serde_json::to_string(&item).unwrap();
        let back: StreamItem = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_stream_end_wire_form() {
        let item = StreamItem::special(SpecialChunk::StreamEnd {
            total_chunks: 3,
            total_time_ms: 12.5,
        });
        let wire = serde_json::to_value(&item).unwrap();
        assert_eq!(wire["special"]["type"], "stream_end");
        assert_eq!(wire["special"]["total_chunks"], 3);
    }

    #[test]
    fn test_aborted_wire_form() {
        let wire = serde_json::to_value(StreamItem::Aborted).unwrap();
        assert_eq!(wire, json!({"type": "aborted"}));
    }

    #[test]
    fn test_is_terminal() {
        assert!(StreamItem::special(SpecialChunk::StreamEnd {
            total_chunks: 0,
            total_time_ms: 0.0,
        })
        .is_terminal());
        assert!(StreamItem::special(SpecialChunk::StreamFatalError {
            error: RiverError::unknown("x"),
        })
        .is_terminal());
        assert!(!StreamItem::chunk(json!("x")).is_terminal());
        assert!(!StreamItem::Aborted.is_terminal());
    }

    #[test]
    fn test_serde_validator_accepts_and_normalizes() {
        #[derive(Serialize, Deserialize)]
        struct Input {
            value: i64,
            #[serde(default)]
            label: String,
        }

        let validator = SerdeValidator::<Input>::new();
        let validated = validator.validate(&json!({"value": 5})).unwrap();
        assert_eq!(validated, json!({"value": 5, "label": ""}));
    }

    #[test]
    fn test_serde_validator_rejects() {
        #[derive(Serialize, Deserialize)]
        struct Input {
            value: i64,
        }

        let validator = SerdeValidator::<Input>::new();
        let err = validator
            .validate(&json!({"value": "not_an_int"}))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::RiverErrorKind::Validation);
    }

    #[test]
    fn test_validator_fn() {
        let validator = ValidatorFn::new(|input| {
            if input.get("value").map(Value::is_i64) == Some(true) {
                Ok(input.clone())
            } else {
                Err(RiverError::validation("value must be an integer"))
            }
        });

        assert!(validator.validate(&json!({"value": 5})).is_ok());
        assert!(validator.validate(&json!({"value": "five"})).is_err());
    }

    #[tokio::test]
    async fn test_abort_signal_wakes_waiters() {
        let signal = AbortSignal::new();
        assert!(!signal.aborted());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        signal.abort();
        assert!(signal.aborted());
        assert!(handle.await.unwrap());

        // Already-fired signals resolve immediately.
        signal.cancelled().await;
    }
}
