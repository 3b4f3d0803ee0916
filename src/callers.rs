//! Server-side entry points for starting and resuming streams.
//!
//! The caller façade sits between the wire adapter and the providers: it
//! resolves the stream name, validates input, wires up the cancellation
//! signal, and threads the router key into resumption tokens.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::RiverError;
use crate::provider::{ItemReceiver, StreamRequest};
use crate::router::RiverRouter;
use crate::token::decode_resumption_token;
use crate::types::{AbortSignal, AdapterRequest, StreamDefinition};

/// A started run: the live item sequence plus the handle the adapter fires
/// when the transport drops.
pub struct StartedStream {
    /// Live item sequence, `stream_start` first.
    pub items: Box<dyn ItemReceiver>,
    /// Fires cooperative cancellation of the run.
    pub abort: AbortSignal,
}

/// Entry points for one named stream.
pub struct StreamCaller {
    key: String,
    definition: Arc<StreamDefinition>,
}

impl StreamCaller {
    /// Start a new run.
    ///
    /// Validates `input` against the stream's validator (`VALIDATION` error
    /// on failure, raised before any item is produced), then invokes the
    /// provider.
    pub async fn start(
        &self,
        input: Value,
        adapter_request: AdapterRequest,
    ) -> Result<StartedStream, RiverError> {
        let validated = self.definition.input_validator.validate(&input)?;

        let abort = AbortSignal::new();
        let request = StreamRequest {
            input: validated,
            adapter_request,
            abort: abort.clone(),
        };

        let items = self
            .definition
            .provider
            .start_stream(
                &self.definition.storage_id,
                &self.key,
                self.definition.runner.clone(),
                request,
            )
            .await?;

        Ok(StartedStream { items, abort })
    }

    /// Resume a run from its encoded token.
    pub async fn resume(&self, encoded_token: &str) -> Result<Box<dyn ItemReceiver>, RiverError> {
        let token = decode_resumption_token(encoded_token)?;
        self.definition.provider.resume_stream(&token).await
    }
}

/// Server-side caller with access to every stream in a router.
pub struct ServerSideCaller {
    router: Arc<RiverRouter>,
}

impl ServerSideCaller {
    /// Wrap a router.
    pub fn new(router: Arc<RiverRouter>) -> Self {
        Self { router }
    }

    /// Get the caller for a named stream.
    pub fn stream(&self, key: &str) -> Result<StreamCaller, RiverError> {
        let definition = self.router.get(key).ok_or_else(|| {
            RiverError::stream_not_found(format!("Stream '{key}' not found in router"))
        })?;
        Ok(StreamCaller {
            key: key.to_string(),
            definition: definition.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RiverErrorKind;
    use crate::provider::memory::MemoryProvider;
    use crate::types::{
        runner_fn, SerdeValidator, SpecialChunk, StreamContext, StreamItem, StreamRunner,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct TestInput {
        value: i64,
    }

    fn caller_for(runner: Arc<dyn StreamRunner>) -> ServerSideCaller {
        let definition = StreamDefinition::new(
            Box::new(SerdeValidator::<TestInput>::new()),
            Arc::new(MemoryProvider::new()),
            runner,
        );
        ServerSideCaller::new(Arc::new(RiverRouter::new().with_stream("test", definition)))
    }

    async fn drain(mut items: Box<dyn ItemReceiver>) -> Vec<StreamItem> {
        let mut collected = Vec::new();
        while let Some(item) = items.next().await {
            collected.push(item);
        }
        collected
    }

    fn chunks_of(items: &[StreamItem]) -> Vec<Value> {
        items
            .iter()
            .filter_map(|i| match i {
                StreamItem::Chunk { chunk } => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_doubles_input() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            let value = ctx.input["value"].as_i64().unwrap();
            ctx.stream.append_chunk(json!(value * 2)).await;
            ctx.stream.close().await;
            Ok(())
        }));

        let started = caller
            .stream("test")
            .unwrap()
            .start(json!({"value": 5}), AdapterRequest::default())
            .await
            .unwrap();
        let items = drain(started.items).await;

        assert_eq!(chunks_of(&items), vec![json!(10)]);
    }

    #[tokio::test]
    async fn test_validation_error_is_synchronous() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            ctx.stream.close().await;
            Ok(())
        }));

        let err = match caller
            .stream("test")
            .unwrap()
            .start(json!({"value": "not_an_int"}), AdapterRequest::default())
            .await
        {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };

        assert_eq!(err.kind, RiverErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_stream_key() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            ctx.stream.close().await;
            Ok(())
        }));

        let err = match caller.stream("nonexistent") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert_eq!(err.kind, RiverErrorKind::StreamNotFound);
    }

    #[tokio::test]
    async fn test_recoverable_error_interleaves_and_stream_continues() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            ctx.stream.append_chunk(json!("before")).await;
            ctx.stream
                .append_error(RiverError::runner_error("Test"))
                .await;
            ctx.stream.append_chunk(json!("after")).await;
            ctx.stream.close().await;
            Ok(())
        }));

        let started = caller
            .stream("test")
            .unwrap()
            .start(json!({"value": 1}), AdapterRequest::default())
            .await
            .unwrap();
        let items = drain(started.items).await;

        assert_eq!(chunks_of(&items), vec![json!("before"), json!("after")]);

        let error_positions: Vec<_> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                StreamItem::Special {
                    special: SpecialChunk::StreamError { .. },
                } => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(error_positions.len(), 1);
        // Sits between the two chunks: start, before, error, after, end.
        assert_eq!(error_positions[0], 2);

        match items.last().unwrap() {
            StreamItem::Special {
                special: SpecialChunk::StreamEnd { total_chunks, .. },
            } => assert_eq!(*total_chunks, 2),
            other => panic!("expected stream_end, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_stream_preserves_order() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            for i in 0..100 {
                ctx.stream.append_chunk(json!(i)).await;
            }
            ctx.stream.close().await;
            Ok(())
        }));

        let started = caller
            .stream("test")
            .unwrap()
            .start(json!({"value": 0}), AdapterRequest::default())
            .await
            .unwrap();
        let items = drain(started.items).await;

        let expected: Vec<Value> = (0..100).map(|i| json!(i)).collect();
        assert_eq!(chunks_of(&items), expected);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let caller = Arc::new(caller_for(runner_fn(
            |ctx: Arc<StreamContext>| async move {
                let value = ctx.input["value"].as_i64().unwrap();
                for i in 0..10 {
                    ctx.stream.append_chunk(json!(value * 100 + i)).await;
                    tokio::task::yield_now().await;
                }
                ctx.stream.close().await;
                Ok(())
            },
        )));

        let run = |value: i64| {
            let caller = caller.clone();
            async move {
                let started = caller
                    .stream("test")
                    .unwrap()
                    .start(json!({"value": value}), AdapterRequest::default())
                    .await
                    .unwrap();
                chunks_of(&drain(started.items).await)
            }
        };

        let (a, b, c) = tokio::join!(run(1), run(2), run(3));

        for (value, chunks) in [(1, a), (2, b), (3, c)] {
            let expected: Vec<Value> = (0..10).map(|i| json!(value * 100 + i)).collect();
            assert_eq!(chunks, expected);
        }
    }

    #[tokio::test]
    async fn test_resume_rejects_malformed_token() {
        let caller = caller_for(runner_fn(|ctx: Arc<StreamContext>| async move {
            ctx.stream.close().await;
            Ok(())
        }));

        let err = match caller.stream("test").unwrap().resume("not-a-token").await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert_eq!(err.kind, RiverErrorKind::InvalidResumptionToken);
    }
}
