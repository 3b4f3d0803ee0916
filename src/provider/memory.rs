//! In-memory, non-resumable provider.
//!
//! Runs execute entirely in-process: the log is a no-op, so nothing is
//! persisted and `stream_start` carries no resumption token. Useful for
//! tests and for streams that have no durability requirement.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{LogKey, LogOffset, LogTail, StreamLog};
use crate::errors::RiverError;
use crate::harness::{start_run, HarnessConfig};
use crate::provider::{ItemReceiver, RiverProvider, StreamRequest};
use crate::types::{ResumptionToken, StreamRunner};

/// No-op log: appends vanish, tails are unsupported.
struct MemoryLog;

#[async_trait]
impl StreamLog for MemoryLog {
    async fn append(&self, _key: &LogKey, _item: &crate::types::StreamItem) -> Result<(), RiverError> {
        Ok(())
    }

    async fn mark_end(&self, _key: &LogKey) -> Result<(), RiverError> {
        Ok(())
    }

    async fn exists(&self, _key: &LogKey) -> Result<bool, RiverError> {
        Err(RiverError::provider(
            "Memory provider does not support resumption",
        ))
    }

    async fn tail(&self, _key: &LogKey, _from: LogOffset) -> Result<Box<dyn LogTail>, RiverError> {
        Err(RiverError::provider(
            "Memory provider does not support resumption",
        ))
    }
}

/// Non-resumable in-memory provider.
pub struct MemoryProvider {
    config: HarnessConfig,
}

impl MemoryProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self {
            config: HarnessConfig {
                provider_id: "memory".to_string(),
                resumable: false,
                log: Arc::new(MemoryLog),
                failed_appends: Arc::new(AtomicU64::new(0)),
            },
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RiverProvider for MemoryProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    fn is_resumable(&self) -> bool {
        false
    }

    async fn start_stream(
        &self,
        storage_id: &str,
        router_stream_key: &str,
        runner: Arc<dyn StreamRunner>,
        request: StreamRequest,
    ) -> Result<Box<dyn ItemReceiver>, RiverError> {
        start_run(&self.config, storage_id, router_stream_key, runner, request).await
    }

    async fn resume_stream(
        &self,
        _token: &ResumptionToken,
    ) -> Result<Box<dyn ItemReceiver>, RiverError> {
        Err(RiverError::provider(
            "Memory provider does not support resumption",
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RiverErrorKind;
    use crate::types::{runner_fn, AbortSignal, AdapterRequest, SpecialChunk, StreamContext, StreamItem};
    use serde_json::json;

    fn request() -> StreamRequest {
        StreamRequest {
            input: json!({"value": 5}),
            adapter_request: AdapterRequest::default(),
            abort: AbortSignal::new(),
        }
    }

    async fn drain(mut items: Box<dyn ItemReceiver>) -> Vec<StreamItem> {
        let mut collected = Vec::new();
        while let Some(item) = items.next().await {
            collected.push(item);
        }
        collected
    }

    #[tokio::test]
    async fn test_basic_stream_sequence() {
        let provider = MemoryProvider::new();
        let runner = runner_fn(|ctx: Arc<StreamContext>| async move {
            let value = ctx.input["value"].as_i64().unwrap();
            ctx.stream.append_chunk(json!(value * 2)).await;
            ctx.stream.close().await;
            Ok(())
        });

        let items = provider
            .start_stream("storage", "test", runner, request())
            .await
            .unwrap();
        let live = drain(items).await;

        assert_eq!(live.len(), 3);
        match &live[0] {
            StreamItem::Special {
                special:
                    SpecialChunk::StreamStart {
                        encoded_resumption_token,
                        ..
                    },
            } => assert!(encoded_resumption_token.is_none()),
            other => panic!("expected stream_start, got {other:?}"),
        }
        assert_eq!(live[1], StreamItem::chunk(json!(10)));
        match &live[2] {
            StreamItem::Special {
                special:
                    SpecialChunk::StreamEnd {
                        total_chunks,
                        total_time_ms,
                    },
            } => {
                assert_eq!(*total_chunks, 1);
                assert!(*total_time_ms >= 0.0);
            }
            other => panic!("expected stream_end, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_is_unsupported() {
        let provider = MemoryProvider::new();
        let token = ResumptionToken {
            provider_id: "memory".into(),
            router_stream_key: "k".into(),
            stream_storage_id: "s".into(),
            stream_run_id: "r".into(),
        };

        let err = match provider.resume_stream(&token).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert_eq!(err.kind, RiverErrorKind::Provider);
    }
}
