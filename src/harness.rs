//! Runner harness: lifecycle markers, chunk counting, error containment,
//! and cooperative cancellation around a user runner.
//!
//! The harness owns the live queue of a run. The dual-write helper (the
//! producer, called from the runner task) appends each emission to the log
//! *before* publishing it live, so a live subscriber can never observe an
//! item that is not yet durable. The receiver (the consumer, drained by the
//! adapter) watches the cancellation signal and injects the live-only
//! `aborted` marker when it fires.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{LogKey, StreamLog};
use crate::errors::RiverError;
use crate::provider::{ItemReceiver, StreamRequest};
use crate::token::encode_resumption_token;
use crate::types::{
    AbortSignal, ResumptionToken, SpecialChunk, StreamContext, StreamHelper, StreamItem,
    StreamRunner,
};

/// Live-queue depth. The helper suspends here when the subscriber lags.
const LIVE_QUEUE_CAPACITY: usize = 64;

/// Message on the live queue. `Close` marks that no further items follow.
pub(crate) enum LiveEvent {
    Item(StreamItem),
    Close,
}

// Helper lifecycle. Leaving `Open` makes later emissions no-ops.
const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;
const STATE_FATAL: u8 = 2;

// ---------------------------------------------------------------------------
// Harness configuration + entry point
// ---------------------------------------------------------------------------

/// Per-provider wiring shared by every run the provider starts.
pub(crate) struct HarnessConfig {
    pub provider_id: String,
    pub resumable: bool,
    pub log: Arc<dyn StreamLog>,
    /// Process-wide count of swallowed log-append failures.
    pub failed_appends: Arc<AtomicU64>,
}

/// Start one run: generate the run id, emit `stream_start`, spawn the runner
/// task, and return the live receiver for the harness-side drain.
pub(crate) async fn start_run(
    config: &HarnessConfig,
    storage_id: &str,
    router_stream_key: &str,
    runner: Arc<dyn StreamRunner>,
    request: StreamRequest,
) -> Result<Box<dyn ItemReceiver>, RiverError> {
    let run_id = Uuid::new_v4().to_string();
    let key = LogKey::new(storage_id, run_id.clone());
    let started = Instant::now();
    let (tx, rx) = mpsc::channel(LIVE_QUEUE_CAPACITY);

    let encoded_resumption_token = if config.resumable {
        let token = ResumptionToken {
            provider_id: config.provider_id.clone(),
            router_stream_key: router_stream_key.to_string(),
            stream_storage_id: storage_id.to_string(),
            stream_run_id: run_id.clone(),
        };
        Some(encode_resumption_token(&token))
    } else {
        None
    };

    let helper = Arc::new(DualWriteHelper {
        log: config.log.clone(),
        key: key.clone(),
        tx: tx.clone(),
        state: AtomicU8::new(STATE_OPEN),
        chunk_count: AtomicU64::new(0),
        failed_appends: config.failed_appends.clone(),
    });

    // `stream_start` is durable before it is live, like every other item.
    let start_item = StreamItem::special(SpecialChunk::StreamStart {
        stream_run_id: run_id,
        encoded_resumption_token,
    });
    helper.append_best_effort(&start_item).await;
    let _ = tx.send(LiveEvent::Item(start_item)).await;

    let abort = request.abort.clone();
    let ctx = Arc::new(StreamContext {
        input: request.input,
        stream: helper.clone() as Arc<dyn StreamHelper>,
        adapter_request: request.adapter_request,
        abort: request.abort,
    });

    let log = config.log.clone();
    tokio::spawn(async move {
        match runner.run(ctx).await {
            Ok(()) => {
                // A fatal close already wrote its own terminal item + marker.
                if helper.state() != STATE_FATAL {
                    let end_item = StreamItem::special(SpecialChunk::StreamEnd {
                        total_chunks: helper.chunk_count(),
                        total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                    helper.append_best_effort(&end_item).await;
                    let _ = tx.send(LiveEvent::Item(end_item)).await;
                    if let Err(e) = log.mark_end(&key).await {
                        log::warn!("failed to write end marker for {key}: {e}");
                    }
                }
            }
            Err(e) => {
                if helper.state() != STATE_FATAL {
                    let fatal_item = StreamItem::special(SpecialChunk::StreamFatalError {
                        error: RiverError::runner_error(e.to_string()),
                    });
                    helper.append_best_effort(&fatal_item).await;
                    let _ = tx.send(LiveEvent::Item(fatal_item)).await;
                    if let Err(e) = log.mark_end(&key).await {
                        log::warn!("failed to write end marker for {key}: {e}");
                    }
                }
            }
        }
        let _ = tx.send(LiveEvent::Close).await;
    });

    Ok(Box::new(LiveItemReceiver {
        rx,
        abort,
        finished: false,
    }))
}

// ---------------------------------------------------------------------------
// Dual-write helper
// ---------------------------------------------------------------------------

/// The [`StreamHelper`] handed to runners. Sole producer of the live queue.
pub(crate) struct DualWriteHelper {
    log: Arc<dyn StreamLog>,
    key: LogKey,
    tx: mpsc::Sender<LiveEvent>,
    state: AtomicU8,
    chunk_count: AtomicU64,
    failed_appends: Arc<AtomicU64>,
}

impl DualWriteHelper {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Relaxed)
    }

    /// Append to the log, swallowing failures so a transient backend hiccup
    /// does not tear down the live subscriber.
    async fn append_best_effort(&self, item: &StreamItem) {
        if let Err(e) = self.log.append(&self.key, item).await {
            self.failed_appends.fetch_add(1, Ordering::Relaxed);
            log::warn!("failed to append to log {}: {e}", self.key);
        }
    }
}

#[async_trait]
impl StreamHelper for DualWriteHelper {
    async fn append_chunk(&self, chunk: Value) {
        if self.state() != STATE_OPEN {
            return;
        }
        let item = StreamItem::chunk(chunk);
        self.append_best_effort(&item).await;
        self.chunk_count.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(LiveEvent::Item(item)).await;
    }

    async fn append_error(&self, error: RiverError) {
        if self.state() != STATE_OPEN {
            return;
        }
        let item = StreamItem::special(SpecialChunk::StreamError { error });
        self.append_best_effort(&item).await;
        let _ = self.tx.send(LiveEvent::Item(item)).await;
    }

    async fn send_fatal_error_and_close(&self, error: RiverError) {
        if self.state.swap(STATE_FATAL, Ordering::AcqRel) != STATE_OPEN {
            return;
        }
        let item = StreamItem::special(SpecialChunk::StreamFatalError { error });
        self.append_best_effort(&item).await;
        let _ = self.tx.send(LiveEvent::Item(item)).await;
        if let Err(e) = self.log.mark_end(&self.key).await {
            log::warn!("failed to write end marker for {}: {e}", self.key);
        }
        let _ = self.tx.send(LiveEvent::Close).await;
    }

    async fn close(&self) {
        let _ = self.state.compare_exchange(
            STATE_OPEN,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

// ---------------------------------------------------------------------------
// Live receiver
// ---------------------------------------------------------------------------

/// Consumer side of the live queue. Sole consumer for the run.
struct LiveItemReceiver {
    rx: mpsc::Receiver<LiveEvent>,
    abort: AbortSignal,
    finished: bool,
}

#[async_trait]
impl ItemReceiver for LiveItemReceiver {
    async fn next(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        tokio::select! {
            biased;
            () = self.abort.cancelled() => {
                self.finished = true;
                Some(StreamItem::Aborted)
            }
            event = self.rx.recv() => match event {
                Some(LiveEvent::Item(item)) => Some(item),
                Some(LiveEvent::Close) | None => {
                    self.finished = true;
                    None
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
