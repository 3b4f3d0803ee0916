//! Replay of a persisted run from its log.
//!
//! A resumer never taps the live queue: it tails the log from the beginning
//! and therefore sees the same item prefix the original subscriber saw,
//! including the `stream_start` already persisted there. No fresh
//! `stream_start` is synthesized.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{LogKey, LogOffset, LogTail, StreamLog, TailEntry};
use crate::errors::RiverError;
use crate::provider::ItemReceiver;
use crate::types::{ResumptionToken, SpecialChunk, StreamItem};

/// Open a replay of the run named by `token`.
///
/// Fails with `STREAM_NOT_FOUND` when the log does not exist (or has
/// expired). Errors surfacing after the replay has begun are delivered
/// in-band as a terminal `stream_fatal_error` item.
pub(crate) async fn resume_from_log(
    log: Arc<dyn StreamLog>,
    token: &ResumptionToken,
) -> Result<Box<dyn ItemReceiver>, RiverError> {
    let key = LogKey::new(token.stream_storage_id.clone(), token.stream_run_id.clone());
    if !log.exists(&key).await? {
        return Err(RiverError::stream_not_found(
            "Stream not found or has expired",
        ));
    }
    let tail = log.tail(&key, LogOffset::Zero).await?;
    Ok(Box::new(ReplayItemReceiver {
        tail,
        finished: false,
    }))
}

/// Pull-based replay cursor. Stops at the backend's terminal marker or at an
/// in-band terminal item, whichever comes first.
struct ReplayItemReceiver {
    tail: Box<dyn LogTail>,
    finished: bool,
}

#[async_trait]
impl ItemReceiver for ReplayItemReceiver {
    async fn next(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        match self.tail.next().await {
            Ok(TailEntry::Item(item)) => {
                if item.is_terminal() {
                    self.finished = true;
                }
                Some(item)
            }
            Ok(TailEntry::End) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(StreamItem::special(SpecialChunk::StreamFatalError {
                    error,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
