//! Append-only log backend contract.
//!
//! One run's items live in one immutable log named by
//! [`LogKey`]`(storage_id, run_id)`. The contract is deliberately minimal so
//! it can be satisfied by a redis-streams engine, a local file log, or an
//! in-memory ring: ordered appends, a terminal sentinel, existence checks,
//! and a blocking tail read.

use std::fmt;

use async_trait::async_trait;

use crate::errors::RiverError;
use crate::types::StreamItem;

/// Key naming one run's log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    /// Stable id of the stream definition.
    pub storage_id: String,
    /// Id of the run.
    pub run_id: String,
}

impl LogKey {
    /// Build a key from its parts.
    pub fn new(storage_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage_id, self.run_id)
    }
}

/// Opaque position in a log. `Zero` means the beginning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogOffset {
    /// Start from the first entry.
    #[default]
    Zero,
    /// Start from the first entry past the given backend-native position.
    After(String),
}

/// One step of a tail read.
#[derive(Debug, Clone, PartialEq)]
pub enum TailEntry {
    /// The next item, in append order.
    Item(StreamItem),
    /// The terminal marker was observed; no further entries follow.
    End,
}

/// Blocking cursor over a single run's log.
///
/// `next` blocks briefly while the log has no new entries and yields items
/// in append order until the terminal marker. Backend read timeouts are not
/// errors; implementations loop on them internally.
#[async_trait]
pub trait LogTail: Send {
    /// Advance to the next entry.
    async fn next(&mut self) -> Result<TailEntry, RiverError>;
}

/// Append-only ordered log, shared process-wide across concurrent runs.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Durably append one item. Returns once the item is ordered in the log.
    async fn append(&self, key: &LogKey, item: &StreamItem) -> Result<(), RiverError>;

    /// Write the terminal marker. One marker per run.
    async fn mark_end(&self, key: &LogKey) -> Result<(), RiverError>;

    /// Whether the log exists (it may have expired per backend retention).
    async fn exists(&self, key: &LogKey) -> Result<bool, RiverError>;

    /// Open a tail cursor starting past `from`.
    async fn tail(&self, key: &LogKey, from: LogOffset) -> Result<Box<dyn LogTail>, RiverError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
