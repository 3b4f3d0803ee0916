//! Error types for river streams.
//!
//! Every failure that can cross the wire is a [`RiverError`]: a kind, a
//! human-readable message, and an open details map. The serialized form is
//! stable so errors can be written to the replay log and re-read by a later
//! subscriber.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Classification of a [`RiverError`].
///
/// Serialized in screaming-snake form (`"STREAM_NOT_FOUND"`) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiverErrorKind {
    /// Fallback for faults with no better classification.
    Unknown,
    /// Input failed schema validation.
    Validation,
    /// The storage backend misbehaved.
    Provider,
    /// No stream with that name, or the replay log is gone.
    StreamNotFound,
    /// The resumption token could not be decoded.
    InvalidResumptionToken,
    /// An unhandled fault escaped the user runner.
    RunnerError,
    /// Transport-level failure (surfaced by adapters, not the engine).
    Network,
}

impl RiverErrorKind {
    /// Wire representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Validation => "VALIDATION",
            Self::Provider => "PROVIDER",
            Self::StreamNotFound => "STREAM_NOT_FOUND",
            Self::InvalidResumptionToken => "INVALID_RESUMPTION_TOKEN",
            Self::RunnerError => "RUNNER_ERROR",
            Self::Network => "NETWORK",
        }
    }
}

impl fmt::Display for RiverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serializable stream error.
///
/// Recoverable errors travel as `stream_error` items and leave the run
/// alive; fatal ones travel as `stream_fatal_error` and terminate it.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct RiverError {
    /// Error classification.
    #[serde(rename = "error_type")]
    pub kind: RiverErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Arbitrary structured context.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl RiverError {
    /// Create an error with an explicit kind.
    pub fn new(kind: RiverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Shorthand for [`RiverErrorKind::Unknown`].
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::Unknown, message)
    }

    /// Shorthand for [`RiverErrorKind::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::Validation, message)
    }

    /// Shorthand for [`RiverErrorKind::Provider`].
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::Provider, message)
    }

    /// Shorthand for [`RiverErrorKind::StreamNotFound`].
    pub fn stream_not_found(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::StreamNotFound, message)
    }

    /// Shorthand for [`RiverErrorKind::InvalidResumptionToken`].
    pub fn invalid_resumption_token(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::InvalidResumptionToken, message)
    }

    /// Shorthand for [`RiverErrorKind::RunnerError`].
    pub fn runner_error(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::RunnerError, message)
    }

    /// Shorthand for [`RiverErrorKind::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RiverErrorKind::Network, message)
    }

    /// Attach one detail entry, builder-style.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
