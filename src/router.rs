//! Stream registry.
//!
//! A router is a finite name → definition mapping, built once at startup and
//! read-only afterwards. The name doubles as the `router_stream_key`
//! embedded in resumption tokens.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::StreamDefinition;

/// Named collection of stream definitions.
#[derive(Default)]
pub struct RiverRouter {
    streams: HashMap<String, Arc<StreamDefinition>>,
}

impl RiverRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream under `key`, builder-style.
    pub fn with_stream(mut self, key: impl Into<String>, stream: StreamDefinition) -> Self {
        self.streams.insert(key.into(), Arc::new(stream));
        self
    }

    /// Look up a definition by key.
    pub fn get(&self, key: &str) -> Option<&Arc<StreamDefinition>> {
        self.streams.get(key)
    }

    /// Whether `key` names a registered stream.
    pub fn contains(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }

    /// Registered stream keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the router is empty.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl FromIterator<(String, StreamDefinition)> for RiverRouter {
    fn from_iter<I: IntoIterator<Item = (String, StreamDefinition)>>(iter: I) -> Self {
        Self {
            streams: iter
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;
    use crate::types::{runner_fn, SerdeValidator, StreamContext};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Input {
        value: i64,
    }

    fn definition() -> StreamDefinition {
        StreamDefinition::new(
            Box::new(SerdeValidator::<Input>::new()),
            Arc::new(MemoryProvider::new()),
            runner_fn(|ctx: Arc<StreamContext>| async move {
                ctx.stream.close().await;
                Ok(())
            }),
        )
    }

    #[test]
    fn test_router_lookup() {
        let router = RiverRouter::new()
            .with_stream("double", definition())
            .with_stream("triple", definition());

        assert_eq!(router.len(), 2);
        assert!(router.contains("double"));
        assert!(router.contains("triple"));
        assert!(router.get("nonexistent").is_none());
    }

    #[test]
    fn test_generated_storage_ids_are_unique() {
        let a = definition();
        let b = definition();
        assert_ne!(a.storage_id, b.storage_id);
    }

    #[test]
    fn test_pinned_storage_id() {
        let def = definition().with_storage_id("stable-id");
        assert_eq!(def.storage_id, "stable-id");
    }
}
