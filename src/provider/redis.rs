//! Redis-streams-backed resumable provider.
//!
//! Every item of a run is appended as one stream entry under
//! `<prefix><storage_id>:<run_id>` with a single `data` field holding the
//! encoded item; a sentinel entry with `end=true` terminates the log. Tails
//! use blocking `XREAD` with a short block duration so a resumer follows a
//! still-running stream without polling hot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::backend::{LogKey, LogOffset, LogTail, StreamLog, TailEntry};
use crate::errors::RiverError;
use crate::harness::{start_run, HarnessConfig};
use crate::provider::{ItemReceiver, RiverProvider, StreamRequest};
use crate::resume::resume_from_log;
use crate::types::{ResumptionToken, StreamItem, StreamRunner};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the redis provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisProviderConfig {
    /// Connection string, e.g. `redis://localhost:6379`.
    pub url: String,
    /// Prefix for stream keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Block duration of one `XREAD`, in milliseconds.
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: usize,
    /// Maximum entries fetched per `XREAD`.
    #[serde(default = "default_read_count_cap")]
    pub read_count_cap: usize,
    /// Maximum blocking reads per tail before the resumer gives up.
    #[serde(default = "default_resume_iteration_cap")]
    pub resume_iteration_cap: u32,
}

fn default_key_prefix() -> String {
    "river:stream:".to_string()
}

fn default_block_duration_ms() -> usize {
    10
}

fn default_read_count_cap() -> usize {
    10
}

fn default_resume_iteration_cap() -> u32 {
    1000
}

impl RedisProviderConfig {
    /// Config with defaults for everything but the connection string.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            block_duration_ms: default_block_duration_ms(),
            read_count_cap: default_read_count_cap(),
            resume_iteration_cap: default_resume_iteration_cap(),
        }
    }
}

// ---------------------------------------------------------------------------
// Log implementation
// ---------------------------------------------------------------------------

/// Envelope for one log entry's `data` field.
#[derive(Serialize, Deserialize)]
struct LogRecord {
    item: StreamItem,
}

fn stream_key(prefix: &str, key: &LogKey) -> String {
    format!("{prefix}{key}")
}

/// Redis-streams [`StreamLog`]. The connection manager is shared
/// process-wide and safe for concurrent runs; tails open their own
/// connection so a blocking read never stalls appends.
struct RedisLog {
    client: redis::Client,
    conn: ConnectionManager,
    config: RedisProviderConfig,
}

fn provider_err(context: &str, e: redis::RedisError) -> RiverError {
    RiverError::provider(format!("{context}: {e}"))
}

#[async_trait]
impl StreamLog for RedisLog {
    async fn append(&self, key: &LogKey, item: &StreamItem) -> Result<(), RiverError> {
        // A struct with one serializable field cannot fail to serialize.
        let payload = serde_json::to_string(&LogRecord { item: item.clone() })
            .expect("log record serialization");
        let mut conn = self.conn.clone();
        let _: () = conn
            .xadd(
                stream_key(&self.config.key_prefix, key),
                "*",
                &[("data", payload)],
            )
            .await
            .map_err(|e| provider_err("Redis append failed", e))?;
        Ok(())
    }

    async fn mark_end(&self, key: &LogKey) -> Result<(), RiverError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .xadd(
                stream_key(&self.config.key_prefix, key),
                "*",
                &[("end", "true")],
            )
            .await
            .map_err(|e| provider_err("Redis end marker failed", e))?;
        Ok(())
    }

    async fn exists(&self, key: &LogKey) -> Result<bool, RiverError> {
        let mut conn = self.conn.clone();
        conn.exists(stream_key(&self.config.key_prefix, key))
            .await
            .map_err(|e| provider_err("Redis exists failed", e))
    }

    async fn tail(&self, key: &LogKey, from: LogOffset) -> Result<Box<dyn LogTail>, RiverError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| provider_err("Redis connection failed", e))?;
        let last_id = match from {
            LogOffset::Zero => "0-0".to_string(),
            LogOffset::After(id) => id,
        };
        Ok(Box::new(RedisTail {
            conn,
            stream_key: stream_key(&self.config.key_prefix, key),
            last_id,
            block_duration_ms: self.config.block_duration_ms,
            read_count_cap: self.config.read_count_cap,
            iteration_cap: self.config.resume_iteration_cap,
            iterations: 0,
            buffer: VecDeque::new(),
        }))
    }
}

/// Blocking cursor over one redis stream.
struct RedisTail {
    conn: redis::aio::Connection,
    stream_key: String,
    last_id: String,
    block_duration_ms: usize,
    read_count_cap: usize,
    iteration_cap: u32,
    iterations: u32,
    buffer: VecDeque<TailEntry>,
}

#[async_trait]
impl LogTail for RedisTail {
    async fn next(&mut self) -> Result<TailEntry, RiverError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(entry);
            }

            // Liveness bound: an unterminated log must not hang a resumer
            // forever.
            if self.iterations >= self.iteration_cap {
                return Err(RiverError::provider("Resume safety limit reached"));
            }
            self.iterations += 1;

            let options = StreamReadOptions::default()
                .block(self.block_duration_ms)
                .count(self.read_count_cap);
            let reply: StreamReadReply = self
                .conn
                .xread_options(&[&self.stream_key], &[&self.last_id], &options)
                .await
                .map_err(|e| provider_err("Redis tail read failed", e))?;

            // An empty reply is just the block timeout; loop and re-read.
            for stream in reply.keys {
                for entry in stream.ids {
                    self.last_id = entry.id.clone();
                    if entry.map.contains_key("end") {
                        self.buffer.push_back(TailEntry::End);
                        break;
                    }
                    let Some(value) = entry.map.get("data") else {
                        log::warn!("log entry {} in {} has no data field", entry.id, self.stream_key);
                        continue;
                    };
                    match redis::from_redis_value::<String>(value) {
                        Ok(raw) => match serde_json::from_str::<LogRecord>(&raw) {
                            Ok(record) => self.buffer.push_back(TailEntry::Item(record.item)),
                            Err(e) => {
                                log::warn!(
                                    "skipping malformed log entry {} in {}: {e}",
                                    entry.id,
                                    self.stream_key
                                );
                            }
                        },
                        Err(e) => {
                            log::warn!(
                                "skipping unreadable log entry {} in {}: {e}",
                                entry.id,
                                self.stream_key
                            );
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Resumable provider persisting runs to redis streams.
pub struct RedisProvider {
    harness: HarnessConfig,
}

impl RedisProvider {
    /// Connect to redis and build the provider.
    pub async fn connect(config: RedisProviderConfig) -> Result<Self, RiverError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| provider_err("Invalid redis url", e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| provider_err("Redis connection failed", e))?;
        let log = Arc::new(RedisLog {
            client,
            conn,
            config,
        });
        Ok(Self {
            harness: HarnessConfig {
                provider_id: "redis".to_string(),
                resumable: true,
                log,
                failed_appends: Arc::new(AtomicU64::new(0)),
            },
        })
    }

    /// Number of log appends that failed and were swallowed since startup.
    pub fn failed_append_count(&self) -> u64 {
        self.harness.failed_appends.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RiverProvider for RedisProvider {
    fn provider_id(&self) -> &str {
        &self.harness.provider_id
    }

    fn is_resumable(&self) -> bool {
        true
    }

    async fn start_stream(
        &self,
        storage_id: &str,
        router_stream_key: &str,
        runner: Arc<dyn StreamRunner>,
        request: StreamRequest,
    ) -> Result<Box<dyn ItemReceiver>, RiverError> {
        start_run(&self.harness, storage_id, router_stream_key, runner, request).await
    }

    async fn resume_stream(
        &self,
        token: &ResumptionToken,
    ) -> Result<Box<dyn ItemReceiver>, RiverError> {
        resume_from_log(self.harness.log.clone(), token).await
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
    fn test_config_defaults() {
        let config: RedisProviderConfig =
            serde_json::from_value(json!({"url": "redis://localhost:6379"})).unwrap();

        assert_eq!(config.key_prefix, "river:stream:");
        assert_eq!(config.block_duration_ms, 10);
        assert_eq!(config.read_count_cap, 10);
        assert_eq!(config.resume_iteration_cap, 1000);
    }

    #[test]
    fn test_stream_key_layout() {
        let key = LogKey::new("storage-1", "run-1");
        assert_eq!(
            stream_key("river:stream:", &key),
            "river:stream:storage-1:run-1"
        );
    }

    #[test]
    fn test_log_record_wire_form() {
        let record = LogRecord {
            item: StreamItem::chunk(json!("hello")),
        };
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire, json!({"item": {"type": "chunk", "chunk": "hello"}}));
    }
}
