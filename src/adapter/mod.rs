//! Command adapters
//!
//! Wraps a concrete store client behind one uniform command interface.
//! Several interchangeable adapters exist; exactly one is selected at
//! connect time by the priority-ordered registry.

mod commands;
mod memory;
mod multiplexed;
mod pooled;
mod registry;
mod reply;

pub use memory::MemoryAdapter;
pub use multiplexed::MultiplexedAdapter;
pub use pooled::PooledAdapter;
pub use registry::{AdapterEntry, AdapterRegistry};
pub use reply::Reply;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

/// One message read from a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Store-assigned entry id
    pub id: String,

    /// Field name/payload pairs, in stream order
    pub fields: Vec<(String, Bytes)>,
}

/// Uniform command surface over a live store connection
///
/// All binary payloads cross this boundary as `Bytes`; structured
/// replies are normalized into [`Reply`]. Adapters are responsible for
/// interleaving in-flight commands (pooling, multiplexing) so the core
/// never holds a global lock around ordinary commands.
#[async_trait]
pub trait CommandAdapter: Send + Sync {
    /// Adapter name (for logging and selection)
    fn name(&self) -> &'static str;

    // --- scalar keys ---

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// SET, with SETEX semantics when an expiry is given
    async fn set(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<()>;

    async fn delete(&self, keys: &[String]) -> Result<u64>;

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool>;

    /// KEYS pattern scan; O(keyspace size) at the store
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    // --- hashes ---

    async fn hset(&self, key: &str, pairs: Vec<(String, Bytes)>) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    // --- lists ---

    async fn rpush(&self, key: &str, value: Bytes) -> Result<u64>;

    async fn lpop(&self, key: &str) -> Result<Option<Bytes>>;

    /// Blocking pop; a zero timeout waits indefinitely, `None` means
    /// the (finite) timeout elapsed with nothing available
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>>;

    async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<u64>;

    async fn llen(&self, key: &str) -> Result<u64>;

    // --- sorted sets ---

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<u64>;

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>>;

    async fn zrem(&self, key: &str, member: Bytes) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    // --- scripting ---

    /// EVAL a script for atomic multi-step operations
    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<Reply>;

    // --- streams ---

    /// XADD; `maxlen` appends with approximate trimming (`MAXLEN ~`)
    async fn xadd(
        &self,
        key: &str,
        fields: Vec<(String, Bytes)>,
        maxlen: Option<u64>,
    ) -> Result<String>;

    /// Blocking plain read of up to `count` entries after `id`
    /// (`"$"` reads only entries appended from now on)
    async fn xread(
        &self,
        key: &str,
        id: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>>;

    /// XGROUP CREATE at the stream tail with MKSTREAM; returns `false`
    /// when the group already existed
    async fn xgroup_create(&self, key: &str, group: &str) -> Result<bool>;

    /// Blocking consumer-group read of up to `count` new messages;
    /// a zero block duration waits indefinitely
    async fn xread_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
        noack: bool,
    ) -> Result<Vec<StreamMessage>>;

    /// Acknowledge one delivered entry
    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64>;

    // --- hyperloglog ---

    /// PFADD one member; `true` when the estimate changed
    async fn pfadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn pfmerge(&self, destination: &str, source: &str) -> Result<()>;

    async fn pfcount(&self, key: &str) -> Result<u64>;

    // --- lifecycle ---

    /// Release all underlying resources deterministically
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn CommandAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAdapter")
            .field("name", &self.name())
            .finish()
    }
}

/// Check for the non-fatal "consumer group already exists" error
pub(crate) fn is_busygroup(err: &redis::RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

/// Parse an XREAD/XREADGROUP reply into stream messages
///
/// Accepts both the RESP2 nesting (array of `[stream, entries]`
/// pairs) and the RESP3 map flattened by [`Reply::from`].
pub(crate) fn parse_stream_reply(reply: &Reply) -> Vec<StreamMessage> {
    let mut messages = Vec::new();
    let items = match reply.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => return messages,
    };

    let mut entry_lists: Vec<&Reply> = Vec::new();
    match &items[0] {
        // RESP2: [[stream, entries], ...]
        Reply::Array(_) => {
            for pair in items {
                if let Some(pair) = pair.as_array() {
                    if pair.len() == 2 {
                        entry_lists.push(&pair[1]);
                    }
                }
            }
        }
        // flattened map: [stream, entries, stream, entries, ...]
        _ => {
            for chunk in items.chunks(2) {
                if chunk.len() == 2 {
                    entry_lists.push(&chunk[1]);
                }
            }
        }
    }

    for entries in entry_lists {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        for entry in entries {
            let Some(entry) = entry.as_array() else {
                continue;
            };
            if entry.len() != 2 {
                continue;
            }
            let Some(id) = entry[0].as_data() else {
                continue;
            };
            let id = String::from_utf8_lossy(id).into_owned();
            let mut fields = Vec::new();
            if let Some(flat) = entry[1].as_array() {
                for kv in flat.chunks(2) {
                    if let [k, v] = kv {
                        if let (Some(k), Some(v)) = (k.as_data(), v.as_data()) {
                            fields.push((
                                String::from_utf8_lossy(k).into_owned(),
                                v.clone(),
                            ));
                        }
                    }
                }
            }
            messages.push(StreamMessage { id, fields });
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_reply_resp2() {
        // [[stream, [[id, [k, v]]]]]
        let reply = Reply::array(vec![Reply::array(vec![
            Reply::data("s"),
            Reply::array(vec![Reply::array(vec![
                Reply::data("1-0"),
                Reply::array(vec![Reply::data("a"), Reply::data("3")]),
            ])]),
        ])]);
        let messages = parse_stream_reply(&reply);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "1-0");
        assert_eq!(messages[0].fields[0].0, "a");
        assert_eq!(messages[0].fields[0].1.as_ref(), b"3");
    }

    #[test]
    fn test_parse_stream_reply_empty() {
        assert!(parse_stream_reply(&Reply::Nil).is_empty());
        assert!(parse_stream_reply(&Reply::Array(vec![])).is_empty());
    }
}
