//! Queue primitives
//!
//! Durable queues layered on the connector graph: FIFO over a list,
//! score-ordered and timestamp-gated over a sorted set, and a
//! consumer-group queue over a stream. Each instance carries its own
//! dequeue guard; cross-instance exclusivity comes from the store's
//! command atomicity and the dequeue scripts.

mod score;
pub(crate) mod scripts;
mod stream;

pub use score::{ScoreQueue, ScoreQueueConfig, TimestampQueue};
pub use stream::{Record, StreamQueue, StreamQueueConfig};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::codec;
use crate::connector::Connector;
use crate::error::{Error, Result};

fn default_blocking() -> bool {
    true
}

pub(crate) fn default_poll_interval() -> f64 {
    0.1
}

/// FIFO queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Logical queue key, qualified under the connector's prefix
    pub key: String,

    /// Blocking pop (BLPOP) versus LPOP polling
    #[serde(default = "default_blocking")]
    pub blocking: bool,

    /// Sleep between polls in polling mode, seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
}

impl QueueConfig {
    pub fn new(key: impl Into<String>) -> Self {
        QueueConfig {
            key: key.into(),
            blocking: default_blocking(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// First-in-first-out queue over a store list
///
/// `put` appends with RPUSH; `get` pops from the head, blocking up to
/// the given timeout. The per-instance guard serializes this
/// instance's consumers only: two instances on the same key race at
/// the store, and each pop still delivers to exactly one of them.
pub struct Queue<T> {
    connector: Connector,
    key: String,
    blocking: bool,
    poll_interval: Duration,
    guard: Mutex<()>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Queue<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    /// Bind a queue entity onto a connector
    pub fn bind(connector: Connector, config: QueueConfig) -> Queue<T> {
        let key = connector.raw_key(&config.key);
        Queue {
            connector,
            key,
            blocking: config.blocking,
            poll_interval: Duration::from_secs_f64(config.poll_interval),
            guard: Mutex::new(()),
            _payload: PhantomData,
        }
    }

    /// Fully qualified store key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Derived queue on a sub-key, with its own dequeue guard
    pub fn child(&self, name: &str) -> Queue<T> {
        Queue {
            connector: self.connector.clone(),
            key: format!("{}{}{}", self.key, self.connector.joiner(), name),
            blocking: self.blocking,
            poll_interval: self.poll_interval,
            guard: Mutex::new(()),
            _payload: PhantomData,
        }
    }

    /// Append a value at the tail
    pub async fn put(&self, value: &T) -> Result<u64> {
        let raw = codec::encode(value)?;
        let client = self.connector.client().await?;
        client.rpush(&self.key, raw).await
    }

    /// Pop the head element, waiting up to `timeout`
    ///
    /// A zero timeout waits indefinitely. A finite timeout that
    /// elapses with nothing available yields [`Error::Timeout`].
    pub async fn get(&self, timeout: Duration) -> Result<T> {
        let _guard = self.guard.lock().await;
        let client = self.connector.client().await?;
        let raw = if self.blocking {
            client.blpop(&self.key, timeout).await?
        } else {
            let deadline = if timeout.is_zero() {
                None
            } else {
                Some(Instant::now() + timeout)
            };
            loop {
                if let Some(raw) = client.lpop(&self.key).await? {
                    break Some(raw);
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        break None;
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match raw {
            Some(raw) => codec::decode(&raw),
            None => Err(Error::Timeout),
        }
    }

    pub async fn length(&self) -> Result<u64> {
        let client = self.connector.client().await?;
        client.llen(&self.key).await
    }

    /// All queued elements, head first
    pub async fn list(&self) -> Result<Vec<T>> {
        let client = self.connector.client().await?;
        let raw = client.lrange(&self.key, 0, -1).await?;
        raw.iter().map(|item| codec::decode(item)).collect()
    }

    /// Remove every occurrence of a value
    pub async fn remove(&self, value: &T) -> Result<()> {
        let raw = codec::encode(value)?;
        let client = self.connector.client().await?;
        client.lrem(&self.key, 0, raw).await?;
        Ok(())
    }

    /// Drop the queue wholesale
    pub async fn clear(&self) -> Result<()> {
        let client = self.connector.client().await?;
        client.delete(std::slice::from_ref(&self.key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use std::sync::Arc;

    fn queue(key: &str) -> Queue<i64> {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        Queue::bind(connector, QueueConfig::new(key))
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let q = queue("q");
        q.put(&3).await.unwrap();
        assert_eq!(q.length().await.unwrap(), 1);
        assert_eq!(q.list().await.unwrap(), vec![3]);
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), 3);
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let q = queue("q");
        q.put(&3).await.unwrap();
        q.clear().await.unwrap();
        assert_eq!(q.length().await.unwrap(), 0);
        q.put(&3).await.unwrap();
        q.remove(&3).await.unwrap();
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out_on_empty_queue() {
        let q = queue("q");
        let err = q.get(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_structured_payloads() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let q: Queue<std::collections::BTreeMap<String, i64>> =
            Queue::bind(connector, QueueConfig::new("q"));
        let mut payload = std::collections::BTreeMap::new();
        payload.insert("f".to_string(), 3);
        q.put(&payload).await.unwrap();
        assert_eq!(q.list().await.unwrap(), vec![payload.clone()]);
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_child_extends_key() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let q: Queue<i64> = Queue::bind(connector.child("a"), QueueConfig::new("q"));
        assert_eq!(q.key(), "a:q");
        let child = q.child("child");
        assert_eq!(child.key(), "a:q:child");
        child.put(&1).await.unwrap();
        assert_eq!(child.get(Duration::from_secs(1)).await.unwrap(), 1);
        // the parent queue is untouched
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_mode() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let mut config = QueueConfig::new("q");
        config.blocking = false;
        config.poll_interval = 0.05;
        let q: Queue<i64> = Queue::bind(connector, config);
        q.put(&7).await.unwrap();
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), 7);
        let err = q.get(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_blocking_get_wakes_on_put() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let q: Arc<Queue<i64>> = Arc::new(Queue::bind(connector, QueueConfig::new("q")));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.get(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.put(&42).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap(), 42);
    }
}
