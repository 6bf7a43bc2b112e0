//! Score-ordered queues
//!
//! Values live in a sorted set as `(score, payload)`; the lowest
//! score pops first. Peek-and-remove runs as one atomic script so two
//! concurrent consumers never receive the same member. The
//! timestamp-gated variant additionally refuses members whose score
//! has not yet been reached by the caller's clock.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::scripts;
use crate::adapter::Reply;
use crate::codec;
use crate::connector::Connector;
use crate::error::{Error, Result};

/// Score queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreQueueConfig {
    /// Logical queue key, qualified under the connector's prefix
    pub key: String,

    /// Sleep between empty polls, seconds
    #[serde(default = "super::default_poll_interval")]
    pub poll_interval: f64,
}

impl ScoreQueueConfig {
    pub fn new(key: impl Into<String>) -> Self {
        ScoreQueueConfig {
            key: key.into(),
            poll_interval: super::default_poll_interval(),
        }
    }
}

/// Interpret a script reply as the popped `(member, score)` pair
fn scored_pair(reply: &Reply) -> Result<Option<(Bytes, f64)>> {
    if reply.is_empty() {
        return Ok(None);
    }
    if let Some([member, score]) = reply.as_array() {
        if let (Some(member), Some(score)) = (member.as_data(), score.as_f64()) {
            return Ok(Some((member.clone(), score)));
        }
    }
    Err(Error::Config(format!(
        "unexpected dequeue script reply: {}",
        reply
    )))
}

/// Priority queue over a sorted set; lower score pops first
pub struct ScoreQueue<T> {
    connector: Connector,
    key: String,
    poll_interval: Duration,
    guard: Mutex<()>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ScoreQueue<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn bind(connector: Connector, config: ScoreQueueConfig) -> ScoreQueue<T> {
        let key = connector.raw_key(&config.key);
        ScoreQueue {
            connector,
            key,
            poll_interval: Duration::from_secs_f64(config.poll_interval),
            guard: Mutex::new(()),
            _payload: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Insert or reposition a value at the given score
    pub async fn put(&self, score: f64, value: &T) -> Result<()> {
        let raw = codec::encode(value)?;
        let client = self.connector.client().await?;
        client.zadd(&self.key, score, raw).await?;
        Ok(())
    }

    /// One atomic pop attempt, no waiting
    pub async fn try_pop(&self) -> Result<Option<(f64, T)>> {
        let client = self.connector.client().await?;
        let reply = client
            .eval(scripts::POP_LOWEST, std::slice::from_ref(&self.key), &[])
            .await?;
        match scored_pair(&reply)? {
            Some((member, score)) => Ok(Some((score, codec::decode(&member)?))),
            None => Ok(None),
        }
    }

    /// Pop the lowest-scored value, polling until one appears
    ///
    /// `deadline: None` polls forever at the configured interval;
    /// `Some(limit)` yields [`Error::Timeout`] once `limit` elapses.
    pub async fn get(&self, deadline: Option<Duration>) -> Result<(f64, T)> {
        let _guard = self.guard.lock().await;
        let started = Instant::now();
        loop {
            if let Some(popped) = self.try_pop().await? {
                return Ok(popped);
            }
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    return Err(Error::Timeout);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn length(&self) -> Result<u64> {
        let client = self.connector.client().await?;
        client.zcard(&self.key).await
    }

    /// All values in ascending score order
    pub async fn list(&self) -> Result<Vec<T>> {
        let client = self.connector.client().await?;
        let raw = client.zrange(&self.key, 0, -1).await?;
        raw.iter().map(|member| codec::decode(member)).collect()
    }

    /// Remove a value regardless of its score
    pub async fn remove(&self, value: &T) -> Result<()> {
        let raw = codec::encode(value)?;
        let client = self.connector.client().await?;
        client.zrem(&self.key, raw).await?;
        Ok(())
    }
}

/// Timestamp-gated score queue: members become visible only once the
/// caller's clock passes their score
pub struct TimestampQueue<T> {
    inner: ScoreQueue<T>,
}

impl<T> TimestampQueue<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn bind(connector: Connector, config: ScoreQueueConfig) -> TimestampQueue<T> {
        TimestampQueue {
            inner: ScoreQueue::bind(connector, config),
        }
    }

    pub fn key(&self) -> &str {
        self.inner.key()
    }

    /// Schedule a value to become ready at the given timestamp score
    pub async fn put(&self, ready_at: f64, value: &T) -> Result<()> {
        self.inner.put(ready_at, value).await
    }

    /// One atomic pop attempt against an explicit "now"
    ///
    /// The bound travels as a script argument so the pop decision uses
    /// the caller's clock, never the store's.
    pub async fn try_pop(&self, now: f64) -> Result<Option<(f64, T)>> {
        let client = self.inner.connector.client().await?;
        let reply = client
            .eval(
                scripts::POP_LOWEST_GATED,
                std::slice::from_ref(&self.inner.key),
                std::slice::from_ref(&now.to_string()),
            )
            .await?;
        match scored_pair(&reply)? {
            Some((member, score)) => Ok(Some((score, codec::decode(&member)?))),
            None => Ok(None),
        }
    }

    /// Pop the lowest ready value, polling with the wall clock
    ///
    /// Deadline semantics match [`ScoreQueue::get`].
    pub async fn get(&self, deadline: Option<Duration>) -> Result<(f64, T)> {
        let _guard = self.inner.guard.lock().await;
        let started = Instant::now();
        loop {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            if let Some(popped) = self.try_pop(now).await? {
                return Ok(popped);
            }
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    return Err(Error::Timeout);
                }
            }
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }

    pub async fn length(&self) -> Result<u64> {
        self.inner.length().await
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        self.inner.list().await
    }

    pub async fn remove(&self, value: &T) -> Result<()> {
        self.inner.remove(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use std::sync::Arc;

    fn connector() -> Connector {
        Connector::with_adapter("test", Arc::new(MemoryAdapter::new()))
    }

    #[tokio::test]
    async fn test_drains_in_ascending_score_order() {
        let q: ScoreQueue<String> = ScoreQueue::bind(connector(), ScoreQueueConfig::new("q"));
        q.put(4.0, &"a".to_string()).await.unwrap();
        q.put(3.0, &"c".to_string()).await.unwrap();
        q.put(2.0, &"b".to_string()).await.unwrap();
        // re-adding "a" at a lower score repositions it
        q.put(1.0, &"a".to_string()).await.unwrap();

        assert_eq!(q.length().await.unwrap(), 3);
        assert_eq!(q.list().await.unwrap(), vec!["a", "b", "c"]);

        let (score, value) = q.get(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!((score, value.as_str()), (1.0, "a"));
        assert_eq!(q.list().await.unwrap(), vec!["b", "c"]);
        let (_, value) = q.get(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(value, "b");
        let (_, value) = q.get(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(value, "c");
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_by_value() {
        let q: ScoreQueue<String> = ScoreQueue::bind(connector(), ScoreQueueConfig::new("q"));
        q.put(1.0, &"3".to_string()).await.unwrap();
        assert_eq!(q.length().await.unwrap(), 1);
        q.remove(&"3".to_string()).await.unwrap();
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_deadline_times_out() {
        let q: ScoreQueue<String> = ScoreQueue::bind(connector(), ScoreQueueConfig::new("q"));
        let err = q.get(Some(Duration::from_secs(1))).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_no_duplicate_delivery_under_two_consumers() {
        let shared = connector();
        let a: Arc<ScoreQueue<i64>> =
            Arc::new(ScoreQueue::bind(shared.clone(), ScoreQueueConfig::new("q")));
        let b: Arc<ScoreQueue<i64>> =
            Arc::new(ScoreQueue::bind(shared, ScoreQueueConfig::new("q")));

        let total = 40;
        for i in 0..total {
            a.put(i as f64, &i).await.unwrap();
        }

        async fn drain(q: Arc<ScoreQueue<i64>>) -> Vec<i64> {
            let mut popped = Vec::new();
            while let Some((_, value)) = q.try_pop().await.unwrap() {
                popped.push(value);
                tokio::task::yield_now().await;
            }
            popped
        }

        let (left, right) = tokio::join!(
            tokio::spawn(drain(a)),
            tokio::spawn(drain(b))
        );
        let mut all = left.unwrap();
        all.extend(right.unwrap());

        // every pushed value came out exactly once
        assert_eq!(all.len(), total as usize);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total as usize);
    }

    #[tokio::test]
    async fn test_timestamp_gate_holds_future_elements() {
        let q: TimestampQueue<String> =
            TimestampQueue::bind(connector(), ScoreQueueConfig::new("q"));
        q.put(100.0, &"later".to_string()).await.unwrap();
        q.put(10.0, &"soon".to_string()).await.unwrap();

        // below both scores: nothing is ready
        assert!(q.try_pop(5.0).await.unwrap().is_none());
        assert_eq!(q.length().await.unwrap(), 2);

        // between the scores: only the earlier member pops
        let (score, value) = q.try_pop(50.0).await.unwrap().unwrap();
        assert_eq!((score, value.as_str()), (10.0, "soon"));
        assert!(q.try_pop(50.0).await.unwrap().is_none());

        // past the remaining score
        let (_, value) = q.try_pop(150.0).await.unwrap().unwrap();
        assert_eq!(value, "later");
        assert_eq!(q.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gated_list_is_score_ordered() {
        let q: TimestampQueue<String> =
            TimestampQueue::bind(connector(), ScoreQueueConfig::new("q"));
        q.put(100.0, &"c".to_string()).await.unwrap();
        q.put(4.0, &"a".to_string()).await.unwrap();
        assert_eq!(q.list().await.unwrap(), vec!["a", "c"]);
    }
}
