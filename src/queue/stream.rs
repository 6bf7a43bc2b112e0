//! Stream consumer-group queue
//!
//! Values are field-map records appended with XADD and consumed
//! through a consumer group, one message per read. Delivery defaults
//! to no-ack (a message counts as delivered once read); manual
//! acknowledgement stays available through [`StreamQueue::ack`].

use bytes::Bytes;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec;
use crate::connector::Connector;
use crate::error::{Error, Result};

/// One stream record: field name to value
pub type Record = BTreeMap<String, serde_json::Value>;

fn default_group_create() -> bool {
    true
}

/// Stream queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamQueueConfig {
    /// Logical stream key, qualified under the connector's prefix
    pub key: String,

    /// Consumer group; defaults to the host name
    pub group_name: Option<String>,

    /// Create the group at the stream tail on first use
    #[serde(default = "default_group_create")]
    pub group_create: bool,

    /// Consumer identity; defaults to `{host}-{uuid}` so each process
    /// instance reads under its own name
    pub consumer_name: Option<String>,

    /// Approximate stream length cap (`MAXLEN ~`)
    pub maxlen: Option<u64>,

    /// Fields to run through the codec; an empty set encodes every
    /// field, string fields outside the set pass through raw
    #[serde(default)]
    pub format_fields: BTreeSet<String>,

    /// Track delivered messages as pending until [`StreamQueue::ack`]
    #[serde(default)]
    pub manual_ack: bool,
}

impl StreamQueueConfig {
    pub fn new(key: impl Into<String>) -> Self {
        StreamQueueConfig {
            key: key.into(),
            group_name: None,
            group_create: default_group_create(),
            consumer_name: None,
            maxlen: None,
            format_fields: BTreeSet::new(),
            manual_ack: false,
        }
    }
}

/// Consumer-group queue over a store stream
pub struct StreamQueue {
    connector: Connector,
    key: String,
    group: String,
    consumer: String,
    group_create: bool,
    maxlen: Option<u64>,
    format_fields: BTreeSet<String>,
    manual_ack: bool,
    guard: Mutex<()>,
    group_ready: OnceCell<()>,
}

impl StreamQueue {
    /// Bind a stream queue entity onto a connector
    pub fn bind(connector: Connector, config: StreamQueueConfig) -> StreamQueue {
        let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        let key = connector.raw_key(&config.key);
        StreamQueue {
            connector,
            key,
            group: config.group_name.unwrap_or_else(|| host.clone()),
            consumer: config
                .consumer_name
                .unwrap_or_else(|| format!("{}-{}", host, Uuid::new_v4())),
            group_create: config.group_create,
            maxlen: config.maxlen,
            format_fields: config.format_fields,
            manual_ack: config.manual_ack,
            guard: Mutex::new(()),
            group_ready: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Connect the underlying owner and create the consumer group
    pub async fn connect(&self) -> Result<()> {
        self.connector.connect().await?;
        if self.group_create {
            self.ensure_group().await?;
        }
        Ok(())
    }

    /// Idempotent group creation at the stream tail
    async fn ensure_group(&self) -> Result<()> {
        self.group_ready
            .get_or_try_init(|| async {
                let client = self.connector.client().await?;
                let created = client.xgroup_create(&self.key, &self.group).await?;
                if created {
                    info!("group {:?} created on stream {:?}", self.group, self.key);
                } else {
                    debug!("group {:?} already exists on stream {:?}", self.group, self.key);
                }
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    fn encodes(&self, field: &str) -> bool {
        self.format_fields.is_empty() || self.format_fields.contains(field)
    }

    /// Append a record; null fields are skipped
    pub async fn put(&self, record: &Record) -> Result<String> {
        let mut fields: Vec<(String, Bytes)> = Vec::with_capacity(record.len());
        for (name, value) in record {
            if value.is_null() {
                continue;
            }
            let raw = match value {
                serde_json::Value::String(text) if !self.encodes(name) => {
                    Bytes::from(text.clone().into_bytes())
                }
                _ => codec::encode(value)?,
            };
            fields.push((name.clone(), raw));
        }
        let client = self.connector.client().await?;
        client.xadd(&self.key, fields, self.maxlen).await
    }

    /// Read one new message for this consumer, waiting up to `timeout`
    ///
    /// A zero timeout blocks indefinitely; a finite one that elapses
    /// with nothing new yields [`Error::Timeout`].
    pub async fn get(&self, timeout: Duration) -> Result<Record> {
        self.get_with_id(timeout).await.map(|(_, record)| record)
    }

    /// Like [`get`], also returning the entry id for manual
    /// acknowledgement
    ///
    /// [`get`]: StreamQueue::get
    pub async fn get_with_id(&self, timeout: Duration) -> Result<(String, Record)> {
        let _guard = self.guard.lock().await;
        if self.group_create {
            self.ensure_group().await?;
        }
        let client = self.connector.client().await?;
        let messages = client
            .xread_group(
                &self.key,
                &self.group,
                &self.consumer,
                timeout,
                1,
                !self.manual_ack,
            )
            .await?;
        let message = messages.into_iter().next().ok_or(Error::Timeout)?;

        let mut record = Record::new();
        for (name, raw) in message.fields {
            let value = if self.encodes(&name) {
                codec::decode(&raw)?
            } else {
                serde_json::Value::String(String::from_utf8_lossy(&raw).into_owned())
            };
            record.insert(name, value);
        }
        Ok((message.id, record))
    }

    /// Acknowledge a delivered entry (manual-ack mode)
    pub async fn ack(&self, id: &str) -> Result<u64> {
        let client = self.connector.client().await?;
        client.xack(&self.key, &self.group, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use std::sync::Arc;

    fn stream(config: StreamQueueConfig) -> StreamQueue {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        StreamQueue::bind(connector, config)
    }

    fn record(key: &str, value: i64) -> Record {
        let mut record = Record::new();
        record.insert(key.to_string(), serde_json::json!(value));
        record
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let mut config = StreamQueueConfig::new("xqueue");
        config.group_name = Some("x".to_string());
        let q = stream(config);
        q.connect().await.unwrap();

        let mut data = record("a", 3);
        q.put(&data).await.unwrap();
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), data);

        data.insert("a".to_string(), serde_json::json!(4));
        q.put(&data).await.unwrap();
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out_when_drained() {
        let q = stream(StreamQueueConfig::new("xqueue"));
        q.connect().await.unwrap();
        q.put(&record("a", 1)).await.unwrap();
        q.get(Duration::from_secs(1)).await.unwrap();
        let err = q.get(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_lazy_group_creation_on_first_get() {
        let q = stream(StreamQueueConfig::new("xqueue"));
        // no explicit connect(): the group appears on first use
        q.put(&record("a", 1)).await.unwrap();
        let err = q.get(Duration::from_millis(10)).await.unwrap_err();
        // group was created at the tail, after the first put
        assert!(err.is_timeout());
        q.put(&record("a", 2)).await.unwrap();
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), record("a", 2));
    }

    #[tokio::test]
    async fn test_null_fields_are_skipped() {
        let q = stream(StreamQueueConfig::new("xqueue"));
        q.connect().await.unwrap();
        let mut data = record("a", 1);
        data.insert("b".to_string(), serde_json::Value::Null);
        q.put(&data).await.unwrap();
        let read = q.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(read, record("a", 1));
    }

    #[tokio::test]
    async fn test_format_fields_pass_through_raw() {
        let mut config = StreamQueueConfig::new("xqueue");
        config.format_fields.insert("encoded".to_string());
        let q = stream(config);
        q.connect().await.unwrap();

        let mut data = Record::new();
        data.insert("encoded".to_string(), serde_json::json!({"n": 1}));
        data.insert("plain".to_string(), serde_json::json!("raw text"));
        q.put(&data).await.unwrap();

        let read = q.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(read["encoded"], serde_json::json!({"n": 1}));
        // out-of-set string fields skip the codec both ways
        assert_eq!(read["plain"], serde_json::json!("raw text"));
    }

    #[tokio::test]
    async fn test_manual_ack_flow() {
        let mut config = StreamQueueConfig::new("xqueue");
        config.manual_ack = true;
        let q = stream(config);
        q.connect().await.unwrap();
        q.put(&record("a", 1)).await.unwrap();
        let (id, _) = q.get_with_id(Duration::from_secs(1)).await.unwrap();
        assert_eq!(q.ack(&id).await.unwrap(), 1);
        // double-ack finds nothing pending
        assert_eq!(q.ack(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_maxlen_trims_oldest() {
        let mut config = StreamQueueConfig::new("xqueue");
        config.maxlen = Some(2);
        let q = stream(config);
        q.connect().await.unwrap();
        for n in 1..=3 {
            q.put(&record("a", n)).await.unwrap();
        }
        // the first record was trimmed away
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), record("a", 2));
        assert_eq!(q.get(Duration::from_secs(1)).await.unwrap(), record("a", 3));
    }

    #[tokio::test]
    async fn test_consumer_identity_defaults() {
        let q = stream(StreamQueueConfig::new("xqueue"));
        assert!(!q.group().is_empty());
        assert!(q.consumer().starts_with(q.group()));
        let other = stream(StreamQueueConfig::new("xqueue"));
        // the random suffix keeps process instances apart
        assert_ne!(q.consumer(), other.consumer());
    }
}
