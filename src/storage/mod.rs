//! Storage primitives
//!
//! Key-value storage layered on the connector graph: scalar values
//! with optional expiry, hash-field records, and a HyperLogLog-backed
//! approximate membership store.

mod hash;
mod hyperloglog;

pub use hash::HashStorage;
pub use hyperloglog::HyperLogLogStorage;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

use crate::codec;
use crate::connector::Connector;
use crate::error::Result;

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Expiry applied to every write, seconds
    pub expiry: Option<f64>,
}

impl StorageConfig {
    pub(crate) fn expiry_duration(&self) -> Option<Duration> {
        self.expiry.map(Duration::from_secs_f64)
    }
}

/// Scalar key-value storage under a connector's namespace
///
/// Writing `None` deletes the key. `list` and `length` enumerate the
/// whole prefix with a pattern scan, which is O(keyspace size) at the
/// store; avoid them on huge namespaces.
pub struct Storage<T> {
    connector: Connector,
    expiry: Option<Duration>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Storage<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    /// Bind a storage entity onto a connector
    pub fn bind(connector: Connector, config: StorageConfig) -> Storage<T> {
        Storage {
            connector,
            expiry: config.expiry_duration(),
            _payload: PhantomData,
        }
    }

    /// Derived storage under a sub-prefix
    pub fn child(&self, name: &str) -> Storage<T> {
        Storage {
            connector: self.connector.child(name),
            expiry: self.expiry,
            _payload: PhantomData,
        }
    }

    pub fn raw_key(&self, key: &str) -> String {
        self.connector.raw_key(key)
    }

    /// Write a value, or delete the key when `value` is `None`
    pub async fn set(&self, key: &str, value: Option<&T>) -> Result<()> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        match value {
            Some(value) => {
                client
                    .set(&raw_key, codec::encode(value)?, self.expiry)
                    .await
            }
            None => {
                client.delete(std::slice::from_ref(&raw_key)).await?;
                Ok(())
            }
        }
    }

    /// Read and decode a value; `None` when the key is missing
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        match client.get(&raw_key).await? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Re-arm a key's expiry
    pub async fn expire(&self, key: &str, expiry: Duration) -> Result<bool> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        client.expire(&raw_key, expiry).await
    }

    /// All logical keys under this node's prefix
    pub async fn list(&self) -> Result<Vec<String>> {
        let client = self.connector.client().await?;
        let found = client.keys(&self.connector.raw_key("*")).await?;
        let mut keys: Vec<String> = found
            .iter()
            .map(|raw| self.connector.clean_key(raw))
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Number of keys under this node's prefix
    pub async fn length(&self) -> Result<usize> {
        let client = self.connector.client().await?;
        Ok(client.keys(&self.connector.raw_key("*")).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use std::sync::Arc;

    fn storage() -> Storage<serde_json::Value> {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        Storage::bind(connector.child("s"), StorageConfig::default())
    }

    #[tokio::test]
    async fn test_set_get_list_delete() {
        let s = storage();
        s.set("g", Some(&serde_json::json!({"f": 3})))
            .await
            .unwrap();
        assert_eq!(s.get("g").await.unwrap(), Some(serde_json::json!({"f": 3})));
        assert_eq!(s.length().await.unwrap(), 1);
        assert_eq!(s.list().await.unwrap(), vec!["g"]);
        s.set("g", None).await.unwrap();
        assert_eq!(s.length().await.unwrap(), 0);
        assert_eq!(s.get("g").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nested_storage_prefixes() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let s: Storage<i64> = Storage::bind(connector.child("p"), StorageConfig::default());
        let child = s.child("child");
        assert_eq!(child.raw_key("1"), "p:child:1");
        child.set("1", Some(&1)).await.unwrap();
        assert_eq!(child.get("1").await.unwrap(), Some(1));
        // child keys live under the parent prefix, so the parent scan
        // sees them with the child segment still attached
        assert_eq!(s.list().await.unwrap(), vec!["child:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_applied_on_write() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let s: Storage<i64> = Storage::bind(
            connector,
            StorageConfig { expiry: Some(1.0) },
        );
        s.set("k", Some(&1)).await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), Some(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(s.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_rearms() {
        let s = storage();
        s.set("k", Some(&serde_json::json!(1))).await.unwrap();
        assert!(s.expire("k", Duration::from_secs(1)).await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!s.expire("k", Duration::from_secs(1)).await.unwrap());
    }
}
