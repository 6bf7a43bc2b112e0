//! Hash-field storage
//!
//! Records are stored as store hashes, one field per record member.
//! Partial reads and writes go field by field; writing `None` into a
//! field deletes it; expiry is re-applied after every mutation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use super::StorageConfig;
use crate::codec;
use crate::connector::Connector;
use crate::error::Result;

/// Field-structured storage over store hashes
pub struct HashStorage<F> {
    connector: Connector,
    expiry: Option<Duration>,
    _field: PhantomData<fn() -> F>,
}

impl<F> HashStorage<F>
where
    F: Serialize + DeserializeOwned + Send,
{
    /// Bind a hash storage entity onto a connector
    pub fn bind(connector: Connector, config: StorageConfig) -> HashStorage<F> {
        HashStorage {
            connector,
            expiry: config.expiry_duration(),
            _field: PhantomData,
        }
    }

    pub fn raw_key(&self, key: &str) -> String {
        self.connector.raw_key(key)
    }

    async fn touch_expiry(&self, raw_key: &str) -> Result<()> {
        if let Some(expiry) = self.expiry {
            let client = self.connector.client().await?;
            client.expire(raw_key, expiry).await?;
        }
        Ok(())
    }

    /// Write a whole record, or delete it when `record` is `None`
    pub async fn set(&self, key: &str, record: Option<&BTreeMap<String, F>>) -> Result<()> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        match record {
            Some(record) => {
                let mut pairs = Vec::with_capacity(record.len());
                for (field, value) in record {
                    pairs.push((field.clone(), codec::encode(value)?));
                }
                client.hset(&raw_key, pairs).await?;
                self.touch_expiry(&raw_key).await
            }
            None => {
                client.delete(std::slice::from_ref(&raw_key)).await?;
                Ok(())
            }
        }
    }

    /// Partial write: `Some` upserts a field, `None` deletes it
    pub async fn update(&self, key: &str, fields: &BTreeMap<String, Option<F>>) -> Result<()> {
        let raw_key = self.connector.raw_key(key);
        let mut pairs = Vec::new();
        let mut to_delete = Vec::new();
        for (field, value) in fields {
            match value {
                Some(value) => pairs.push((field.clone(), codec::encode(value)?)),
                None => to_delete.push(field.clone()),
            }
        }
        let client = self.connector.client().await?;
        if !pairs.is_empty() {
            client.hset(&raw_key, pairs).await?;
        }
        if !to_delete.is_empty() {
            client.hdel(&raw_key, &to_delete).await?;
        }
        self.touch_expiry(&raw_key).await
    }

    /// Write or delete a single field
    pub async fn set_field(&self, key: &str, field: &str, value: Option<&F>) -> Result<()> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        match value {
            Some(value) => {
                client
                    .hset(&raw_key, vec![(field.to_string(), codec::encode(value)?)])
                    .await?;
            }
            None => {
                client.hdel(&raw_key, &[field.to_string()]).await?;
            }
        }
        self.touch_expiry(&raw_key).await
    }

    /// Read the whole record; empty when the key is missing
    pub async fn get(&self, key: &str) -> Result<BTreeMap<String, F>> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        let mut record = BTreeMap::new();
        for (field, raw) in client.hgetall(&raw_key).await? {
            record.insert(field, codec::decode(&raw)?);
        }
        Ok(record)
    }

    /// Read a single field
    pub async fn get_field(&self, key: &str, field: &str) -> Result<Option<F>> {
        let raw_key = self.connector.raw_key(key);
        let client = self.connector.client().await?;
        match client.hget(&raw_key, field).await? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read selected fields; missing ones come back as `None`
    pub async fn get_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<BTreeMap<String, Option<F>>> {
        let raw_key = self.connector.raw_key(key);
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let client = self.connector.client().await?;
        let values = client.hmget(&raw_key, &names).await?;
        let mut record = BTreeMap::new();
        for (name, raw) in names.into_iter().zip(values) {
            let value = match raw {
                Some(raw) => Some(codec::decode(&raw)?),
                None => None,
            };
            record.insert(name, value);
        }
        Ok(record)
    }

    /// All logical keys under this node's prefix (pattern scan)
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

    fn storage() -> HashStorage<serde_json::Value> {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        HashStorage::bind(connector.child("h"), StorageConfig::default())
    }

    fn record(pairs: &[(&str, i64)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), serde_json::json!(value)))
            .collect()
    }

    #[tokio::test]
    async fn test_whole_record_round_trip() {
        let s = storage();
        let data = record(&[("f", 3), ("g", 4), ("h", 5)]);
        s.set("6", Some(&data)).await.unwrap();
        assert_eq!(s.get("6").await.unwrap(), data);
        assert_eq!(
            s.get_field("6", "h").await.unwrap(),
            Some(serde_json::json!(5))
        );
    }

    #[tokio::test]
    async fn test_field_none_deletes_field() {
        let s = storage();
        s.set("k", Some(&record(&[("f", 3), ("g", 4)]))).await.unwrap();
        s.set_field("k", "f", None).await.unwrap();
        assert_eq!(s.get_field("k", "f").await.unwrap(), None);

        let partial = s.get_fields("k", &["f", "g"]).await.unwrap();
        assert_eq!(partial["f"], None);
        assert_eq!(partial["g"], Some(serde_json::json!(4)));
    }

    #[tokio::test]
    async fn test_update_mixes_upserts_and_deletes() {
        let s = storage();
        s.set("k", Some(&record(&[("f", 3), ("g", 4)]))).await.unwrap();

        let mut fields: BTreeMap<String, Option<serde_json::Value>> = BTreeMap::new();
        fields.insert("g".to_string(), None);
        fields.insert("z".to_string(), Some(serde_json::json!(1)));
        s.update("k", &fields).await.unwrap();

        assert_eq!(s.get("k").await.unwrap(), record(&[("f", 3), ("z", 1)]));
    }

    #[tokio::test]
    async fn test_deleting_all_fields_leaves_empty_record() {
        let s = storage();
        s.set("k", Some(&record(&[("f", 3)]))).await.unwrap();
        s.set_field("k", "f", None).await.unwrap();
        assert!(s.get("k").await.unwrap().is_empty());
        assert_eq!(s.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_delete() {
        let s = storage();
        s.set("k", Some(&record(&[("f", 3)]))).await.unwrap();
        s.set("k", None).await.unwrap();
        assert!(s.get("k").await.unwrap().is_empty());
        assert!(s.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_reapplied_after_mutation() {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        let s: HashStorage<serde_json::Value> =
            HashStorage::bind(connector, StorageConfig { expiry: Some(2.0) });
        s.set("k", Some(&record(&[("f", 3)]))).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        // the write re-arms the clock
        s.set_field("k", "g", Some(&serde_json::json!(4))).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(!s.get("k").await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(s.get("k").await.unwrap().is_empty());
    }
}
