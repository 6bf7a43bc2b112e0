//! HyperLogLog membership storage
//!
//! An approximate set: additions feed a cardinality estimator, and
//! membership is probed by merging the structure into a disposable
//! key and re-adding the member there. If the estimate does not
//! change, the member was already present. False negatives are bound
//! by the estimator's own error; there are no false positives beyond
//! it.

use tracing::debug;

use crate::connector::Connector;
use crate::error::Result;

/// Approximate membership store over PFADD/PFMERGE/PFCOUNT
pub struct HyperLogLogStorage {
    connector: Connector,
    key: String,
}

impl HyperLogLogStorage {
    /// Bind onto a connector, with the structure living at `key`
    pub fn bind(connector: Connector, key: &str) -> HyperLogLogStorage {
        let key = connector.raw_key(key);
        HyperLogLogStorage { connector, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record a member
    pub async fn add(&self, member: &str) -> Result<()> {
        let client = self.connector.client().await?;
        client.pfadd(&self.key, member).await?;
        Ok(())
    }

    /// Probe membership via a disposable merge key
    ///
    /// The probe key is deleted afterwards in every case.
    pub async fn contains(&self, member: &str) -> Result<bool> {
        let probe_key = self.connector.raw_key(&format!("tmp:hll:{}", member));
        let client = self.connector.client().await?;
        client.pfmerge(&probe_key, &self.key).await?;
        let changed = client.pfadd(&probe_key, member).await;
        if let Err(err) = client.delete(std::slice::from_ref(&probe_key)).await {
            debug!("failed to drop probe key {:?}: {}", probe_key, err);
        }
        Ok(!changed?)
    }

    /// Estimated number of distinct members
    pub async fn len(&self) -> Result<u64> {
        let client = self.connector.client().await?;
        client.pfcount(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use std::sync::Arc;

    fn storage() -> HyperLogLogStorage {
        let connector = Connector::with_adapter("test", Arc::new(MemoryAdapter::new()));
        HyperLogLogStorage::bind(connector.child("hll"), "members")
    }

    #[tokio::test]
    async fn test_membership_probe() {
        let s = storage();
        s.add("a").await.unwrap();
        assert!(s.contains("a").await.unwrap());
        assert!(!s.contains("b").await.unwrap());
        // probing is repeatable: the disposable key never pollutes
        // the structure
        assert!(s.contains("a").await.unwrap());
        assert!(!s.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_length_counts_distinct_members() {
        let s = storage();
        for member in ["a", "b", "c", "a"] {
            s.add(member).await.unwrap();
        }
        assert_eq!(s.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_key_is_namespaced() {
        let s = storage();
        assert_eq!(s.key(), "hll:members");
    }
}
