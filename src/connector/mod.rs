//! Connector graph
//!
//! A connector is a namespaced node that owns or delegates to a store
//! connection. Nodes accumulate prefix segments along the
//! configuration tree and share the owning node's live connection
//! through an arena-held handle; the connection itself is established
//! lazily, on first explicit connect or first access.

mod config;
mod hub;
mod readiness;

pub use config::{
    ConnectionParams, ConnectionRef, ConnectionSource, ConnectorConfig, DEFAULT_HOST,
    DEFAULT_JOINER, DEFAULT_PORT,
};
pub use hub::Hub;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::adapter::{AdapterRegistry, CommandAdapter};
use crate::error::Result;
use readiness::{Phase, ReadinessGate};

/// The resolved owner of one live connection
///
/// Every connector that delegates here holds the same `Arc`; the gate
/// makes the first connect a single-writer cycle and the client slot
/// is populated exactly once per cycle.
pub(crate) struct ConnectionOwner {
    params: ConnectionParams,
    registry: Arc<AdapterRegistry>,
    gate: ReadinessGate,
    client: RwLock<Option<Arc<dyn CommandAdapter>>>,
}

impl ConnectionOwner {
    pub(crate) fn new(params: ConnectionParams, registry: Arc<AdapterRegistry>) -> Self {
        ConnectionOwner {
            params,
            registry,
            gate: ReadinessGate::new(),
            client: RwLock::new(None),
        }
    }

    /// Wrap an already-live adapter (embedding, tests)
    pub(crate) fn preconnected(client: Arc<dyn CommandAdapter>) -> Self {
        let owner = ConnectionOwner {
            params: ConnectionParams::default(),
            registry: Arc::new(AdapterRegistry::empty()),
            gate: ReadinessGate::new(),
            client: RwLock::new(Some(client)),
        };
        owner.gate.begin_connect();
        owner.gate.signal_ready();
        owner
    }

    /// Idempotent connect; concurrent callers share one cycle
    pub(crate) async fn connect(&self) -> Result<Arc<dyn CommandAdapter>> {
        loop {
            if self.gate.phase() == Phase::Ready {
                if let Some(client) = self.client.read().await.clone() {
                    return Ok(client);
                }
            }
            if self.gate.begin_connect() {
                match self.registry.connect(&self.params).await {
                    Ok(client) => {
                        *self.client.write().await = Some(client.clone());
                        self.gate.signal_ready();
                        return Ok(client);
                    }
                    Err(err) => {
                        self.gate.reset();
                        return Err(err);
                    }
                }
            }
            self.gate.await_ready().await?;
        }
    }

    /// Idempotent teardown; resets readiness for the next cycle
    pub(crate) async fn disconnect(&self) -> Result<()> {
        let client = self.client.write().await.take();
        self.gate.reset();
        if let Some(client) = client {
            debug!("closing {} adapter", client.name());
            client.close().await?;
        }
        Ok(())
    }
}

/// Immutable context a child inherits from its parent
pub(crate) struct InheritedContext {
    pub(crate) segments: Vec<String>,
    pub(crate) joiner: String,
    pub(crate) brackets: bool,
    pub(crate) owner: Arc<ConnectionOwner>,
}

struct ConnectorInner {
    name: String,
    /// Accumulated prefix segments, root to this node
    segments: Vec<String>,
    joiner: String,
    brackets: bool,
    owner: Arc<ConnectionOwner>,
}

/// A namespaced connection point
///
/// Cheap to clone; all shared state lives in the resolved owner.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    pub(crate) fn from_inherited(name: &str, context: InheritedContext) -> Connector {
        Connector {
            inner: Arc::new(ConnectorInner {
                name: name.to_string(),
                segments: context.segments,
                joiner: context.joiner,
                brackets: context.brackets,
                owner: context.owner,
            }),
        }
    }

    /// A root connector with default local connection parameters and
    /// no prefix segment
    pub fn standalone(name: &str) -> Connector {
        Connector::with_options(name, DEFAULT_JOINER, false)
    }

    /// A root connector with an explicit joiner and bracket mode
    pub fn with_options(name: &str, joiner: &str, brackets: bool) -> Connector {
        Connector::from_inherited(
            name,
            InheritedContext {
                segments: Vec::new(),
                joiner: joiner.to_string(),
                brackets,
                owner: Arc::new(ConnectionOwner::new(
                    ConnectionParams::default(),
                    Arc::new(AdapterRegistry::new()),
                )),
            },
        )
    }

    /// A root connector over an externally supplied adapter
    pub fn with_adapter(name: &str, adapter: Arc<dyn CommandAdapter>) -> Connector {
        Connector::from_inherited(
            name,
            InheritedContext {
                segments: Vec::new(),
                joiner: DEFAULT_JOINER.to_string(),
                brackets: false,
                owner: Arc::new(ConnectionOwner::preconnected(adapter)),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Separator used between prefix segments
    pub fn joiner(&self) -> &str {
        &self.inner.joiner
    }

    /// Accumulated prefix, joined; empty when this node contributes
    /// no segments
    pub fn prefix(&self) -> String {
        self.inner.segments.join(&self.inner.joiner)
    }

    /// True when both nodes resolve to the same live connection
    pub fn shares_connection(&self, other: &Connector) -> bool {
        Arc::ptr_eq(&self.inner.owner, &other.inner.owner)
    }

    /// Child node inheriting the resolved owner, joiner, brackets and
    /// the prefix extended by `name`
    pub fn child(&self, name: &str) -> Connector {
        let mut segments = self.inner.segments.clone();
        segments.push(name.to_string());
        Connector::from_inherited(
            name,
            InheritedContext {
                segments,
                joiner: self.inner.joiner.clone(),
                brackets: self.inner.brackets,
                owner: self.inner.owner.clone(),
            },
        )
    }

    /// Fully qualify a logical key under this node's prefix
    ///
    /// In bracket mode the local key is wrapped in `{}` for store-side
    /// co-location, unless it is the `*` wildcard or already contains
    /// a brace.
    pub fn raw_key(&self, key: &str) -> String {
        let local = if self.inner.brackets && key != "*" && !key.contains('{') {
            format!("{{{}}}", key)
        } else {
            key.to_string()
        };
        if self.inner.segments.is_empty() {
            local
        } else {
            let mut raw = self.inner.segments.join(&self.inner.joiner);
            raw.push_str(&self.inner.joiner);
            raw.push_str(&local);
            raw
        }
    }

    /// Recover the logical key from a raw key produced by [`raw_key`]
    ///
    /// Exact left-inverse of `raw_key` for brace-free logical keys.
    ///
    /// [`raw_key`]: Connector::raw_key
    pub fn clean_key(&self, raw: &str) -> String {
        let stripped = if self.inner.segments.is_empty() {
            raw
        } else {
            let mut prefix = self.inner.segments.join(&self.inner.joiner);
            prefix.push_str(&self.inner.joiner);
            raw.strip_prefix(prefix.as_str()).unwrap_or(raw)
        };
        if self.inner.brackets
            && stripped.len() >= 2
            && stripped.starts_with('{')
            && stripped.ends_with('}')
        {
            stripped[1..stripped.len() - 1].to_string()
        } else {
            stripped.to_string()
        }
    }

    /// Establish the shared connection if needed
    pub async fn connect(&self) -> Result<()> {
        self.inner.owner.connect().await.map(|_| ())
    }

    /// Tear the shared connection down (owner side); idempotent
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.owner.disconnect().await
    }

    /// The live adapter, connecting lazily on first use
    pub async fn client(&self) -> Result<Arc<dyn CommandAdapter>> {
        self.inner.owner.connect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_no_prefix() {
        let connector = Connector::standalone("x");
        assert_eq!(connector.raw_key("key"), "key");
        assert_eq!(connector.child("a").raw_key("key"), "a:key");
        assert_eq!(connector.child("a").child("b").raw_key("key"), "a:b:key");
    }

    #[test]
    fn test_raw_key_brackets() {
        let connector = Connector::with_options("x", ":", true);
        assert_eq!(connector.raw_key("key"), "{key}");
        assert_eq!(connector.child("a").raw_key("key"), "a:{key}");
        assert_eq!(connector.child("a").child("b").raw_key("key"), "a:b:{key}");
    }

    #[test]
    fn test_brackets_skip_wildcard_and_braced() {
        let connector = Connector::with_options("x", ":", true);
        let child = connector.child("a");
        assert_eq!(child.raw_key("*"), "a:*");
        assert_eq!(child.raw_key("{key}"), "a:{key}");
    }

    #[test]
    fn test_clean_key_round_trip() {
        let connector = Connector::standalone("x").child("a").child("b");
        for key in ["3", "x:y", "*"] {
            assert_eq!(connector.clean_key(&connector.raw_key(key)), key);
        }
        let bracketed = Connector::with_options("x", ":", true).child("a");
        assert_eq!(bracketed.clean_key(&bracketed.raw_key("key")), "key");
        assert_eq!(bracketed.clean_key(&bracketed.raw_key("*")), "*");
    }

    #[test]
    fn test_child_prefix_equivalence() {
        // B.raw_key(k) == A.raw_key(p2 + joiner + k)
        let root = Connector::standalone("x").child("a");
        let child = root.child("b");
        assert_eq!(child.raw_key("k"), root.raw_key("b:k"));
    }

    #[test]
    fn test_custom_joiner() {
        let connector = Connector::with_options("x", "/", false);
        assert_eq!(connector.child("a").raw_key("k"), "a/k");
    }

    #[test]
    fn test_children_share_connection() {
        let root = Connector::standalone("x");
        let a = root.child("a");
        let b = a.child("b");
        assert!(root.shares_connection(&a));
        assert!(root.shares_connection(&b));
        assert!(!root.shares_connection(&Connector::standalone("y")));
    }

    #[tokio::test]
    async fn test_with_adapter_connects_immediately() {
        let adapter = Arc::new(crate::adapter::MemoryAdapter::new());
        let connector = Connector::with_adapter("x", adapter);
        let client = connector.client().await.unwrap();
        assert_eq!(client.name(), "memory");
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let adapter = Arc::new(crate::adapter::MemoryAdapter::new());
        let connector = Connector::with_adapter("x", adapter.clone());
        connector.client().await.unwrap();
        connector.disconnect().await.unwrap();
        // The preconnected owner has no registry entry to reconnect
        // through, so a fresh connect must fail rather than hand back
        // the closed client
        assert!(connector.client().await.is_err());
    }
}
