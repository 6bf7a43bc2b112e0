//! Adapter registry
//!
//! Named adapters with explicit priorities. At connect time the
//! registry either loads the adapter the configuration names (failure
//! fatal) or scans the implicit entries in descending priority and
//! keeps the first that connects.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use super::{CommandAdapter, MemoryAdapter, MultiplexedAdapter, PooledAdapter};
use crate::connector::ConnectionParams;
use crate::error::{Error, Result};

/// Factory signature for one adapter
pub type ConnectFn =
    for<'a> fn(&'a ConnectionParams) -> BoxFuture<'a, Result<Arc<dyn CommandAdapter>>>;

/// One registered adapter
pub struct AdapterEntry {
    name: &'static str,
    priority: u8,
    /// Implicit entries participate in the unnamed fallback scan;
    /// explicit-only ones must be requested by name
    implicit: bool,
    connect: ConnectFn,
}

impl AdapterEntry {
    pub fn new(name: &'static str, priority: u8, implicit: bool, connect: ConnectFn) -> Self {
        AdapterEntry {
            name,
            priority,
            implicit,
            connect,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Registry of all available adapters
pub struct AdapterRegistry {
    entries: Vec<AdapterEntry>,
}

fn connect_pooled(params: &ConnectionParams) -> BoxFuture<'_, Result<Arc<dyn CommandAdapter>>> {
    Box::pin(async move {
        let adapter = PooledAdapter::connect(params).await?;
        Ok(Arc::new(adapter) as Arc<dyn CommandAdapter>)
    })
}

fn connect_multiplexed(
    params: &ConnectionParams,
) -> BoxFuture<'_, Result<Arc<dyn CommandAdapter>>> {
    Box::pin(async move {
        let adapter = MultiplexedAdapter::connect(params).await?;
        Ok(Arc::new(adapter) as Arc<dyn CommandAdapter>)
    })
}

fn connect_memory(params: &ConnectionParams) -> BoxFuture<'_, Result<Arc<dyn CommandAdapter>>> {
    Box::pin(async move {
        let adapter = MemoryAdapter::connect(params).await?;
        Ok(Arc::new(adapter) as Arc<dyn CommandAdapter>)
    })
}

impl AdapterRegistry {
    /// Create a registry with the bundled adapters registered
    pub fn new() -> Self {
        let mut registry = AdapterRegistry::empty();
        registry.register(AdapterEntry::new("pooled", 20, true, connect_pooled));
        registry.register(AdapterEntry::new("multiplexed", 10, true, connect_multiplexed));
        // Never part of the fallback scan: a down store must surface,
        // not degrade to process-local state
        registry.register(AdapterEntry::new("memory", 0, false, connect_memory));
        registry
    }

    /// Create a registry with no adapters
    pub fn empty() -> Self {
        AdapterRegistry {
            entries: Vec::new(),
        }
    }

    /// Register an adapter, keeping entries ordered by priority
    pub fn register(&mut self, entry: AdapterEntry) {
        self.entries.push(entry);
        self.entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Registered adapter names, highest priority first
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Select and connect an adapter for these parameters
    ///
    /// An explicitly named adapter that is unknown or fails to connect
    /// is fatal; the unnamed scan keeps the first implicit adapter
    /// that connects and fails only when all of them do.
    pub async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn CommandAdapter>> {
        if let Some(name) = &params.client {
            let entry = self
                .entries
                .iter()
                .find(|e| e.name == name.as_str())
                .ok_or_else(|| Error::Config(format!("unknown adapter {:?}", name)))?;
            debug!("connecting via requested {} adapter", entry.name);
            return (entry.connect)(params).await;
        }

        let mut last_failure = None;
        for entry in self.entries.iter().filter(|e| e.implicit) {
            match (entry.connect)(params).await {
                Ok(client) => {
                    debug!("connected via {} adapter", entry.name);
                    return Ok(client);
                }
                Err(err) => {
                    debug!("adapter {} failed to load: {}", entry.name, err);
                    last_failure = Some(err);
                }
            }
        }
        Err(last_failure.unwrap_or_else(|| {
            Error::Config("no implicit adapters are registered".to_string())
        }))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
