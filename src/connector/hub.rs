//! Connector hub
//!
//! The hub binds a configuration tree into connector nodes addressed
//! by dotted path, resolves delegation links into shared connection
//! owners, and drives root-level start/stop. Delegation is resolved
//! once, at bind time: dangling references and cycles fail here, not
//! at first use.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::{ConnectionSource, ConnectorConfig};
use super::{ConnectionOwner, Connector, InheritedContext};
use crate::adapter::AdapterRegistry;
use crate::error::{Error, Result};

/// One flattened configuration node
struct FlatNode {
    parent: Option<String>,
    /// Prefix segment this node contributes, if any
    segment: Option<String>,
    joiner: String,
    brackets: bool,
    source: ConnectionSource,
}

/// Registry of bound connector nodes
pub struct Hub {
    nodes: HashMap<String, Connector>,
    owners: Vec<Arc<ConnectionOwner>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("owners", &self.owners.len())
            .finish()
    }
}

impl Hub {
    /// Bind a tree of named connector configurations
    pub fn bind(configs: BTreeMap<String, ConnectorConfig>) -> Result<Hub> {
        Hub::bind_with_registry(configs, Arc::new(AdapterRegistry::new()))
    }

    /// Bind against a custom adapter registry
    pub fn bind_with_registry(
        configs: BTreeMap<String, ConnectorConfig>,
        registry: Arc<AdapterRegistry>,
    ) -> Result<Hub> {
        let mut flat: BTreeMap<String, FlatNode> = BTreeMap::new();
        for (name, config) in &configs {
            flatten(name, None, config, None, &mut flat)?;
        }

        // Resolve every node to the path of its owning connector
        let mut resolved: HashMap<String, String> = HashMap::new();
        for path in flat.keys() {
            let owner_path = resolve_owner(path, &flat)?;
            resolved.insert(path.clone(), owner_path);
        }

        // One shared owner per owning node
        let mut owners_by_path: HashMap<String, Arc<ConnectionOwner>> = HashMap::new();
        for (path, node) in &flat {
            if let ConnectionSource::Own(params) = &node.source {
                owners_by_path.insert(
                    path.clone(),
                    Arc::new(ConnectionOwner::new(params.clone(), registry.clone())),
                );
            }
        }

        let mut nodes = HashMap::new();
        for (path, node) in &flat {
            let owner_path = &resolved[path];
            let owner = owners_by_path[owner_path].clone();

            // Accumulate prefix segments from the nearest ancestors
            // sharing this node's resolved connector
            let mut segments: Vec<String> = Vec::new();
            if let Some(segment) = &node.segment {
                segments.push(segment.clone());
            }
            let mut cursor = node.parent.clone();
            while let Some(parent_path) = cursor {
                if resolved[&parent_path] != *owner_path {
                    break;
                }
                let parent = &flat[&parent_path];
                if let Some(segment) = &parent.segment {
                    segments.push(segment.clone());
                }
                cursor = parent.parent.clone();
            }
            segments.reverse();

            let name = path.rsplit('.').next().unwrap_or(path);
            let connector = Connector::from_inherited(
                name,
                InheritedContext {
                    segments,
                    joiner: node.joiner.clone(),
                    brackets: node.brackets,
                    owner,
                },
            );
            nodes.insert(path.clone(), connector);
        }

        debug!(
            "bound {} connector nodes over {} connections",
            nodes.len(),
            owners_by_path.len()
        );
        Ok(Hub {
            nodes,
            owners: owners_by_path.into_values().collect(),
        })
    }

    /// Look a bound node up by dotted path
    pub fn get(&self, path: &str) -> Option<Connector> {
        self.nodes.get(path).cloned()
    }

    /// All bound paths, sorted
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Establish every owned connection
    pub async fn start(&self) -> Result<()> {
        for owner in &self.owners {
            owner.connect().await?;
        }
        info!("hub started ({} connections)", self.owners.len());
        Ok(())
    }

    /// Tear every owned connection down
    pub async fn stop(&self) -> Result<()> {
        for owner in &self.owners {
            owner.disconnect().await?;
        }
        info!("hub stopped");
        Ok(())
    }
}

/// Flatten a configuration subtree into dotted-path nodes
fn flatten(
    path: &str,
    parent: Option<&str>,
    config: &ConnectorConfig,
    inherited: Option<(&str, bool)>,
    out: &mut BTreeMap<String, FlatNode>,
) -> Result<()> {
    let is_root = parent.is_none();
    let source = config
        .connection_source(is_root)
        .map_err(|err| match err {
            Error::Config(msg) => Error::Config(format!("{}: {}", path, msg)),
            other => other,
        })?;

    // Roots contribute a segment only when one is configured;
    // children default theirs to their own name
    let name = path.rsplit('.').next().unwrap_or(path);
    let segment = if is_root {
        config.prefix.clone()
    } else {
        Some(config.prefix.clone().unwrap_or_else(|| name.to_string()))
    };

    let joiner = config
        .joiner
        .as_deref()
        .or(inherited.map(|(joiner, _)| joiner))
        .unwrap_or(super::config::DEFAULT_JOINER)
        .to_string();
    let brackets = config
        .brackets
        .or(inherited.map(|(_, brackets)| brackets))
        .unwrap_or(false);

    for (child_name, child) in &config.children {
        let child_path = format!("{}.{}", path, child_name);
        flatten(
            &child_path,
            Some(path),
            child,
            Some((joiner.as_str(), brackets)),
            out,
        )?;
    }

    out.insert(
        path.to_string(),
        FlatNode {
            parent: parent.map(str::to_string),
            segment,
            joiner,
            brackets,
            source,
        },
    );
    Ok(())
}

/// Walk delegation references to the owning node
///
/// The walk memoizes nothing on its own; the hub calls it once per
/// node at bind time. Cycles and dangling references fail instead of
/// looping.
fn resolve_owner(path: &str, flat: &BTreeMap<String, FlatNode>) -> Result<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = path.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return Err(Error::Reference(format!(
                "connection reference cycle through {:?}",
                current
            )));
        }
        let node = flat.get(&current).ok_or_else(|| {
            Error::Reference(format!(
                "connection reference .{} does not name a configured connector",
                current
            ))
        })?;
        match &node.source {
            ConnectionSource::Own(_) => return Ok(current),
            ConnectionSource::Link(target) => current = target.clone(),
            ConnectionSource::ParentOwned => match &node.parent {
                Some(parent) => current = parent.clone(),
                None => {
                    return Err(Error::Reference(format!(
                        "root connector {:?} has no connection to share",
                        current
                    )))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(config: serde_json::Value) -> Result<Hub> {
        Hub::bind(serde_json::from_value(config).unwrap())
    }

    #[test]
    fn test_nested_prefixes() {
        let hub = bind(serde_json::json!({
            "connector": {
                "prefix": "a",
                "children": {
                    "b": {},
                    "c": {"prefix": "z"}
                }
            }
        }))
        .unwrap();

        let root = hub.get("connector").unwrap();
        assert_eq!(root.raw_key("3"), "a:3");
        assert_eq!(root.clean_key("a:3"), "3");

        let b = hub.get("connector.b").unwrap();
        assert_eq!(b.raw_key("3"), "a:b:3");
        let c = hub.get("connector.c").unwrap();
        assert_eq!(c.raw_key("3"), "a:z:3");

        // child-prefix equivalence
        assert_eq!(root.raw_key("b:x"), b.raw_key("x"));
        assert_eq!(root.raw_key("z:x"), c.raw_key("x"));
    }

    #[test]
    fn test_children_share_root_connection() {
        let hub = bind(serde_json::json!({
            "connector": {"prefix": "a", "children": {"b": {}}}
        }))
        .unwrap();
        let root = hub.get("connector").unwrap();
        let b = hub.get("connector.b").unwrap();
        assert!(root.shares_connection(&b));
    }

    #[test]
    fn test_link_shares_connection_not_prefix() {
        let hub = bind(serde_json::json!({
            "main": {"prefix": "a"},
            "dep": {"prefix": "d", "connection": ".main"}
        }))
        .unwrap();
        let main = hub.get("main").unwrap();
        let dep = hub.get("dep").unwrap();
        assert!(main.shares_connection(&dep));
        // the referenced connector's segments never leak in
        assert_eq!(dep.raw_key("3"), "d:3");
    }

    #[test]
    fn test_child_delegating_away_keeps_own_branch_only() {
        let hub = bind(serde_json::json!({
            "a": {
                "prefix": "a",
                "children": {"b": {"connection": ".other"}}
            },
            "other": {}
        }))
        .unwrap();
        let b = hub.get("a.b").unwrap();
        let other = hub.get("other").unwrap();
        assert!(b.shares_connection(&other));
        assert!(!b.shares_connection(&hub.get("a").unwrap()));
        // prefix accumulation stops at the connection boundary
        assert_eq!(b.raw_key("3"), "b:3");
    }

    #[test]
    fn test_dangling_reference_fails_at_bind() {
        let err = bind(serde_json::json!({
            "connector": {"connection": ".missing"}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Reference(_)));
    }

    #[test]
    fn test_reference_cycle_fails_at_bind() {
        let err = bind(serde_json::json!({
            "x": {"connection": ".y"},
            "y": {"connection": ".x"}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Reference(_)));
    }

    #[test]
    fn test_malformed_reference_fails_at_bind() {
        let err = bind(serde_json::json!({
            "connector": {"connection": "redis"}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_link_to_nested_node() {
        let hub = bind(serde_json::json!({
            "root": {"children": {"inner": {"dsn": "redis://localhost"}}},
            "dep": {"connection": ".root.inner"}
        }))
        .unwrap();
        let dep = hub.get("dep").unwrap();
        let inner = hub.get("root.inner").unwrap();
        assert!(dep.shares_connection(&inner));
    }

    #[test]
    fn test_brackets_inherited_by_children() {
        let hub = bind(serde_json::json!({
            "connector": {"prefix": "a", "brackets": true, "children": {"b": {}}}
        }))
        .unwrap();
        assert_eq!(hub.get("connector.b").unwrap().raw_key("x"), "a:b:{x}");
    }

    #[tokio::test]
    async fn test_start_and_stop_with_memory_adapter() {
        let hub = bind(serde_json::json!({
            "connector": {"prefix": "a", "client": "memory", "children": {"b": {}}}
        }))
        .unwrap();
        hub.start().await.unwrap();
        let b = hub.get("connector.b").unwrap();
        assert_eq!(b.client().await.unwrap().name(), "memory");
        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let hub = bind(serde_json::json!({
            "connector": {"client": "memory", "children": {"b": {}, "c": {}}}
        }))
        .unwrap();
        let b = hub.get("connector.b").unwrap();
        let c = hub.get("connector.c").unwrap();
        let (left, right) = tokio::join!(b.client(), c.client());
        let left = left.unwrap();
        let right = right.unwrap();
        // both children settled on the very same adapter instance
        assert!(Arc::ptr_eq(&left, &right));
    }
}
