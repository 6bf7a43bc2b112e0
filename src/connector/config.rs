//! Connector configuration
//!
//! Configuration trees are plain serde structures. Delegation strings
//! are validated here, at bind time: a `connection` string must either
//! be a `.dotted.path` reference to another configured node or a full
//! URI; anything else is a configuration error before any network I/O
//! happens.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Default prefix joiner
pub const DEFAULT_JOINER: &str = ":";

/// Default store host
pub const DEFAULT_HOST: &str = "localhost";

/// Default store port
pub const DEFAULT_PORT: u16 = 6379;

/// Inline connection parameters
///
/// Precedence when resolving the target URI: `dsn` over `address` over
/// `host`/`port` (which default to `localhost:6379`).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionParams {
    /// Full URI, highest priority
    pub dsn: Option<String>,

    /// URI-style address, next priority
    pub address: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,

    /// Logical database index
    pub db: Option<u32>,

    /// Pool bounds; `min_size` is accepted for compatibility and
    /// ignored by the bundled adapters
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Adapter name override
    pub client: Option<String>,

    /// Cluster-mode flag; rejected by the bundled adapters
    pub cluster: Option<bool>,

    /// Client identifier handed to the store
    pub client_id: Option<String>,
}

impl ConnectionParams {
    /// True when any connection-endpoint field is set
    pub fn is_configured(&self) -> bool {
        self.dsn.is_some()
            || self.address.is_some()
            || self.host.is_some()
            || self.port.is_some()
            || self.db.is_some()
    }

    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merged_with(&self, other: &ConnectionParams) -> ConnectionParams {
        ConnectionParams {
            dsn: other.dsn.clone().or_else(|| self.dsn.clone()),
            address: other.address.clone().or_else(|| self.address.clone()),
            host: other.host.clone().or_else(|| self.host.clone()),
            port: other.port.or(self.port),
            db: other.db.or(self.db),
            min_size: other.min_size.or(self.min_size),
            max_size: other.max_size.or(self.max_size),
            username: other.username.clone().or_else(|| self.username.clone()),
            password: other.password.clone().or_else(|| self.password.clone()),
            client: other.client.clone().or_else(|| self.client.clone()),
            cluster: other.cluster.or(self.cluster),
            client_id: other.client_id.clone().or_else(|| self.client_id.clone()),
        }
    }

    /// Resolve the connection URI by parameter precedence
    pub fn url(&self) -> String {
        if let Some(dsn) = &self.dsn {
            return dsn.clone();
        }
        if let Some(address) = &self.address {
            return address.clone();
        }
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        let port = self.port.unwrap_or(DEFAULT_PORT);
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        match self.db {
            Some(db) => format!("redis://{}{}:{}/{}", auth, host, port, db),
            None => format!("redis://{}{}:{}", auth, host, port),
        }
    }
}

/// Either inline parameters or a textual reference
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConnectionRef {
    /// `.dotted.path` to another node, or a bare URI string
    Text(String),

    /// Inline parameter map
    Inline(ConnectionParams),
}

/// A validated connection reference
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSource {
    /// This node owns a connection with these parameters
    Own(ConnectionParams),

    /// Delegate to the node at this dotted path
    Link(String),

    /// Delegate to the nearest owning ancestor
    ParentOwned,
}

/// Configuration for one connector node and its subtree
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Prefix segment contributed by this node; children default to
    /// their own name, roots to no segment
    pub prefix: Option<String>,

    /// Separator between prefix segments
    pub joiner: Option<String>,

    /// Hash-tag mode: wrap the final key segment in `{}`; unset
    /// inherits the parent's mode
    pub brackets: Option<bool>,

    /// Connection parameters, URI, or `.dotted.path` delegation
    pub connection: Option<ConnectionRef>,

    /// Top-level connection parameters (merged under `connection`
    /// when both are present)
    #[serde(flatten)]
    pub params: ConnectionParams,

    /// Nested child connectors
    pub children: BTreeMap<String, ConnectorConfig>,
}

impl ConnectorConfig {
    /// Effective joiner for this node
    pub fn joiner(&self) -> &str {
        self.joiner.as_deref().unwrap_or(DEFAULT_JOINER)
    }

    /// Classify this node's connection, validating delegation strings
    ///
    /// `is_root` decides the fallback for nodes with no connection
    /// configuration at all: roots own a default local connection,
    /// children share their parent's.
    pub fn connection_source(&self, is_root: bool) -> Result<ConnectionSource> {
        match &self.connection {
            Some(ConnectionRef::Text(text)) => {
                if let Some(path) = text.strip_prefix('.') {
                    if path.is_empty() {
                        return Err(Error::Config(
                            "empty connection reference \".\"".to_string(),
                        ));
                    }
                    Ok(ConnectionSource::Link(path.to_string()))
                } else if text.contains("://") {
                    let mut params = self.params.clone();
                    params.address = Some(text.clone());
                    Ok(ConnectionSource::Own(params))
                } else {
                    Err(Error::Config(format!(
                        "malformed connection reference {:?}: expected a \
                         .dotted.path or a URI",
                        text
                    )))
                }
            }
            Some(ConnectionRef::Inline(inline)) => {
                Ok(ConnectionSource::Own(self.params.merged_with(inline)))
            }
            None if self.params.is_configured() || is_root => {
                Ok(ConnectionSource::Own(self.params.clone()))
            }
            None => Ok(ConnectionSource::ParentOwned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(config: serde_json::Value) -> ConnectorConfig {
        serde_json::from_value(config).unwrap()
    }

    #[test]
    fn test_url_precedence() {
        let params = ConnectionParams {
            dsn: Some("redis://dsn:1".to_string()),
            address: Some("redis://addr:2".to_string()),
            host: Some("h".to_string()),
            ..Default::default()
        };
        assert_eq!(params.url(), "redis://dsn:1");

        let params = ConnectionParams {
            address: Some("redis://addr:2".to_string()),
            host: Some("h".to_string()),
            ..Default::default()
        };
        assert_eq!(params.url(), "redis://addr:2");

        let params = ConnectionParams::default();
        assert_eq!(params.url(), "redis://localhost:6379");
    }

    #[test]
    fn test_url_with_auth_and_db() {
        let params = ConnectionParams {
            host: Some("store".to_string()),
            port: Some(6380),
            db: Some(3),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            ..Default::default()
        };
        assert_eq!(params.url(), "redis://u:p@store:6380/3");
    }

    #[test]
    fn test_connection_link() {
        let config = parse(serde_json::json!({"connection": ".connector"}));
        assert_eq!(
            config.connection_source(true).unwrap(),
            ConnectionSource::Link("connector".to_string())
        );
    }

    #[test]
    fn test_connection_uri() {
        let config = parse(serde_json::json!({"connection": "redis://localhost"}));
        match config.connection_source(true).unwrap() {
            ConnectionSource::Own(params) => {
                assert_eq!(params.url(), "redis://localhost");
            }
            other => panic!("expected Own, got {:?}", other),
        }
    }

    #[test]
    fn test_connection_inline_map() {
        let config = parse(serde_json::json!({
            "connection": {"address": "redis://localhost", "max_size": 4}
        }));
        match config.connection_source(true).unwrap() {
            ConnectionSource::Own(params) => {
                assert_eq!(params.address.as_deref(), Some("redis://localhost"));
                assert_eq!(params.max_size, Some(4));
            }
            other => panic!("expected Own, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_link_fails_at_bind() {
        let config = parse(serde_json::json!({"connection": "redis"}));
        let err = config.connection_source(true).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unconfigured_child_delegates_to_parent() {
        let config = parse(serde_json::json!({"prefix": "b"}));
        assert_eq!(
            config.connection_source(false).unwrap(),
            ConnectionSource::ParentOwned
        );
        assert!(matches!(
            config.connection_source(true).unwrap(),
            ConnectionSource::Own(_)
        ));
    }

    #[test]
    fn test_dsn_in_connector_config() {
        let config = parse(serde_json::json!({"dsn": "redis://localhost"}));
        match config.connection_source(true).unwrap() {
            ConnectionSource::Own(params) => {
                assert_eq!(params.url(), "redis://localhost");
            }
            other => panic!("expected Own, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_children_parse() {
        let config = parse(serde_json::json!({
            "prefix": "a",
            "children": {
                "b": {},
                "c": {"prefix": "z"}
            }
        }));
        assert_eq!(config.children.len(), 2);
        assert_eq!(config.children["c"].prefix.as_deref(), Some("z"));
    }
}
