//! FerrumLink - Namespaced Redis access for queues and storages
//!
//! FerrumLink is designed with strong cohesion and loose coupling principles:
//! - The connector graph resolves namespaces and shares lazily-opened
//!   connections across a tree of logical nodes
//! - Command adapters hide the concrete client library behind one
//!   uniform interface, selected by a priority-ordered registry
//! - Queue and storage primitives speak only to their connector and
//!   its adapter

pub mod adapter;
pub mod codec;
pub mod connector;
pub mod error;
pub mod queue;
pub mod storage;

/// Re-export commonly used types
pub use adapter::{AdapterEntry, AdapterRegistry, CommandAdapter, Reply, StreamMessage};
pub use connector::{ConnectionParams, Connector, ConnectorConfig, Hub};
pub use error::{Error, Result};
pub use queue::{
    Queue, QueueConfig, Record, ScoreQueue, ScoreQueueConfig, StreamQueue, StreamQueueConfig,
    TimestampQueue,
};
pub use storage::{HashStorage, HyperLogLogStorage, Storage, StorageConfig};
