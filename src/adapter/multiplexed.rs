//! Multiplexed adapter
//!
//! Secondary network adapter over a single auto-reconnecting
//! multiplexed connection. Lighter than the pool, but a blocking pop
//! stalls every command sharing the pipe, hence its lower registry
//! priority.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

use super::commands;
use super::reply::Reply;
use super::{CommandAdapter, StreamMessage};
use crate::connector::ConnectionParams;
use crate::error::{Error, Result};

/// Adapter over `redis::aio::ConnectionManager`
pub struct MultiplexedAdapter {
    manager: ConnectionManager,
}

impl MultiplexedAdapter {
    /// Open the managed connection and verify the store is reachable
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        if params.cluster == Some(true) {
            return Err(Error::Config(
                "cluster mode is not supported by the multiplexed adapter".to_string(),
            ));
        }
        let url = params.url();
        let client = redis::Client::open(url.as_str()).map_err(|e| Error::Connection(e.into()))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Connection(e.into()))?;
        commands::ping(&mut manager).await?;
        if let Some(client_id) = &params.client_id {
            let _: () = redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(client_id)
                .query_async(&mut manager)
                .await?;
        }
        debug!("multiplexed adapter connected to {}", url);

        Ok(MultiplexedAdapter { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl CommandAdapter for MultiplexedAdapter {
    fn name(&self) -> &'static str {
        "multiplexed"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        commands::get(&mut self.conn(), key).await
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<()> {
        commands::set(&mut self.conn(), key, value, expiry).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        commands::delete(&mut self.conn(), keys).await
    }

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool> {
        commands::expire(&mut self.conn(), key, expiry).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        commands::keys(&mut self.conn(), pattern).await
    }

    async fn hset(&self, key: &str, pairs: Vec<(String, Bytes)>) -> Result<()> {
        commands::hset(&mut self.conn(), key, pairs).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        commands::hget(&mut self.conn(), key, field).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>> {
        commands::hmget(&mut self.conn(), key, fields).await
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        commands::hgetall(&mut self.conn(), key).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        commands::hdel(&mut self.conn(), key, fields).await
    }

    async fn rpush(&self, key: &str, value: Bytes) -> Result<u64> {
        commands::rpush(&mut self.conn(), key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        commands::lpop(&mut self.conn(), key).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        commands::blpop(&mut self.conn(), key, timeout).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        commands::lrange(&mut self.conn(), key, start, stop).await
    }

    async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<u64> {
        commands::lrem(&mut self.conn(), key, count, value).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        commands::llen(&mut self.conn(), key).await
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<u64> {
        commands::zadd(&mut self.conn(), key, score, member).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        commands::zrange(&mut self.conn(), key, start, stop).await
    }

    async fn zrem(&self, key: &str, member: Bytes) -> Result<u64> {
        commands::zrem(&mut self.conn(), key, member).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        commands::zcard(&mut self.conn(), key).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        commands::eval(&mut self.conn(), script, keys, args).await
    }

    async fn xadd(
        &self,
        key: &str,
        fields: Vec<(String, Bytes)>,
        maxlen: Option<u64>,
    ) -> Result<String> {
        commands::xadd(&mut self.conn(), key, fields, maxlen).await
    }

    async fn xread(
        &self,
        key: &str,
        id: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        commands::xread(&mut self.conn(), key, id, block, count).await
    }

    async fn xgroup_create(&self, key: &str, group: &str) -> Result<bool> {
        commands::xgroup_create(&mut self.conn(), key, group).await
    }

    async fn xread_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
        noack: bool,
    ) -> Result<Vec<StreamMessage>> {
        commands::xread_group(&mut self.conn(), key, group, consumer, block, count, noack).await
    }

    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64> {
        commands::xack(&mut self.conn(), key, group, id).await
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<bool> {
        commands::pfadd(&mut self.conn(), key, member).await
    }

    async fn pfmerge(&self, destination: &str, source: &str) -> Result<()> {
        commands::pfmerge(&mut self.conn(), destination, source).await
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        commands::pfcount(&mut self.conn(), key).await
    }

    async fn close(&self) -> Result<()> {
        // The managed connection closes when the last clone drops
        Ok(())
    }
}
