//! Pooled adapter
//!
//! Default network adapter, built on deadpool-redis. Every command
//! checks a connection out of the pool, so a blocking pop pins one
//! pooled connection while ordinary commands keep flowing on the
//! others.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

use super::commands;
use super::reply::Reply;
use super::{CommandAdapter, StreamMessage};
use crate::connector::ConnectionParams;
use crate::error::{Error, Result};

/// Adapter over a deadpool-redis connection pool
pub struct PooledAdapter {
    pool: deadpool_redis::Pool,
}

impl PooledAdapter {
    /// Build the pool and verify the store is reachable
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        if params.cluster == Some(true) {
            return Err(Error::Config(
                "cluster mode is not supported by the pooled adapter".to_string(),
            ));
        }
        let url = params.url();
        let mut config = deadpool_redis::Config::from_url(url.as_str());
        if let Some(max_size) = params.max_size {
            config.pool = Some(deadpool_redis::PoolConfig::new(max_size));
        }
        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| Error::Connection(e.into()))?;

        // Reachability check: pool creation itself is lazy
        let mut conn = pool.get().await.map_err(|e| Error::Connection(e.into()))?;
        commands::ping(&mut conn).await?;
        debug!("pooled adapter connected to {}", url);

        Ok(PooledAdapter { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Connection(e.into()))
    }
}

#[async_trait]
impl CommandAdapter for PooledAdapter {
    fn name(&self) -> &'static str {
        "pooled"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn().await?;
        commands::get(&mut conn, key).await
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        commands::set(&mut conn, key, value, expiry).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::delete(&mut conn, keys).await
    }

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        commands::expire(&mut conn, key, expiry).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        commands::keys(&mut conn, pattern).await
    }

    async fn hset(&self, key: &str, pairs: Vec<(String, Bytes)>) -> Result<()> {
        let mut conn = self.conn().await?;
        commands::hset(&mut conn, key, pairs).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn().await?;
        commands::hget(&mut conn, key, field).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut conn = self.conn().await?;
        commands::hmget(&mut conn, key, fields).await
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        let mut conn = self.conn().await?;
        commands::hgetall(&mut conn, key).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::hdel(&mut conn, key, fields).await
    }

    async fn rpush(&self, key: &str, value: Bytes) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::rpush(&mut conn, key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn().await?;
        commands::lpop(&mut conn, key).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let mut conn = self.conn().await?;
        commands::blpop(&mut conn, key, timeout).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let mut conn = self.conn().await?;
        commands::lrange(&mut conn, key, start, stop).await
    }

    async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::lrem(&mut conn, key, count, value).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::llen(&mut conn, key).await
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::zadd(&mut conn, key, score, member).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let mut conn = self.conn().await?;
        commands::zrange(&mut conn, key, start, stop).await
    }

    async fn zrem(&self, key: &str, member: Bytes) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::zrem(&mut conn, key, member).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::zcard(&mut conn, key).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        let mut conn = self.conn().await?;
        commands::eval(&mut conn, script, keys, args).await
    }

    async fn xadd(
        &self,
        key: &str,
        fields: Vec<(String, Bytes)>,
        maxlen: Option<u64>,
    ) -> Result<String> {
        let mut conn = self.conn().await?;
        commands::xadd(&mut conn, key, fields, maxlen).await
    }

    async fn xread(
        &self,
        key: &str,
        id: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn().await?;
        commands::xread(&mut conn, key, id, block, count).await
    }

    async fn xgroup_create(&self, key: &str, group: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        commands::xgroup_create(&mut conn, key, group).await
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
        let mut conn = self.conn().await?;
        commands::xread_group(&mut conn, key, group, consumer, block, count, noack).await
    }

    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::xack(&mut conn, key, group, id).await
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        commands::pfadd(&mut conn, key, member).await
    }

    async fn pfmerge(&self, destination: &str, source: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        commands::pfmerge(&mut conn, destination, source).await
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        commands::pfcount(&mut conn, key).await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}
