//! Shared command builders
//!
//! Both network adapters execute the same commands over a
//! `redis::aio::ConnectionLike`; only connection acquisition differs.
//! Keeping the builders here keeps the two adapters byte-identical in
//! behavior.

use bytes::Bytes;
use redis::aio::ConnectionLike;
use std::collections::HashMap;
use std::time::Duration;

use super::reply::Reply;
use super::{is_busygroup, parse_stream_reply, StreamMessage};
use crate::error::Result;

pub(super) async fn ping<C>(conn: &mut C) -> Result<()>
where
    C: ConnectionLike + Send,
{
    let _pong: String = redis::cmd("PING").query_async(conn).await?;
    Ok(())
}

pub(super) async fn get<C>(conn: &mut C, key: &str) -> Result<Option<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(conn).await?;
    Ok(raw.map(Bytes::from))
}

pub(super) async fn set<C>(
    conn: &mut C,
    key: &str,
    value: Bytes,
    expiry: Option<Duration>,
) -> Result<()>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(&value[..]);
    if let Some(expiry) = expiry {
        cmd.arg("EX").arg(expiry.as_secs().max(1));
    }
    let _: () = cmd.query_async(conn).await?;
    Ok(())
}

pub(super) async fn delete<C>(conn: &mut C, keys: &[String]) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    if keys.is_empty() {
        return Ok(0);
    }
    let mut cmd = redis::cmd("DEL");
    for key in keys {
        cmd.arg(key);
    }
    let removed: u64 = cmd.query_async(conn).await?;
    Ok(removed)
}

pub(super) async fn expire<C>(conn: &mut C, key: &str, expiry: Duration) -> Result<bool>
where
    C: ConnectionLike + Send,
{
    let applied: bool = redis::cmd("EXPIRE")
        .arg(key)
        .arg(expiry.as_secs().max(1))
        .query_async(conn)
        .await?;
    Ok(applied)
}

pub(super) async fn keys<C>(conn: &mut C, pattern: &str) -> Result<Vec<String>>
where
    C: ConnectionLike + Send,
{
    let found: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(conn).await?;
    Ok(found)
}

pub(super) async fn hset<C>(conn: &mut C, key: &str, pairs: Vec<(String, Bytes)>) -> Result<()>
where
    C: ConnectionLike + Send,
{
    if pairs.is_empty() {
        return Ok(());
    }
    let mut cmd = redis::cmd("HSET");
    cmd.arg(key);
    for (field, value) in &pairs {
        cmd.arg(field).arg(&value[..]);
    }
    let _new_fields: i64 = cmd.query_async(conn).await?;
    Ok(())
}

pub(super) async fn hget<C>(conn: &mut C, key: &str, field: &str) -> Result<Option<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Option<Vec<u8>> = redis::cmd("HGET")
        .arg(key)
        .arg(field)
        .query_async(conn)
        .await?;
    Ok(raw.map(Bytes::from))
}

pub(super) async fn hmget<C>(
    conn: &mut C,
    key: &str,
    fields: &[String],
) -> Result<Vec<Option<Bytes>>>
where
    C: ConnectionLike + Send,
{
    if fields.is_empty() {
        return Ok(Vec::new());
    }
    let mut cmd = redis::cmd("HMGET");
    cmd.arg(key);
    for field in fields {
        cmd.arg(field);
    }
    let raw: Vec<Option<Vec<u8>>> = cmd.query_async(conn).await?;
    Ok(raw.into_iter().map(|v| v.map(Bytes::from)).collect())
}

pub(super) async fn hgetall<C>(conn: &mut C, key: &str) -> Result<Vec<(String, Bytes)>>
where
    C: ConnectionLike + Send,
{
    let raw: HashMap<String, Vec<u8>> = redis::cmd("HGETALL").arg(key).query_async(conn).await?;
    Ok(raw
        .into_iter()
        .map(|(field, value)| (field, Bytes::from(value)))
        .collect())
}

pub(super) async fn hdel<C>(conn: &mut C, key: &str, fields: &[String]) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    if fields.is_empty() {
        return Ok(0);
    }
    let mut cmd = redis::cmd("HDEL");
    cmd.arg(key);
    for field in fields {
        cmd.arg(field);
    }
    let removed: u64 = cmd.query_async(conn).await?;
    Ok(removed)
}

pub(super) async fn rpush<C>(conn: &mut C, key: &str, value: Bytes) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let len: u64 = redis::cmd("RPUSH")
        .arg(key)
        .arg(&value[..])
        .query_async(conn)
        .await?;
    Ok(len)
}

pub(super) async fn lpop<C>(conn: &mut C, key: &str) -> Result<Option<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Option<Vec<u8>> = redis::cmd("LPOP").arg(key).query_async(conn).await?;
    Ok(raw.map(Bytes::from))
}

pub(super) async fn blpop<C>(conn: &mut C, key: &str, timeout: Duration) -> Result<Option<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
        .arg(key)
        .arg(timeout.as_secs_f64())
        .query_async(conn)
        .await?;
    Ok(raw.map(|(_key, value)| Bytes::from(value)))
}

pub(super) async fn lrange<C>(conn: &mut C, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Vec<Vec<u8>> = redis::cmd("LRANGE")
        .arg(key)
        .arg(start)
        .arg(stop)
        .query_async(conn)
        .await?;
    Ok(raw.into_iter().map(Bytes::from).collect())
}

pub(super) async fn lrem<C>(conn: &mut C, key: &str, count: i64, value: Bytes) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let removed: u64 = redis::cmd("LREM")
        .arg(key)
        .arg(count)
        .arg(&value[..])
        .query_async(conn)
        .await?;
    Ok(removed)
}

pub(super) async fn llen<C>(conn: &mut C, key: &str) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let len: u64 = redis::cmd("LLEN").arg(key).query_async(conn).await?;
    Ok(len)
}

pub(super) async fn zadd<C>(conn: &mut C, key: &str, score: f64, member: Bytes) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let added: u64 = redis::cmd("ZADD")
        .arg(key)
        .arg(score)
        .arg(&member[..])
        .query_async(conn)
        .await?;
    Ok(added)
}

pub(super) async fn zrange<C>(conn: &mut C, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>>
where
    C: ConnectionLike + Send,
{
    let raw: Vec<Vec<u8>> = redis::cmd("ZRANGE")
        .arg(key)
        .arg(start)
        .arg(stop)
        .query_async(conn)
        .await?;
    Ok(raw.into_iter().map(Bytes::from).collect())
}

pub(super) async fn zrem<C>(conn: &mut C, key: &str, member: Bytes) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let removed: u64 = redis::cmd("ZREM")
        .arg(key)
        .arg(&member[..])
        .query_async(conn)
        .await?;
    Ok(removed)
}

pub(super) async fn zcard<C>(conn: &mut C, key: &str) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let count: u64 = redis::cmd("ZCARD").arg(key).query_async(conn).await?;
    Ok(count)
}

pub(super) async fn eval<C>(
    conn: &mut C,
    script: &str,
    keys: &[String],
    args: &[String],
) -> Result<Reply>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(script).arg(keys.len());
    for key in keys {
        cmd.arg(key);
    }
    for arg in args {
        cmd.arg(arg);
    }
    let value: redis::Value = cmd.query_async(conn).await?;
    Ok(Reply::from(value))
}

pub(super) async fn xadd<C>(
    conn: &mut C,
    key: &str,
    fields: Vec<(String, Bytes)>,
    maxlen: Option<u64>,
) -> Result<String>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("XADD");
    cmd.arg(key);
    if let Some(maxlen) = maxlen {
        cmd.arg("MAXLEN").arg("~").arg(maxlen);
    }
    cmd.arg("*");
    for (field, value) in &fields {
        cmd.arg(field).arg(&value[..]);
    }
    let id: String = cmd.query_async(conn).await?;
    Ok(id)
}

pub(super) async fn xread<C>(
    conn: &mut C,
    key: &str,
    id: &str,
    block: Duration,
    count: usize,
) -> Result<Vec<StreamMessage>>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("XREAD");
    cmd.arg("COUNT").arg(count);
    cmd.arg("BLOCK").arg(block.as_millis() as u64);
    cmd.arg("STREAMS").arg(key).arg(id);
    let value: redis::Value = cmd.query_async(conn).await?;
    Ok(parse_stream_reply(&Reply::from(value)))
}

pub(super) async fn xgroup_create<C>(conn: &mut C, key: &str, group: &str) -> Result<bool>
where
    C: ConnectionLike + Send,
{
    let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(key)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;
    match created {
        Ok(()) => Ok(true),
        Err(err) if is_busygroup(&err) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub(super) async fn xread_group<C>(
    conn: &mut C,
    key: &str,
    group: &str,
    consumer: &str,
    block: Duration,
    count: usize,
    noack: bool,
) -> Result<Vec<StreamMessage>>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("XREADGROUP");
    cmd.arg("GROUP").arg(group).arg(consumer);
    cmd.arg("COUNT").arg(count);
    cmd.arg("BLOCK").arg(block.as_millis() as u64);
    if noack {
        cmd.arg("NOACK");
    }
    cmd.arg("STREAMS").arg(key).arg(">");
    let value: redis::Value = cmd.query_async(conn).await?;
    Ok(parse_stream_reply(&Reply::from(value)))
}

pub(super) async fn xack<C>(conn: &mut C, key: &str, group: &str, id: &str) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let acked: u64 = redis::cmd("XACK")
        .arg(key)
        .arg(group)
        .arg(id)
        .query_async(conn)
        .await?;
    Ok(acked)
}

pub(super) async fn pfadd<C>(conn: &mut C, key: &str, member: &str) -> Result<bool>
where
    C: ConnectionLike + Send,
{
    let changed: bool = redis::cmd("PFADD")
        .arg(key)
        .arg(member)
        .query_async(conn)
        .await?;
    Ok(changed)
}

pub(super) async fn pfmerge<C>(conn: &mut C, destination: &str, source: &str) -> Result<()>
where
    C: ConnectionLike + Send,
{
    let _: () = redis::cmd("PFMERGE")
        .arg(destination)
        .arg(source)
        .query_async(conn)
        .await?;
    Ok(())
}

pub(super) async fn pfcount<C>(conn: &mut C, key: &str) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let count: u64 = redis::cmd("PFCOUNT").arg(key).query_async(conn).await?;
    Ok(count)
}
