//! In-memory adapter
//!
//! Process-local implementation of the full command surface, for
//! tests and development. Never chosen by the fallback scan: it must
//! be requested by name (`client: "memory"`) so a down store cannot
//! silently degrade to process-local state. Data lives only as long
//! as the adapter instance; a disconnect/connect cycle starts empty.
//!
//! Having no script interpreter, `eval` recognizes the library's own
//! two queue scripts by text and runs their semantics natively.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::{Mutex, Notify};

use super::reply::Reply;
use super::{CommandAdapter, StreamMessage};
use crate::connector::ConnectionParams;
use crate::error::{Error, Result};
use crate::queue::scripts;

/// Process-local command adapter
pub struct MemoryAdapter {
    state: Mutex<State>,
    notify: Notify,
}

/// Represents the different types of values that can be stored
enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<String, Bytes>),
    /// Sorted set, kept ordered by (score, member)
    Scored(Vec<(f64, Bytes)>),
    Stream(StreamLog),
    /// Exact stand-in for a cardinality estimator
    Estimator(HashSet<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Scored(_) => "zset",
            Value::Stream(_) => "stream",
            Value::Estimator(_) => "hyperloglog",
        }
    }
}

/// A single entry with optional expiration
struct Entry {
    value: Value,
    expire_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Entry {
            value,
            expire_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        match self.expire_at {
            Some(expire_at) => Instant::now() >= expire_at,
            None => false,
        }
    }
}

/// Append-only stream with per-group delivery cursors
#[derive(Default)]
struct StreamLog {
    /// (sequence, fields); ids render as `{sequence}-0`
    entries: VecDeque<(u64, Vec<(String, Bytes)>)>,
    next_seq: u64,
    /// group name -> last delivered sequence
    cursors: HashMap<String, u64>,
    /// group name -> delivered-but-unacknowledged sequences
    pending: HashMap<String, HashSet<u64>>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
}

fn wrong_type(expected: &'static str, found: &'static str) -> Error {
    Error::Command(redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE",
        format!("expected {}, key holds {}", expected, found),
    )))
}

/// Normalize an inclusive Redis-style range with negative indices
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Match a key against a glob pattern (the `*` subset used by
/// prefix scans)
fn glob_match(key: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => key == pattern,
    }
}

impl State {
    /// Get a live entry, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        if self.entries.get(key).map(Entry::is_expired).unwrap_or(false) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn list_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut VecDeque<Bytes>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::List(VecDeque::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(other) => Err(wrong_type("list", other.type_name())),
            None => Ok(None),
        }
    }

    fn hash_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut HashMap<String, Bytes>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::Hash(HashMap::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(other) => Err(wrong_type("hash", other.type_name())),
            None => Ok(None),
        }
    }

    fn scored_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut Vec<(f64, Bytes)>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::Scored(Vec::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Scored(members)) => Ok(Some(members)),
            Some(other) => Err(wrong_type("zset", other.type_name())),
            None => Ok(None),
        }
    }

    fn stream_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut StreamLog>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::Stream(StreamLog::default())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Stream(log)) => Ok(Some(log)),
            Some(other) => Err(wrong_type("stream", other.type_name())),
            None => Ok(None),
        }
    }

    fn estimator_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut HashSet<String>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries
                .insert(key.to_string(), Entry::new(Value::Estimator(HashSet::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Estimator(members)) => Ok(Some(members)),
            Some(other) => Err(wrong_type("hyperloglog", other.type_name())),
            None => Ok(None),
        }
    }

    /// Drop a container entry once it has emptied, the way the store
    /// removes empty aggregates
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::List(list)) => list.is_empty(),
            Some(Value::Hash(hash)) => hash.is_empty(),
            Some(Value::Scored(members)) => members.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn lpop(&mut self, key: &str) -> Result<Option<Bytes>> {
        let popped = match self.list_mut(key, false)? {
            Some(list) => list.pop_front(),
            None => None,
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    /// Atomically pop the lowest-scored member; `gate` only pops when
    /// the score is strictly below the given bound
    fn pop_lowest(&mut self, key: &str, gate: Option<f64>) -> Result<Reply> {
        let members = match self.scored_mut(key, false)? {
            Some(members) if !members.is_empty() => members,
            _ => return Ok(Reply::Array(Vec::new())),
        };
        let lowest = members[0].0;
        if let Some(now) = gate {
            if lowest >= now {
                return Ok(Reply::Nil);
            }
        }
        let (score, member) = members.remove(0);
        self.drop_if_empty(key);
        Ok(Reply::array(vec![
            Reply::Data(member),
            Reply::data(format!("{}", score)),
        ]))
    }

    /// Deliver up to `count` undelivered entries to a group consumer
    fn stream_read(
        &mut self,
        key: &str,
        group: &str,
        count: usize,
        noack: bool,
    ) -> Result<Vec<StreamMessage>> {
        let log = match self.stream_mut(key, false)? {
            Some(log) => log,
            None => {
                return Err(Error::Command(redis::RedisError::from((
                    redis::ErrorKind::ResponseError,
                    "NOGROUP",
                    format!("no such stream {:?}", key),
                ))))
            }
        };
        let cursor = match log.cursors.get(group) {
            Some(cursor) => *cursor,
            None => {
                return Err(Error::Command(redis::RedisError::from((
                    redis::ErrorKind::ResponseError,
                    "NOGROUP",
                    format!("no such consumer group {:?}", group),
                ))))
            }
        };
        let mut delivered = Vec::new();
        let mut last = cursor;
        for (seq, fields) in log.entries.iter() {
            if *seq <= cursor {
                continue;
            }
            delivered.push(StreamMessage {
                id: format!("{}-0", seq),
                fields: fields.clone(),
            });
            last = *seq;
            if !noack {
                log.pending.entry(group.to_string()).or_default().insert(*seq);
            }
            if delivered.len() >= count {
                break;
            }
        }
        log.cursors.insert(group.to_string(), last);
        Ok(delivered)
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Registry entry point; parameters are accepted and ignored
    pub async fn connect(_params: &ConnectionParams) -> Result<Self> {
        Ok(MemoryAdapter::new())
    }

    /// Run one non-blocking attempt of a blocking read, then either
    /// return, wait for a producer signal, or give up at the deadline
    async fn block_on<T, F>(&self, timeout: Duration, mut attempt: F) -> Result<Option<T>>
    where
        F: FnMut(&mut State) -> Result<Option<T>>,
    {
        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = attempt(&mut *self.state.lock().await)? {
                return Ok(Some(found));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        // One last look before reporting the timeout
                        return attempt(&mut *self.state.lock().await);
                    }
                }
            }
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut state = self.state.lock().await;
        match state.live(key).map(|e| &e.value) {
            Some(Value::String(raw)) => Ok(Some(raw.clone())),
            Some(other) => Err(wrong_type("string", other.type_name())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut entry = Entry::new(Value::String(value));
        entry.expire_at = expiry.map(|ttl| Instant::now() + ttl);
        state.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() && state.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            Some(entry) => {
                entry.expire_at = Some(Instant::now() + expiry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            state.entries.remove(&key);
        }
        Ok(state
            .entries
            .keys()
            .filter(|k| glob_match(k, pattern))
            .cloned()
            .collect())
    }

    async fn hset(&self, key: &str, pairs: Vec<(String, Bytes)>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if let Some(hash) = state.hash_mut(key, true)? {
            for (field, value) in pairs {
                hash.insert(field, value);
            }
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let mut state = self.state.lock().await;
        Ok(state
            .hash_mut(key, false)?
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut state = self.state.lock().await;
        let hash = state.hash_mut(key, false)?;
        Ok(match hash {
            Some(hash) => fields.iter().map(|f| hash.get(f).cloned()).collect(),
            None => fields.iter().map(|_| None).collect(),
        })
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        let mut state = self.state.lock().await;
        Ok(match state.hash_mut(key, false)? {
            Some(hash) => hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
            None => Vec::new(),
        })
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let removed = match state.hash_mut(key, false)? {
            Some(hash) => fields.iter().filter(|f| hash.remove(*f).is_some()).count(),
            None => 0,
        };
        state.drop_if_empty(key);
        Ok(removed as u64)
    }

    async fn rpush(&self, key: &str, value: Bytes) -> Result<u64> {
        let len = {
            let mut state = self.state.lock().await;
            let list = state
                .list_mut(key, true)?
                .expect("list created on demand");
            list.push_back(value);
            list.len() as u64
        };
        self.notify.notify_waiters();
        Ok(len)
    }

    async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        let mut state = self.state.lock().await;
        state.lpop(key)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        self.block_on(timeout, |state| state.lpop(key)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let mut state = self.state.lock().await;
        let list = match state.list_mut(key, false)? {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        Ok(match range_bounds(list.len(), start, stop) {
            Some((start, stop)) => list.iter().skip(start).take(stop - start + 1).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<u64> {
        let mut state = self.state.lock().await;
        let removed = match state.list_mut(key, false)? {
            Some(list) => {
                let before = list.len();
                if count == 0 {
                    list.retain(|v| *v != value);
                } else {
                    // Positive counts remove head-to-tail; negatives
                    // tail-to-head
                    let mut budget = count.unsigned_abs() as usize;
                    let mut kept: VecDeque<Bytes> = VecDeque::with_capacity(before);
                    let drain: Box<dyn Iterator<Item = Bytes> + '_> = if count > 0 {
                        Box::new(list.drain(..))
                    } else {
                        Box::new(list.drain(..).rev())
                    };
                    for item in drain {
                        if budget > 0 && item == value {
                            budget -= 1;
                        } else if count > 0 {
                            kept.push_back(item);
                        } else {
                            kept.push_front(item);
                        }
                    }
                    *list = kept;
                }
                (before - list.len()) as u64
            }
            None => 0,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        Ok(match state.list_mut(key, false)? {
            Some(list) => list.len() as u64,
            None => 0,
        })
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<u64> {
        let mut state = self.state.lock().await;
        let members = state
            .scored_mut(key, true)?
            .expect("sorted set created on demand");
        let existed = members.iter().position(|(_, m)| *m == member);
        if let Some(at) = existed {
            members.remove(at);
        }
        let at = members.partition_point(|(s, m)| {
            (*s, m.as_ref()) < (score, member.as_ref())
        });
        members.insert(at, (score, member));
        Ok(if existed.is_some() { 0 } else { 1 })
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let mut state = self.state.lock().await;
        let members = match state.scored_mut(key, false)? {
            Some(members) => members,
            None => return Ok(Vec::new()),
        };
        Ok(match range_bounds(members.len(), start, stop) {
            Some((start, stop)) => members[start..=stop]
                .iter()
                .map(|(_, m)| m.clone())
                .collect(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, member: Bytes) -> Result<u64> {
        let mut state = self.state.lock().await;
        let removed = match state.scored_mut(key, false)? {
            Some(members) => {
                let before = members.len();
                members.retain(|(_, m)| *m != member);
                (before - members.len()) as u64
            }
            None => 0,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        Ok(match state.scored_mut(key, false)? {
            Some(members) => members.len() as u64,
            None => 0,
        })
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        let key = keys.first().map(String::as_str).unwrap_or_default();
        let mut state = self.state.lock().await;
        if script == scripts::POP_LOWEST {
            state.pop_lowest(key, None)
        } else if script == scripts::POP_LOWEST_GATED {
            let now: f64 = args
                .first()
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| Error::Config("gated pop requires a numeric bound".to_string()))?;
            state.pop_lowest(key, Some(now))
        } else {
            Err(Error::Config(
                "the memory adapter only evaluates the built-in queue scripts".to_string(),
            ))
        }
    }

    async fn xadd(
        &self,
        key: &str,
        fields: Vec<(String, Bytes)>,
        maxlen: Option<u64>,
    ) -> Result<String> {
        let id = {
            let mut state = self.state.lock().await;
            let log = state
                .stream_mut(key, true)?
                .expect("stream created on demand");
            log.next_seq += 1;
            let seq = log.next_seq;
            log.entries.push_back((seq, fields));
            if let Some(maxlen) = maxlen {
                while log.entries.len() as u64 > maxlen {
                    log.entries.pop_front();
                }
            }
            format!("{}-0", seq)
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn xread(
        &self,
        key: &str,
        id: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        // "$" reads only entries appended after this call
        let after = if id == "$" {
            let mut state = self.state.lock().await;
            state
                .stream_mut(key, true)?
                .expect("stream created on demand")
                .next_seq
        } else {
            id.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
        };
        let found = self
            .block_on(block, |state| {
                let log = match state.stream_mut(key, false)? {
                    Some(log) => log,
                    None => return Ok(None),
                };
                let messages: Vec<StreamMessage> = log
                    .entries
                    .iter()
                    .filter(|(seq, _)| *seq > after)
                    .take(count)
                    .map(|(seq, fields)| StreamMessage {
                        id: format!("{}-0", seq),
                        fields: fields.clone(),
                    })
                    .collect();
                Ok(if messages.is_empty() {
                    None
                } else {
                    Some(messages)
                })
            })
            .await?;
        Ok(found.unwrap_or_default())
    }

    async fn xgroup_create(&self, key: &str, group: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let log = state
            .stream_mut(key, true)?
            .expect("stream created on demand");
        if log.cursors.contains_key(group) {
            return Ok(false);
        }
        // New groups start at the tail
        let tail = log.next_seq;
        log.cursors.insert(group.to_string(), tail);
        Ok(true)
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
        let _ = consumer;
        let found = self
            .block_on(block, |state| {
                let messages = state.stream_read(key, group, count, noack)?;
                Ok(if messages.is_empty() {
                    None
                } else {
                    Some(messages)
                })
            })
            .await?;
        Ok(found.unwrap_or_default())
    }

    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64> {
        let seq: u64 = match id.split('-').next().and_then(|n| n.parse().ok()) {
            Some(seq) => seq,
            None => return Ok(0),
        };
        let mut state = self.state.lock().await;
        Ok(match state.stream_mut(key, false)? {
            Some(log) => log
                .pending
                .get_mut(group)
                .map(|pending| pending.remove(&seq) as u64)
                .unwrap_or(0),
            None => 0,
        })
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let members = state
            .estimator_mut(key, true)?
            .expect("estimator created on demand");
        Ok(members.insert(member.to_string()))
    }

    async fn pfmerge(&self, destination: &str, source: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let merged: Vec<String> = match state.estimator_mut(source, false)? {
            Some(members) => members.iter().cloned().collect(),
            None => Vec::new(),
        };
        let members = state
            .estimator_mut(destination, true)?
            .expect("estimator created on demand");
        members.extend(merged);
        Ok(())
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        Ok(match state.estimator_mut(key, false)? {
            Some(members) => members.len() as u64,
            None => 0,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
