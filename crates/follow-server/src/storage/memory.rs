//! In-memory cache using DashMap (stands in for Redis in single-node deployments)

use super::backend::{CacheBackend, CacheBatch, CacheOp};
use async_trait::async_trait;
use dashmap::DashMap;
use follow_core::{GraphError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// In-memory key/list cache with TTL support
pub struct MemoryCache {
    data: Arc<DashMap<String, CacheEntry>>,
    /// Batches hold this exclusively; reads share it. DashMap alone only
    /// locks one shard at a time.
    gate: RwLock<()>,
}

#[derive(Debug, Clone)]
enum CacheValue {
    Text(String),
    List(VecDeque<String>),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|expires| now > expires).unwrap_or(false)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        let cache = Self {
            data: Arc::new(DashMap::new()),
            gate: RwLock::new(()),
        };

        // Start cleanup task
        cache.start_cleanup_task();

        cache
    }

    /// Live value for `key`, dropping it if expired.
    fn live(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let entry = self.data.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.value.clone())
    }

    fn live_list<R>(&self, key: &str, f: impl FnOnce(&VecDeque<String>) -> R) -> Result<Option<R>> {
        let now = Instant::now();
        match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                CacheValue::List(list) => Ok(Some(f(list))),
                CacheValue::Text(_) => Err(wrong_type("list read", key)),
            },
            _ => Ok(None),
        }
    }

    /// Number of live keys, expired ones excluded
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_types(&self, batch: &CacheBatch) -> Result<()> {
        let now = Instant::now();
        for op in batch.ops() {
            match op {
                CacheOp::PushFront { key, .. }
                | CacheOp::Append { key, .. }
                | CacheOp::RemoveValue { key, .. } => {
                    if let Some(entry) = self.data.get(key) {
                        if !entry.is_expired(now) && matches!(entry.value, CacheValue::Text(_)) {
                            return Err(wrong_type("batch", key));
                        }
                    }
                }
                CacheOp::Incr { key, .. } => {
                    if let Some(entry) = self.data.get(key) {
                        if entry.is_expired(now) {
                            continue;
                        }
                        match &entry.value {
                            CacheValue::List(_) => return Err(wrong_type("batch", key)),
                            CacheValue::Text(v) if v.parse::<i64>().is_err() => {
                                return Err(GraphError::cache(
                                    "batch",
                                    format!("value at {} is not an integer", key),
                                ));
                            }
                            CacheValue::Text(_) => {}
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Caller holds the write gate.
    fn apply_locked(&self, batch: CacheBatch) -> Result<()> {
        // Validate everything first so a failing batch leaves no trace
        self.check_types(&batch)?;

        let now = Instant::now();
        for op in batch.into_ops() {
            self.apply_op(op, now);
        }
        Ok(())
    }

    fn apply_op(&self, op: CacheOp, now: Instant) {
        // Expired entries behave as absent for every op
        if let CacheOp::PushFront { key, .. }
        | CacheOp::Append { key, .. }
        | CacheOp::RemoveValue { key, .. }
        | CacheOp::Expire { key, .. }
        | CacheOp::Incr { key, .. } = &op
        {
            self.data.remove_if(key, |_, e| e.is_expired(now));
        }

        match op {
            CacheOp::Set { key, value, ttl } => {
                self.data.insert(
                    key,
                    CacheEntry {
                        value: CacheValue::Text(value),
                        expires_at: Some(now + ttl),
                    },
                );
            }
            CacheOp::Delete { key } => {
                self.data.remove(&key);
            }
            CacheOp::PushFront { key, value } => {
                let mut entry = self.data.entry(key).or_insert_with(|| CacheEntry {
                    value: CacheValue::List(VecDeque::new()),
                    expires_at: None,
                });
                if let CacheValue::List(list) = &mut entry.value {
                    list.push_front(value);
                }
            }
            CacheOp::Append { key, values } => {
                let mut entry = self.data.entry(key).or_insert_with(|| CacheEntry {
                    value: CacheValue::List(VecDeque::new()),
                    expires_at: None,
                });
                if let CacheValue::List(list) = &mut entry.value {
                    list.extend(values);
                }
            }
            CacheOp::RemoveValue { key, value } => {
                let emptied = match self.data.get_mut(&key) {
                    Some(mut entry) => match &mut entry.value {
                        CacheValue::List(list) => {
                            list.retain(|v| v != &value);
                            list.is_empty()
                        }
                        CacheValue::Text(_) => false,
                    },
                    None => false,
                };
                // Empty lists don't exist, same as Redis
                if emptied {
                    self.data.remove(&key);
                }
            }
            CacheOp::Expire { key, ttl } => {
                if let Some(mut entry) = self.data.get_mut(&key) {
                    entry.expires_at = Some(now + ttl);
                }
            }
            CacheOp::Incr { key, ttl } => {
                let mut entry = self.data.entry(key).or_insert_with(|| CacheEntry {
                    value: CacheValue::Text("0".to_string()),
                    expires_at: None,
                });
                if let CacheValue::Text(v) = &mut entry.value {
                    let next = v.parse::<i64>().unwrap_or(0) + 1;
                    *v = next.to_string();
                }
                entry.expires_at = Some(now + ttl);
            }
        }
    }

    fn start_cleanup_task(&self) {
        // Without a runtime, expired keys are still dropped lazily on access
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let data = Arc::downgrade(&self.data);
        handle.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;

                let Some(data) = data.upgrade() else {
                    break;
                };

                let now = Instant::now();
                data.retain(|_, entry| !entry.is_expired(now));
            }
        });
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(operation: &'static str, key: &str) -> GraphError {
    GraphError::cache(
        operation,
        format!("WRONGTYPE operation against key {} holding the wrong kind of value", key),
    )
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _read = self.gate.read().await;
        match self.live(key) {
            Some(CacheValue::Text(value)) => Ok(Some(value)),
            Some(CacheValue::List(_)) => Err(wrong_type("get", key)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let _read = self.gate.read().await;
        Ok(keys
            .iter()
            .map(|key| match self.live(key) {
                Some(CacheValue::Text(value)) => Some(value),
                _ => None,
            })
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let _read = self.gate.read().await;
        Ok(self.live(key).is_some())
    }

    async fn list_range(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let _read = self.gate.read().await;
        let items = self.live_list(key, |list| {
            let iter = list.iter().skip(offset).cloned();
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })?;
        Ok(items.unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<i64> {
        let _read = self.gate.read().await;
        Ok(self.live_list(key, |list| list.len() as i64)?.unwrap_or(0))
    }

    async fn list_contains(&self, key: &str, value: &str) -> Result<bool> {
        let _read = self.gate.read().await;
        Ok(self
            .live_list(key, |list| list.iter().any(|v| v == value))?
            .unwrap_or(false))
    }

    async fn apply(&self, batch: CacheBatch) -> Result<()> {
        let _write = self.gate.write().await;
        self.apply_locked(batch)
    }

    async fn apply_if(
        &self,
        guard_key: &str,
        expected: Option<&str>,
        batch: CacheBatch,
    ) -> Result<bool> {
        let _write = self.gate.write().await;

        let current = match self.live(guard_key) {
            Some(CacheValue::Text(value)) => Some(value),
            Some(CacheValue::List(_)) => return Err(wrong_type("apply_if", guard_key)),
            None => None,
        };
        if current.as_deref() != expected {
            return Ok(false);
        }

        self.apply_locked(batch)?;
        Ok(true)
    }
}
