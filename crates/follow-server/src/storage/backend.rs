//! Key/list cache backend port
//!
//! The cache store only needs string values, lists of strings, counters,
//! per-key expiry, and one multi-key write primitive: [`CacheBatch`], applied
//! all-or-nothing by [`CacheBackend::apply`], or by
//! [`CacheBackend::apply_if`] when it must not land on top of a newer write.

use async_trait::async_trait;
use follow_core::Result;
use std::time::Duration;

/// One write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Set a string value with expiry
    Set {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    /// Insert at the head of a list, creating it if absent
    PushFront {
        key: String,
        value: String,
    },
    /// Append to the tail of a list, creating it if absent
    Append {
        key: String,
        values: Vec<String>,
    },
    /// Remove every occurrence of `value` from a list
    RemoveValue {
        key: String,
        value: String,
    },
    /// Refresh expiry; no-op if the key is absent
    Expire {
        key: String,
        ttl: Duration,
    },
    /// Add one to an integer value (absent counts as 0) and refresh expiry
    Incr {
        key: String,
        ttl: Duration,
    },
}

/// Ordered group of writes applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheBatch {
    ops: Vec<CacheOp>,
}

impl CacheBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: String, value: String, ttl: Duration) -> Self {
        self.ops.push(CacheOp::Set { key, value, ttl });
        self
    }

    pub fn delete(mut self, key: String) -> Self {
        self.ops.push(CacheOp::Delete { key });
        self
    }

    pub fn push_front(mut self, key: String, value: String) -> Self {
        self.ops.push(CacheOp::PushFront { key, value });
        self
    }

    pub fn append(mut self, key: String, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.ops.push(CacheOp::Append { key, values });
        }
        self
    }

    pub fn remove_value(mut self, key: String, value: String) -> Self {
        self.ops.push(CacheOp::RemoveValue { key, value });
        self
    }

    pub fn expire(mut self, key: String, ttl: Duration) -> Self {
        self.ops.push(CacheOp::Expire { key, ttl });
        self
    }

    pub fn incr(mut self, key: String, ttl: Duration) -> Self {
        self.ops.push(CacheOp::Incr { key, ttl });
        self
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<CacheOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Key/list store used by the cache tier
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values for `keys`, position for position.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// `limit` entries starting at `offset`; `None` reads to the end.
    async fn list_range(&self, key: &str, offset: usize, limit: Option<usize>)
        -> Result<Vec<String>>;

    async fn list_len(&self, key: &str) -> Result<i64>;

    async fn list_contains(&self, key: &str, value: &str) -> Result<bool>;

    /// Apply every op of the batch or none of them.
    async fn apply(&self, batch: CacheBatch) -> Result<()>;

    /// Apply the batch only while `guard_key` still holds `expected`
    /// (`None` meaning absent). The check and the batch are one atomic step.
    /// Returns whether the batch was applied.
    async fn apply_if(
        &self,
        guard_key: &str,
        expected: Option<&str>,
        batch: CacheBatch,
    ) -> Result<bool>;
}
