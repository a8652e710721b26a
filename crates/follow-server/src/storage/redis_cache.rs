//! Redis cache backend

use super::backend::{CacheBackend, CacheBatch, CacheOp};
use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use follow_core::{GraphError, Result};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::{error, info};

/// Check-and-apply for guarded batches. KEYS[1] is the guard; ARGV[1] says
/// whether a value is expected and ARGV[2] holds it. Each later key consumes
/// its op name and operands from ARGV in order.
const GUARDED_BATCH: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
local a = 3
for k = 2, #KEYS do
  local key = KEYS[k]
  local op = ARGV[a]
  if op == 'SET' then
    redis.call('SET', key, ARGV[a + 1], 'EX', ARGV[a + 2])
    a = a + 3
  elseif op == 'DEL' then
    redis.call('DEL', key)
    a = a + 1
  elseif op == 'LPUSH' then
    redis.call('LPUSH', key, ARGV[a + 1])
    a = a + 2
  elseif op == 'RPUSH' then
    local n = tonumber(ARGV[a + 1])
    for i = a + 2, a + 1 + n do
      redis.call('RPUSH', key, ARGV[i])
    end
    a = a + 2 + n
  elseif op == 'LREM' then
    redis.call('LREM', key, 0, ARGV[a + 1])
    a = a + 2
  elseif op == 'EXPIRE' then
    redis.call('EXPIRE', key, ARGV[a + 1])
    a = a + 2
  elseif op == 'INCR' then
    redis.call('INCR', key)
    redis.call('EXPIRE', key, ARGV[a + 1])
    a = a + 2
  else
    return redis.error_reply('unknown cache op ' .. tostring(op))
  end
end
return 1
"#;

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    guarded: Script,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> AnyResult<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url)
            .with_context(|| format!("Invalid Redis url: {}", redis_url))?;

        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        info!("Redis connection established");

        Ok(Self {
            manager,
            guarded: Script::new(GUARDED_BATCH),
        })
    }

    /// Translate a batch into a MULTI/EXEC pipeline.
    pub fn pipeline(batch: CacheBatch) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in batch.into_ops() {
            match op {
                CacheOp::Set { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(ttl_secs(ttl))
                        .ignore();
                }
                CacheOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                CacheOp::PushFront { key, value } => {
                    pipe.cmd("LPUSH").arg(key).arg(value).ignore();
                }
                CacheOp::Append { key, values } => {
                    pipe.cmd("RPUSH").arg(key).arg(values).ignore();
                }
                CacheOp::RemoveValue { key, value } => {
                    pipe.cmd("LREM").arg(key).arg(0).arg(value).ignore();
                }
                CacheOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();
                }
                CacheOp::Incr { key, ttl } => {
                    pipe.cmd("INCR").arg(&key).ignore();
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();
                }
            }
        }

        pipe
    }

    /// Flatten a guarded batch into the script's KEYS and ARGV.
    pub fn guarded_script_args(
        guard_key: &str,
        expected: Option<&str>,
        batch: CacheBatch,
    ) -> (Vec<String>, Vec<String>) {
        let mut keys = vec![guard_key.to_string()];
        let mut args = match expected {
            Some(value) => vec!["1".to_string(), value.to_string()],
            None => vec!["0".to_string(), String::new()],
        };

        for op in batch.into_ops() {
            match op {
                CacheOp::Set { key, value, ttl } => {
                    keys.push(key);
                    args.extend(["SET".to_string(), value, ttl_secs(ttl).to_string()]);
                }
                CacheOp::Delete { key } => {
                    keys.push(key);
                    args.push("DEL".to_string());
                }
                CacheOp::PushFront { key, value } => {
                    keys.push(key);
                    args.extend(["LPUSH".to_string(), value]);
                }
                CacheOp::Append { key, values } => {
                    keys.push(key);
                    args.push("RPUSH".to_string());
                    args.push(values.len().to_string());
                    args.extend(values);
                }
                CacheOp::RemoveValue { key, value } => {
                    keys.push(key);
                    args.extend(["LREM".to_string(), value]);
                }
                CacheOp::Expire { key, ttl } => {
                    keys.push(key);
                    args.extend(["EXPIRE".to_string(), ttl_secs(ttl).to_string()]);
                }
                CacheOp::Incr { key, ttl } => {
                    keys.push(key);
                    args.extend(["INCR".to_string(), ttl_secs(ttl).to_string()]);
                }
            }
        }

        (keys, args)
    }
}

/// Redis rejects a zero expiry
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| GraphError::cache("get", e))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await
            .map_err(|e| GraphError::cache("get_many", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        conn.exists::<_, bool>(key)
            .await
            .map_err(|e| GraphError::cache("exists", e))
    }

    async fn list_range(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let stop = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => (offset + n - 1) as isize,
            None => -1,
        };

        let mut conn = self.manager.clone();
        conn.lrange::<_, Vec<String>>(key, offset as isize, stop)
            .await
            .map_err(|e| GraphError::cache("list_range", e))
    }

    async fn list_len(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.llen::<_, i64>(key)
            .await
            .map_err(|e| GraphError::cache("list_len", e))
    }

    async fn list_contains(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let position: Option<i64> = redis::cmd("LPOS")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| GraphError::cache("list_contains", e))?;
        Ok(position.is_some())
    }

    async fn apply(&self, batch: CacheBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ops = batch.len();
        let mut conn = self.manager.clone();
        Self::pipeline(batch)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis batch of {} ops failed: {}", ops, e);
                GraphError::cache("apply", e)
            })
    }

    async fn apply_if(
        &self,
        guard_key: &str,
        expected: Option<&str>,
        batch: CacheBatch,
    ) -> Result<bool> {
        let ops = batch.len();
        let (keys, args) = Self::guarded_script_args(guard_key, expected, batch);

        let mut invocation = self.guarded.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.manager.clone();
        let applied: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            error!("Redis guarded batch of {} ops failed: {}", ops, e);
            GraphError::cache("apply_if", e)
        })?;
        Ok(applied == 1)
    }
}
