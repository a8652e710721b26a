//! Storage layer
//!
//! SQLite (embedded) is the durable store and system of record. The cache
//! tier runs on DashMap in-process or on Redis, behind the same backend port.

pub mod backend;
pub mod cache;
pub mod db;
pub mod memory;
pub mod redis_cache;
pub mod tiered;

pub use backend::{CacheBackend, CacheBatch, CacheOp};
pub use cache::{CacheStore, IndexKind};
pub use db::Database;
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use tiered::TieredRepository;
