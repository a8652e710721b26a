//! Cache store: follow edges projected onto a key/list backend
//!
//! Layout per edge `a -> b`:
//! - `follow:edge:{len(a)}:{a}:{b}` holds the JSON record
//! - `follow:following:{a}` lists everyone `a` follows, newest first
//! - `follow:followers:{b}` lists everyone following `b`, newest first
//!
//! A list only counts as a complete index while its ready marker exists.
//! Markers are written exclusively by the rebuild path, which copies the
//! whole index out of the durable store. Lists without a marker are misses.
//!
//! Every write bumps `follow:gen:{user}` for both endpoints inside its batch.
//! Repopulation from the durable store reads that generation first and only
//! lands if it is still unchanged, so a snapshot taken before a concurrent
//! write can never overwrite the write's effect.

use super::backend::{CacheBackend, CacheBatch};
use async_trait::async_trait;
use follow_core::{
    intersect_follow_sets, paginate, GraphError, PageRequest, Paged, RelationshipRecord,
    RelationshipRepository, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Cache key builders
pub mod keys {
    /// The follower id is length-prefixed so ids containing ':' can't collide.
    pub fn edge(follower_id: &str, following_id: &str) -> String {
        format!(
            "follow:edge:{}:{}:{}",
            follower_id.len(),
            follower_id,
            following_id
        )
    }

    pub fn following(user_id: &str) -> String {
        format!("follow:following:{}", user_id)
    }

    pub fn followers(user_id: &str) -> String {
        format!("follow:followers:{}", user_id)
    }

    pub fn following_ready(user_id: &str) -> String {
        format!("follow:following-ready:{}", user_id)
    }

    pub fn followers_ready(user_id: &str) -> String {
        format!("follow:followers-ready:{}", user_id)
    }

    /// Write counter for a user, bumped by every change touching their edges
    pub fn generation(user_id: &str) -> String {
        format!("follow:gen:{}", user_id)
    }
}

/// A user's write generation as observed before a durable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation(Option<String>);

/// Which per-user index a list read targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Users `user_id` follows
    Following,
    /// Users following `user_id`
    Followers,
}

impl IndexKind {
    fn list_key(self, user_id: &str) -> String {
        match self {
            IndexKind::Following => keys::following(user_id),
            IndexKind::Followers => keys::followers(user_id),
        }
    }

    fn ready_key(self, user_id: &str) -> String {
        match self {
            IndexKind::Following => keys::following_ready(user_id),
            IndexKind::Followers => keys::followers_ready(user_id),
        }
    }

    /// Edge key for an entry `other` of `user_id`'s index
    fn edge_key(self, user_id: &str, other: &str) -> String {
        match self {
            IndexKind::Following => keys::edge(user_id, other),
            IndexKind::Followers => keys::edge(other, user_id),
        }
    }

    /// The id that an edge contributes to this index
    fn entry_of(self, record: &RelationshipRecord) -> &str {
        match self {
            IndexKind::Following => &record.following_id,
            IndexKind::Followers => &record.follower_id,
        }
    }
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read before the durable snapshot that a guarded repopulation will carry.
    pub async fn generation(&self, user_id: &str) -> Result<Generation> {
        Ok(Generation(self.backend.get(&keys::generation(user_id)).await?))
    }

    /// Apply `batch` only if `user_id`'s generation still equals `observed`.
    async fn apply_guarded(
        &self,
        user_id: &str,
        observed: &Generation,
        batch: CacheBatch,
    ) -> Result<bool> {
        self.backend
            .apply_if(&keys::generation(user_id), observed.0.as_deref(), batch)
            .await
    }

    fn bump_generations(&self, batch: CacheBatch, a: &str, b: &str) -> CacheBatch {
        batch
            .incr(keys::generation(a), self.ttl)
            .incr(keys::generation(b), self.ttl)
    }

    // Writes

    /// Edge record plus both index entries in one batch.
    pub async fn apply_follow(&self, record: &RelationshipRecord) -> Result<()> {
        let a = &record.follower_id;
        let b = &record.following_id;
        let json = serde_json::to_string(record)?;

        let batch = CacheBatch::new()
            .set(keys::edge(a, b), json, self.ttl)
            // Remove first so a replayed write can't duplicate the entry
            .remove_value(keys::following(a), b.clone())
            .push_front(keys::following(a), b.clone())
            .expire(keys::following(a), self.ttl)
            .expire(keys::following_ready(a), self.ttl)
            .remove_value(keys::followers(b), a.clone())
            .push_front(keys::followers(b), a.clone())
            .expire(keys::followers(b), self.ttl)
            .expire(keys::followers_ready(b), self.ttl);

        self.backend.apply(self.bump_generations(batch, a, b)).await
    }

    /// Edge record plus both index entries removed in one batch.
    pub async fn apply_unfollow(&self, follower_id: &str, following_id: &str) -> Result<()> {
        let batch = CacheBatch::new()
            .delete(keys::edge(follower_id, following_id))
            .remove_value(keys::following(follower_id), following_id.to_string())
            .remove_value(keys::followers(following_id), follower_id.to_string());

        self.backend
            .apply(self.bump_generations(batch, follower_id, following_id))
            .await
    }

    /// Cache a single edge record read from the durable store, leaving the
    /// indices alone. `observed` is the follower's generation from before
    /// that read; returns false when a write has since intervened.
    pub async fn store_edge(
        &self,
        record: &RelationshipRecord,
        observed: &Generation,
    ) -> Result<bool> {
        let json = serde_json::to_string(record)?;
        let batch = CacheBatch::new().set(
            keys::edge(&record.follower_id, &record.following_id),
            json,
            self.ttl,
        );
        self.apply_guarded(&record.follower_id, observed, batch).await
    }

    /// Replace `user_id`'s index with `records` (newest first) and mark it
    /// ready, unless `user_id`'s generation has moved past `observed`.
    /// Returns whether the index was replaced.
    pub async fn rebuild_index(
        &self,
        kind: IndexKind,
        user_id: &str,
        records: &[RelationshipRecord],
        observed: &Generation,
    ) -> Result<bool> {
        let list_key = kind.list_key(user_id);
        let entries: Vec<String> = records
            .iter()
            .map(|r| kind.entry_of(r).to_string())
            .collect();

        let mut batch = CacheBatch::new()
            .delete(list_key.clone())
            .append(list_key.clone(), entries)
            .expire(list_key, self.ttl);

        for record in records {
            batch = batch.set(
                keys::edge(&record.follower_id, &record.following_id),
                serde_json::to_string(record)?,
                self.ttl,
            );
        }

        batch = batch.set(kind.ready_key(user_id), "1".to_string(), self.ttl);

        debug!(
            "Rebuilding {:?} index of {} with {} entries",
            kind,
            user_id,
            records.len()
        );
        self.apply_guarded(user_id, observed, batch).await
    }

    /// Drop the edge record and demote both affected indices to misses.
    pub async fn invalidate_pair(&self, follower_id: &str, following_id: &str) -> Result<()> {
        let batch = CacheBatch::new()
            .delete(keys::edge(follower_id, following_id))
            .delete(keys::following_ready(follower_id))
            .delete(keys::followers_ready(following_id));
        self.backend
            .apply(self.bump_generations(batch, follower_id, following_id))
            .await
    }

    // Reads returning None on a miss

    pub async fn index_ready(&self, kind: IndexKind, user_id: &str) -> Result<bool> {
        self.backend.exists(&kind.ready_key(user_id)).await
    }

    /// `Some(true)` from the edge record, `Some(false)` only from a complete
    /// index, `None` otherwise.
    pub async fn lookup_is_following(
        &self,
        follower_id: &str,
        following_id: &str,
    ) -> Result<Option<bool>> {
        if self.backend.exists(&keys::edge(follower_id, following_id)).await? {
            return Ok(Some(true));
        }

        if self.index_ready(IndexKind::Following, follower_id).await? {
            let listed = self
                .backend
                .list_contains(&keys::following(follower_id), following_id)
                .await?;
            return Ok(Some(listed));
        }

        Ok(None)
    }

    pub async fn lookup_count(&self, kind: IndexKind, user_id: &str) -> Result<Option<i64>> {
        if !self.index_ready(kind, user_id).await? {
            return Ok(None);
        }
        Ok(Some(self.backend.list_len(&kind.list_key(user_id)).await?))
    }

    pub async fn lookup_page(
        &self,
        kind: IndexKind,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Option<Paged<RelationshipRecord>>> {
        if !self.index_ready(kind, user_id).await? {
            return Ok(None);
        }

        let list_key = kind.list_key(user_id);
        let total = self.backend.list_len(&list_key).await?;
        let ids = self
            .backend
            .list_range(&list_key, page.offset(), Some(page.limit()))
            .await?;

        let edge_keys: Vec<String> = ids.iter().map(|id| kind.edge_key(user_id, id)).collect();
        Ok(self
            .load_records(&edge_keys)
            .await?
            .map(|items| Paged { items, total }))
    }

    /// Full-list intersection when both following indices are complete.
    pub async fn lookup_mutual(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Option<Paged<RelationshipRecord>>> {
        if !self.index_ready(IndexKind::Following, user_a).await?
            || !self.index_ready(IndexKind::Following, user_b).await?
        {
            return Ok(None);
        }

        let follows_a = self.full_list(&keys::following(user_a)).await?;
        let follows_b = self.full_list(&keys::following(user_b)).await?;

        let mutual = intersect_follow_sets(&follows_a, &follows_b);
        let total = mutual.len() as i64;
        let edge_keys: Vec<String> = paginate(&mutual, page)
            .iter()
            .map(|id| keys::edge(user_a, id))
            .collect();

        Ok(self
            .load_records(&edge_keys)
            .await?
            .map(|items| Paged { items, total }))
    }

    async fn full_list(&self, key: &str) -> Result<Vec<String>> {
        self.backend.list_range(key, 0, None).await
    }

    /// Records for every key, or `None` if any one is missing or unreadable.
    async fn load_records(&self, edge_keys: &[String]) -> Result<Option<Vec<RelationshipRecord>>> {
        let values = self.backend.get_many(edge_keys).await?;

        let mut records = Vec::with_capacity(values.len());
        for (key, value) in edge_keys.iter().zip(values) {
            let Some(json) = value else {
                debug!("Edge record {} missing from cache", key);
                return Ok(None);
            };
            match serde_json::from_str::<RelationshipRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Failed to deserialize cache key {}: {}", key, e);
                    return Ok(None);
                }
            }
        }
        Ok(Some(records))
    }

    /// Records for whatever keys are present, skipping the rest.
    async fn load_present(&self, edge_keys: &[String]) -> Result<Vec<RelationshipRecord>> {
        let values = self.backend.get_many(edge_keys).await?;
        Ok(values
            .into_iter()
            .flatten()
            .filter_map(|json| serde_json::from_str(&json).ok())
            .collect())
    }

    async fn cached_page(
        &self,
        kind: IndexKind,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let list_key = kind.list_key(user_id);
        let total = self.backend.list_len(&list_key).await?;
        let ids = self
            .backend
            .list_range(&list_key, page.offset(), Some(page.limit()))
            .await?;
        let edge_keys: Vec<String> = ids.iter().map(|id| kind.edge_key(user_id, id)).collect();
        Ok(Paged {
            items: self.load_present(&edge_keys).await?,
            total,
        })
    }
}

/// The cache answering alone, from whatever it currently holds.
///
/// Expired or never-loaded data reads as absent here, so this view is only
/// authoritative for a cache that has seen every write. Production reads go
/// through the tiered repository, which falls back to the durable store.
#[async_trait]
impl RelationshipRepository for CacheStore {
    async fn follow(&self, follower_id: &str, following_id: &str) -> Result<RelationshipRecord> {
        if follower_id == following_id {
            return Err(GraphError::SelfFollow(follower_id.to_string()));
        }

        if self
            .backend
            .exists(&keys::edge(follower_id, following_id))
            .await?
        {
            return Err(GraphError::AlreadyFollowing {
                follower_id: follower_id.to_string(),
                following_id: following_id.to_string(),
            });
        }

        let record = RelationshipRecord::new(follower_id, following_id);
        self.apply_follow(&record).await?;
        Ok(record)
    }

    async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<()> {
        self.apply_unfollow(follower_id, following_id).await
    }

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.backend
            .exists(&keys::edge(follower_id, following_id))
            .await
    }

    async fn get_follow_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        self.cached_page(IndexKind::Following, user_id, page).await
    }

    async fn get_follower_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        self.cached_page(IndexKind::Followers, user_id, page).await
    }

    async fn get_follow_count(&self, user_id: &str) -> Result<i64> {
        self.backend.list_len(&keys::following(user_id)).await
    }

    async fn get_follower_count(&self, user_id: &str) -> Result<i64> {
        self.backend.list_len(&keys::followers(user_id)).await
    }

    async fn get_mutual_follows(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let follows_a = self.full_list(&keys::following(user_a)).await?;
        let follows_b = self.full_list(&keys::following(user_b)).await?;

        let mutual = intersect_follow_sets(&follows_a, &follows_b);
        let edge_keys: Vec<String> = paginate(&mutual, page)
            .iter()
            .map(|id| keys::edge(user_a, id))
            .collect();

        Ok(Paged {
            items: self.load_present(&edge_keys).await?,
            total: mutual.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCache;

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(MemoryCache::new()), DEFAULT_TTL)
    }

    async fn rebuild(
        cache: &CacheStore,
        kind: IndexKind,
        user: &str,
        records: &[RelationshipRecord],
    ) {
        let observed = cache.generation(user).await.unwrap();
        assert!(cache
            .rebuild_index(kind, user, records, &observed)
            .await
            .unwrap());
    }

    fn ids(page: &Paged<RelationshipRecord>, kind: IndexKind) -> Vec<String> {
        page.items
            .iter()
            .map(|r| kind.entry_of(r).to_string())
            .collect()
    }

    #[test]
    fn test_edge_keys_do_not_collide() {
        assert_ne!(keys::edge("a:b", "c"), keys::edge("a", "b:c"));
        assert_ne!(keys::following("x:ready"), keys::following_ready("x"));
    }

    #[tokio::test]
    async fn test_follow_writes_record_and_both_indices() {
        let cache = store();
        cache.follow("u1", "u2").await.unwrap();

        assert!(cache.is_following("u1", "u2").await.unwrap());
        assert!(!cache.is_following("u2", "u1").await.unwrap());
        assert_eq!(cache.get_follow_count("u1").await.unwrap(), 1);
        assert_eq!(cache.get_follower_count("u2").await.unwrap(), 1);

        let err = cache.follow("u1", "u2").await.unwrap_err();
        assert!(matches!(err, GraphError::AlreadyFollowing { .. }));

        cache.unfollow("u1", "u2").await.unwrap();
        cache.unfollow("u1", "u2").await.unwrap();
        assert!(!cache.is_following("u1", "u2").await.unwrap());
        assert_eq!(cache.get_follow_count("u1").await.unwrap(), 0);
        assert_eq!(cache.get_follower_count("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lists_newest_first() {
        let cache = store();
        for target in ["a", "b", "c"] {
            cache.follow("me", target).await.unwrap();
        }

        let page = cache
            .get_follow_list("me", PageRequest::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(ids(&page, IndexKind::Following), vec!["c", "b"]);
        assert_eq!(page.total, 3);

        let followers = cache
            .get_follower_list("a", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&followers, IndexKind::Followers), vec!["me"]);
    }

    #[tokio::test]
    async fn test_mutual_intersection() {
        let cache = store();
        for target in ["x", "y", "z"] {
            cache.follow("a", target).await.unwrap();
        }
        for target in ["y", "z", "w"] {
            cache.follow("b", target).await.unwrap();
        }

        let mutual = cache
            .get_mutual_follows("a", "b", PageRequest::default())
            .await
            .unwrap();
        let mut found = ids(&mutual, IndexKind::Following);
        found.sort();
        assert_eq!(found, vec!["y", "z"]);
        assert_eq!(mutual.total, 2);
    }

    #[tokio::test]
    async fn test_unloaded_index_is_a_miss() {
        let cache = store();

        // Written through, but never rebuilt: no ready marker
        cache.apply_follow(&RelationshipRecord::new("u1", "u2")).await.unwrap();

        assert_eq!(cache.lookup_is_following("u1", "u2").await.unwrap(), Some(true));
        assert_eq!(cache.lookup_is_following("u1", "u3").await.unwrap(), None);
        assert_eq!(cache.lookup_count(IndexKind::Following, "u1").await.unwrap(), None);
        assert!(cache
            .lookup_page(IndexKind::Following, "u1", PageRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rebuilt_index_answers_negatives() {
        let cache = store();
        let records = vec![
            RelationshipRecord::new("u1", "u3"),
            RelationshipRecord::new("u1", "u2"),
        ];
        rebuild(&cache, IndexKind::Following, "u1", &records).await;

        assert_eq!(cache.lookup_is_following("u1", "u4").await.unwrap(), Some(false));
        assert_eq!(cache.lookup_count(IndexKind::Following, "u1").await.unwrap(), Some(2));

        let page = cache
            .lookup_page(IndexKind::Following, "u1", PageRequest::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.items, records);

        // Empty indices are complete too
        rebuild(&cache, IndexKind::Followers, "nobody", &[]).await;
        assert_eq!(
            cache.lookup_count(IndexKind::Followers, "nobody").await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_missing_edge_record_turns_page_into_miss() {
        let cache = store();
        let records = vec![RelationshipRecord::new("u1", "u2")];
        rebuild(&cache, IndexKind::Following, "u1", &records).await;

        cache
            .backend
            .apply(CacheBatch::new().delete(keys::edge("u1", "u2")))
            .await
            .unwrap();

        assert!(cache
            .lookup_page(IndexKind::Following, "u1", PageRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_replayed_follow_does_not_duplicate_entries() {
        let cache = store();
        let record = RelationshipRecord::new("u1", "u2");
        cache.apply_follow(&record).await.unwrap();
        cache.apply_follow(&record).await.unwrap();

        assert_eq!(cache.get_follow_count("u1").await.unwrap(), 1);
        assert_eq!(cache.get_follower_count("u2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_rebuild_is_dropped() {
        let cache = store();
        let observed = cache.generation("u1").await.unwrap();
        let snapshot = vec![RelationshipRecord::new("u1", "u2")];

        // A write lands after the snapshot was taken
        cache.apply_unfollow("u1", "u2").await.unwrap();
        assert_ne!(cache.generation("u1").await.unwrap(), observed);

        let applied = cache
            .rebuild_index(IndexKind::Following, "u1", &snapshot, &observed)
            .await
            .unwrap();
        assert!(!applied);
        assert!(!cache.index_ready(IndexKind::Following, "u1").await.unwrap());
        assert!(!cache.is_following("u1", "u2").await.unwrap());

        let applied = cache.store_edge(&snapshot[0], &observed).await.unwrap();
        assert!(!applied);
        assert!(!cache.is_following("u1", "u2").await.unwrap());

        // A fresh observation goes through
        let current = cache.generation("u1").await.unwrap();
        assert!(cache.store_edge(&snapshot[0], &current).await.unwrap());
        assert!(cache.is_following("u1", "u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_bump_both_generations() {
        let cache = store();
        let before_a = cache.generation("a").await.unwrap();
        let before_b = cache.generation("b").await.unwrap();

        cache.apply_follow(&RelationshipRecord::new("a", "b")).await.unwrap();

        assert_ne!(cache.generation("a").await.unwrap(), before_a);
        assert_ne!(cache.generation("b").await.unwrap(), before_b);
        assert_eq!(cache.generation("c").await.unwrap(), Generation(None));
    }

    #[tokio::test]
    async fn test_invalidate_pair_demotes_indices() {
        let cache = store();
        let record = RelationshipRecord::new("u1", "u2");
        rebuild(&cache, IndexKind::Following, "u1", &[record.clone()]).await;
        rebuild(&cache, IndexKind::Followers, "u2", &[record]).await;

        cache.invalidate_pair("u1", "u2").await.unwrap();

        assert!(!cache.index_ready(IndexKind::Following, "u1").await.unwrap());
        assert!(!cache.index_ready(IndexKind::Followers, "u2").await.unwrap());
        assert_eq!(cache.lookup_is_following("u1", "u2").await.unwrap(), None);
    }
}
