//! Write-through combination of the durable store and the cache store
//!
//! Writes go to the durable store first and are then mirrored into the
//! cache before the call returns. Reads try the cache and fall back to the
//! durable store on any miss, repopulating the cache on the way out.
//! Repopulation is fenced by the user's write generation, so a snapshot
//! that a concurrent write has overtaken is discarded instead of cached.

use super::cache::{CacheStore, IndexKind};
use super::db::Database;
use async_trait::async_trait;
use follow_core::{
    GraphError, PageRequest, Paged, RelationshipRecord, RelationshipRepository, Result,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TieredRepository {
    durable: Arc<Database>,
    cache: Arc<CacheStore>,
}

impl TieredRepository {
    pub fn new(durable: Arc<Database>, cache: Arc<CacheStore>) -> Self {
        Self { durable, cache }
    }

    pub fn durable(&self) -> &Arc<Database> {
        &self.durable
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Reload both of `user_id`'s indices from the durable store.
    pub async fn rebuild_user(&self, user_id: &str) -> Result<()> {
        rebuild_index(&self.durable, &self.cache, IndexKind::Following, user_id).await?;
        rebuild_index(&self.durable, &self.cache, IndexKind::Followers, user_id).await?;
        Ok(())
    }

    /// Rebuild after a read miss, off the request path. Failures only cost
    /// the next read another miss.
    fn repopulate(&self, kind: IndexKind, user_id: &str) {
        let durable = self.durable.clone();
        let cache = self.cache.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = rebuild_index(&durable, &cache, kind, &user_id).await {
                warn!("Failed to repopulate {:?} index of {}: {}", kind, user_id, e);
            }
        });
    }

    /// Cache errors on the read path degrade to a miss.
    fn miss_on_error<T>(operation: &str, result: Result<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read failed during {}, using durable store: {}", operation, e);
                None
            }
        }
    }

    async fn list(
        &self,
        kind: IndexKind,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let cached = self.cache.lookup_page(kind, user_id, page).await;
        if let Some(hit) = Self::miss_on_error("list", cached) {
            return Ok(hit);
        }

        debug!("{:?} index of {} missed, reading durable store", kind, user_id);
        let result = match kind {
            IndexKind::Following => self.durable.get_follow_list(user_id, page).await?,
            IndexKind::Followers => self.durable.get_follower_list(user_id, page).await?,
        };
        self.repopulate(kind, user_id);
        Ok(result)
    }

    async fn count(&self, kind: IndexKind, user_id: &str) -> Result<i64> {
        let cached = self.cache.lookup_count(kind, user_id).await;
        if let Some(count) = Self::miss_on_error("count", cached) {
            return Ok(count);
        }

        match kind {
            IndexKind::Following => self.durable.get_follow_count(user_id).await,
            IndexKind::Followers => self.durable.get_follower_count(user_id).await,
        }
    }
}

/// Copy one index out of the durable store. The generation is read before
/// the snapshot; returns false when a write overtook it and nothing landed.
async fn rebuild_index(
    durable: &Database,
    cache: &CacheStore,
    kind: IndexKind,
    user_id: &str,
) -> Result<bool> {
    let observed = cache.generation(user_id).await?;
    let records = match kind {
        IndexKind::Following => durable.following_edges(user_id).await?,
        IndexKind::Followers => durable.follower_edges(user_id).await?,
    };

    let applied = cache.rebuild_index(kind, user_id, &records, &observed).await?;
    if !applied {
        debug!(
            "{:?} index of {} changed during rebuild, snapshot dropped",
            kind, user_id
        );
    }
    Ok(applied)
}

/// Mirror a committed write into the cache. A failure here never fails the
/// write: the affected indices are demoted to misses so the next read
/// reconciles them against the durable store.
async fn propagate(
    cache: &CacheStore,
    follower_id: &str,
    following_id: &str,
    result: Result<()>,
) {
    if let Err(e) = result {
        warn!(
            "Cache write for {} -> {} failed, invalidating: {}",
            follower_id, following_id, e
        );
        if let Err(e) = cache.invalidate_pair(follower_id, following_id).await {
            warn!(
                "Cache invalidation for {} -> {} failed, entries expire with their TTL: {}",
                follower_id, following_id, e
            );
        }
    }
}

#[async_trait]
impl RelationshipRepository for TieredRepository {
    async fn follow(&self, follower_id: &str, following_id: &str) -> Result<RelationshipRecord> {
        if follower_id == following_id {
            return Err(GraphError::SelfFollow(follower_id.to_string()));
        }

        let durable = self.durable.clone();
        let cache = self.cache.clone();
        let a = follower_id.to_string();
        let b = following_id.to_string();

        // Detached so a dropped caller can't split the durable and cache writes
        let task = tokio::spawn(async move {
            let record = durable.follow(&a, &b).await?;
            let written = cache.apply_follow(&record).await;
            propagate(&cache, &a, &b, written).await;
            Ok::<_, GraphError>(record)
        });

        task.await
            .map_err(|e| GraphError::durable("follow", e))?
    }

    async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<()> {
        let durable = self.durable.clone();
        let cache = self.cache.clone();
        let a = follower_id.to_string();
        let b = following_id.to_string();

        let task = tokio::spawn(async move {
            durable.unfollow(&a, &b).await?;
            let written = cache.apply_unfollow(&a, &b).await;
            propagate(&cache, &a, &b, written).await;
            Ok::<_, GraphError>(())
        });

        task.await
            .map_err(|e| GraphError::durable("unfollow", e))?
    }

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let cached = self.cache.lookup_is_following(follower_id, following_id).await;
        if let Some(answer) = Self::miss_on_error("is_following", cached) {
            return Ok(answer);
        }

        // Without a generation the hit is served but not cached
        let observed = match self.cache.generation(follower_id).await {
            Ok(observed) => Some(observed),
            Err(e) => {
                warn!("Cache generation read for {} failed: {}", follower_id, e);
                None
            }
        };

        let Some(record) = self.durable.get_edge(follower_id, following_id).await? else {
            return Ok(false);
        };

        if let Some(observed) = observed {
            match self.cache.store_edge(&record, &observed).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    "Edge {} -> {} changed during lookup, not cached",
                    follower_id, following_id
                ),
                Err(e) => warn!("Failed to cache edge {} -> {}: {}", follower_id, following_id, e),
            }
        }
        Ok(true)
    }

    async fn get_follow_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        self.list(IndexKind::Following, user_id, page).await
    }

    async fn get_follower_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        self.list(IndexKind::Followers, user_id, page).await
    }

    async fn get_follow_count(&self, user_id: &str) -> Result<i64> {
        self.count(IndexKind::Following, user_id).await
    }

    async fn get_follower_count(&self, user_id: &str) -> Result<i64> {
        self.count(IndexKind::Followers, user_id).await
    }

    async fn get_mutual_follows(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let cached = self.cache.lookup_mutual(user_a, user_b, page).await;
        if let Some(hit) = Self::miss_on_error("get_mutual_follows", cached) {
            return Ok(hit);
        }

        // The join is cheaper than loading two full indices into the cache first
        self.durable.get_mutual_follows(user_a, user_b, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{CacheBackend, CacheBatch};
    use crate::storage::cache::{keys, DEFAULT_TTL};
    use crate::storage::MemoryCache;
    use std::collections::HashSet;
    use std::time::Duration;

    async fn tiered() -> (TieredRepository, Arc<MemoryCache>) {
        let durable = Arc::new(Database::in_memory().await.unwrap());
        let backend = Arc::new(MemoryCache::new());
        let cache = Arc::new(CacheStore::new(backend.clone(), DEFAULT_TTL));
        (TieredRepository::new(durable, cache), backend)
    }

    /// List misses rebuild in the background; wait for the marker.
    async fn wait_ready(repo: &TieredRepository, kind: IndexKind, user_id: &str) -> bool {
        for _ in 0..50 {
            if repo.cache().index_ready(kind, user_id).await.unwrap() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_write_through_reaches_both_tiers() {
        let (repo, _) = tiered().await;
        repo.follow("u1", "u2").await.unwrap();

        assert!(repo.durable().is_following("u1", "u2").await.unwrap());
        assert_eq!(
            repo.cache().lookup_is_following("u1", "u2").await.unwrap(),
            Some(true)
        );

        repo.unfollow("u1", "u2").await.unwrap();
        assert!(!repo.durable().is_following("u1", "u2").await.unwrap());
        assert!(!repo.is_following("u1", "u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_detected_by_durable_store() {
        let (repo, backend) = tiered().await;
        repo.follow("u1", "u2").await.unwrap();

        // Even with the cache wiped the durable constraint rejects it
        backend
            .apply(CacheBatch::new().delete(keys::edge("u1", "u2")))
            .await
            .unwrap();
        let err = repo.follow("u1", "u2").await.unwrap_err();
        assert!(matches!(err, GraphError::AlreadyFollowing { .. }));
    }

    #[tokio::test]
    async fn test_empty_cache_falls_back_to_durable() {
        let (repo, backend) = tiered().await;
        repo.durable().follow("u1", "u2").await.unwrap();
        assert!(backend.is_empty());

        assert!(repo.is_following("u1", "u2").await.unwrap());
        assert!(!repo.is_following("u2", "u1").await.unwrap());

        // The hit was copied into the cache
        assert_eq!(
            repo.cache().lookup_is_following("u1", "u2").await.unwrap(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_list_miss_repopulates_index() {
        let (repo, _) = tiered().await;
        for target in ["a", "b", "c"] {
            repo.durable().follow("me", target).await.unwrap();
        }

        let first = repo
            .get_follow_list("me", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(first.total, 3);
        assert!(wait_ready(&repo, IndexKind::Following, "me").await);

        let second = repo
            .get_follow_list("me", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.get_follow_count("me").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_index_stays_in_step_after_rebuild() {
        let (repo, _) = tiered().await;
        repo.follow("u1", "u2").await.unwrap();
        repo.rebuild_user("u1").await.unwrap();

        repo.follow("u1", "u3").await.unwrap();
        repo.unfollow("u1", "u2").await.unwrap();

        assert_eq!(
            repo.cache().lookup_count(IndexKind::Following, "u1").await.unwrap(),
            Some(1)
        );
        assert_eq!(
            repo.cache().lookup_is_following("u1", "u2").await.unwrap(),
            Some(false)
        );
        let page = repo
            .get_follow_list("u1", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].following_id, "u3");
    }

    #[tokio::test]
    async fn test_mutual_from_either_tier() {
        let (repo, _) = tiered().await;
        for target in ["x", "y", "z"] {
            repo.follow("a", target).await.unwrap();
        }
        for target in ["y", "z", "w"] {
            repo.follow("b", target).await.unwrap();
        }

        let durable = repo
            .get_mutual_follows("a", "b", PageRequest::default())
            .await
            .unwrap();

        repo.rebuild_user("a").await.unwrap();
        repo.rebuild_user("b").await.unwrap();
        let cached = repo
            .cache()
            .lookup_mutual("a", "b", PageRequest::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(durable, cached);
        assert_eq!(cached.total, 2);
    }

    #[tokio::test]
    async fn test_unfollow_during_edge_lookup_is_not_resurrected() {
        let (repo, _) = tiered().await;
        repo.durable().follow("u1", "u2").await.unwrap();

        // Lookup reads the generation and the durable edge...
        let observed = repo.cache().generation("u1").await.unwrap();
        let record = repo.durable().get_edge("u1", "u2").await.unwrap().unwrap();

        // ...then an unfollow commits before the lookup caches its result
        repo.unfollow("u1", "u2").await.unwrap();
        let cached = repo.cache().store_edge(&record, &observed).await.unwrap();
        assert!(!cached);

        assert!(!repo.durable().is_following("u1", "u2").await.unwrap());
        assert!(!repo.is_following("u1", "u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_follow_during_list_rebuild_is_not_lost() {
        let (repo, _) = tiered().await;
        repo.durable().follow("me", "a").await.unwrap();

        // Rebuild reads the generation and snapshots the index...
        let observed = repo.cache().generation("me").await.unwrap();
        let snapshot = repo.durable().following_edges("me").await.unwrap();

        // ...then a follow commits before the snapshot is written
        repo.follow("me", "b").await.unwrap();
        let applied = repo
            .cache()
            .rebuild_index(IndexKind::Following, "me", &snapshot, &observed)
            .await
            .unwrap();
        assert!(!applied);

        let durable = repo.durable().get_follow_count("me").await.unwrap();
        assert_eq!(durable, 2);
        assert_eq!(repo.get_follow_count("me").await.unwrap(), durable);

        // A later miss repopulates with both edges
        repo.get_follow_list("me", PageRequest::default()).await.unwrap();
        assert!(wait_ready(&repo, IndexKind::Following, "me").await);
        assert_eq!(
            repo.cache().lookup_count(IndexKind::Following, "me").await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_mutual_pages_agree_across_tiers() {
        let (repo, _) = tiered().await;
        for i in 0..30 {
            let target = format!("u{:02}", i);
            repo.follow("a", &target).await.unwrap();
            if i % 2 == 0 {
                repo.follow("b", &target).await.unwrap();
            }
        }

        let page = PageRequest::new(Some(2), Some(4));

        // No ready markers yet, so this is the durable join
        let cold = repo.get_mutual_follows("a", "b", page).await.unwrap();

        repo.rebuild_user("a").await.unwrap();
        repo.rebuild_user("b").await.unwrap();
        let warm = repo
            .cache()
            .lookup_mutual("a", "b", page)
            .await
            .unwrap()
            .unwrap();

        let everything = PageRequest::new(Some(1), Some(100));
        let follows_b: HashSet<String> = repo
            .durable()
            .get_follow_list("b", everything)
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|r| r.following_id)
            .collect();
        let expected: Vec<String> = repo
            .durable()
            .get_follow_list("a", everything)
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|r| r.following_id)
            .filter(|id| follows_b.contains(id))
            .skip(4)
            .take(4)
            .collect();

        let ids = |p: &Paged<RelationshipRecord>| -> Vec<String> {
            p.items.iter().map(|r| r.following_id.clone()).collect()
        };
        assert_eq!(expected.len(), 4);
        assert_eq!(ids(&cold), expected);
        assert_eq!(ids(&warm), expected);
        assert_eq!(cold, warm);
        assert_eq!(warm.total, 15);
    }
}
