//! Storage trait for follow relationships

use crate::Result;
use async_trait::async_trait;
use follow_types::{FollowStatus, PageRequest, Paged, RelationshipRecord};

/// Relationship repository
///
/// Satisfied by the durable store, the cache store, and the write-through
/// combination of both. List operations return edges newest first.
#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    /// Create the edge. Fails with `SelfFollow` or `AlreadyFollowing`.
    async fn follow(&self, follower_id: &str, following_id: &str) -> Result<RelationshipRecord>;

    /// Remove the edge. Removing an absent edge succeeds.
    async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<()>;

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool>;

    /// Edges where `user_id` is the follower.
    async fn get_follow_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>>;

    /// Edges where `user_id` is being followed.
    async fn get_follower_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>>;

    async fn get_follow_count(&self, user_id: &str) -> Result<i64>;

    async fn get_follower_count(&self, user_id: &str) -> Result<i64>;

    /// Users followed by both `user_a` and `user_b`, returned as `user_a`'s
    /// edges. The page is cut from the full intersection.
    async fn get_mutual_follows(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>>;

    async fn check_follow_status(
        &self,
        follower_id: &str,
        following_id: &str,
    ) -> Result<FollowStatus> {
        let forward = self.is_following(follower_id, following_id).await?;
        let backward = self.is_following(following_id, follower_id).await?;
        Ok(FollowStatus::from_directions(forward, backward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Fixed edge set; only existence checks are meaningful.
    struct FixedEdges(HashSet<(String, String)>);

    impl FixedEdges {
        fn new(edges: &[(&str, &str)]) -> Self {
            Self(
                edges
                    .iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl RelationshipRepository for FixedEdges {
        async fn follow(&self, a: &str, b: &str) -> Result<RelationshipRecord> {
            Ok(RelationshipRecord::new(a, b))
        }

        async fn unfollow(&self, _a: &str, _b: &str) -> Result<()> {
            Ok(())
        }

        async fn is_following(&self, a: &str, b: &str) -> Result<bool> {
            Ok(self.0.contains(&(a.to_string(), b.to_string())))
        }

        async fn get_follow_list(&self, _: &str, _: PageRequest) -> Result<Paged<RelationshipRecord>> {
            Ok(Paged::empty())
        }

        async fn get_follower_list(&self, _: &str, _: PageRequest) -> Result<Paged<RelationshipRecord>> {
            Ok(Paged::empty())
        }

        async fn get_follow_count(&self, _: &str) -> Result<i64> {
            Ok(0)
        }

        async fn get_follower_count(&self, _: &str) -> Result<i64> {
            Ok(0)
        }

        async fn get_mutual_follows(
            &self,
            _: &str,
            _: &str,
            _: PageRequest,
        ) -> Result<Paged<RelationshipRecord>> {
            Ok(Paged::empty())
        }
    }

    #[tokio::test]
    async fn test_status_from_two_checks() {
        let repo = FixedEdges::new(&[("a", "b"), ("b", "a"), ("a", "c")]);

        let status = repo.check_follow_status("a", "b").await.unwrap();
        assert!(status.is_following && status.is_mutual);

        let status = repo.check_follow_status("a", "c").await.unwrap();
        assert!(status.is_following && !status.is_mutual);

        let status = repo.check_follow_status("c", "a").await.unwrap();
        assert!(!status.is_following && !status.is_mutual);
    }
}
