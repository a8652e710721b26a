//! Relationship service
//!
//! Stateless orchestration between the RPC surface and the repository:
//! identifier validation, default pagination, request deadlines, and the
//! mapping of repository errors onto response codes.

use follow_core::{
    CountResponse, EdgeListResponse, FollowStatusResponse, FollowerListResponse, GraphError,
    IsFollowingResponse, PageRequest, RelationshipRepository, ResponseCode, Result,
    StatusResponse,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct RelationshipService {
    repo: Arc<dyn RelationshipRepository>,
    request_timeout: Duration,
}

impl RelationshipService {
    pub fn new(repo: Arc<dyn RelationshipRepository>, request_timeout: Duration) -> Self {
        Self {
            repo,
            request_timeout,
        }
    }

    pub async fn follow(&self, follower_id: &str, following_id: &str) -> StatusResponse {
        let result = async {
            validate_pair(follower_id, following_id)?;
            if follower_id == following_id {
                return Err(GraphError::SelfFollow(follower_id.to_string()));
            }
            self.call("follow", self.repo.follow(follower_id, following_id))
                .await
        }
        .await;

        match result {
            Ok(record) => {
                info!("{} followed {}", record.follower_id, record.following_id);
                StatusResponse::ok()
            }
            Err(e) => {
                let (code, message) = report("follow", &e);
                StatusResponse::error(code, message)
            }
        }
    }

    pub async fn unfollow(&self, follower_id: &str, following_id: &str) -> StatusResponse {
        let result = async {
            validate_pair(follower_id, following_id)?;
            self.call("unfollow", self.repo.unfollow(follower_id, following_id))
                .await
        }
        .await;

        match result {
            Ok(()) => {
                info!("{} unfollowed {}", follower_id, following_id);
                StatusResponse::ok()
            }
            Err(e) => {
                let (code, message) = report("unfollow", &e);
                StatusResponse::error(code, message)
            }
        }
    }

    pub async fn is_following(&self, follower_id: &str, following_id: &str) -> IsFollowingResponse {
        let result = async {
            validate_pair(follower_id, following_id)?;
            self.call(
                "is_following",
                self.repo.is_following(follower_id, following_id),
            )
            .await
        }
        .await;

        match result {
            Ok(is_following) => IsFollowingResponse::ok(is_following),
            Err(e) => {
                let (code, message) = report("is_following", &e);
                IsFollowingResponse::error(code, message)
            }
        }
    }

    pub async fn get_follow_list(
        &self,
        user_id: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> EdgeListResponse {
        let page = PageRequest::new(page, page_size);
        let result = async {
            validate_id("user_id", user_id)?;
            self.call("get_follow_list", self.repo.get_follow_list(user_id, page))
                .await
        }
        .await;

        match result {
            Ok(paged) => {
                let has_more = page.has_more(paged.items.len());
                EdgeListResponse::ok(paged.items, paged.total, has_more)
            }
            Err(e) => {
                let (code, message) = report("get_follow_list", &e);
                EdgeListResponse::error(code, message)
            }
        }
    }

    pub async fn get_follower_list(
        &self,
        user_id: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> FollowerListResponse {
        let page = PageRequest::new(page, page_size);
        let result = async {
            validate_id("user_id", user_id)?;
            self.call(
                "get_follower_list",
                self.repo.get_follower_list(user_id, page),
            )
            .await
        }
        .await;

        match result {
            Ok(paged) => FollowerListResponse::ok(paged.items),
            Err(e) => {
                let (code, message) = report("get_follower_list", &e);
                FollowerListResponse::error(code, message)
            }
        }
    }

    pub async fn get_follow_count(&self, user_id: &str) -> CountResponse {
        let result = async {
            validate_id("user_id", user_id)?;
            self.call("get_follow_count", self.repo.get_follow_count(user_id))
                .await
        }
        .await;

        match result {
            Ok(count) => CountResponse::ok(count),
            Err(e) => {
                let (code, message) = report("get_follow_count", &e);
                CountResponse::error(code, message)
            }
        }
    }

    pub async fn get_follower_count(&self, user_id: &str) -> CountResponse {
        let result = async {
            validate_id("user_id", user_id)?;
            self.call("get_follower_count", self.repo.get_follower_count(user_id))
                .await
        }
        .await;

        match result {
            Ok(count) => CountResponse::ok(count),
            Err(e) => {
                let (code, message) = report("get_follower_count", &e);
                CountResponse::error(code, message)
            }
        }
    }

    pub async fn get_mutual_follows(
        &self,
        user_a: &str,
        user_b: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> EdgeListResponse {
        let page = PageRequest::new(page, page_size);
        let result = async {
            validate_id("user_a", user_a)?;
            validate_id("user_b", user_b)?;
            self.call(
                "get_mutual_follows",
                self.repo.get_mutual_follows(user_a, user_b, page),
            )
            .await
        }
        .await;

        match result {
            Ok(paged) => {
                let has_more = page.has_more(paged.items.len());
                EdgeListResponse::ok(paged.items, paged.total, has_more)
            }
            Err(e) => {
                let (code, message) = report("get_mutual_follows", &e);
                EdgeListResponse::error(code, message)
            }
        }
    }

    pub async fn check_follow_status(
        &self,
        follower_id: &str,
        following_id: &str,
    ) -> FollowStatusResponse {
        let result = async {
            validate_pair(follower_id, following_id)?;
            // Two independent existence checks, one per direction
            let forward = self.call(
                "check_follow_status",
                self.repo.is_following(follower_id, following_id),
            );
            let backward = self.call(
                "check_follow_status",
                self.repo.is_following(following_id, follower_id),
            );
            let (forward, backward) = tokio::try_join!(forward, backward)?;
            Ok(follow_core::FollowStatus::from_directions(forward, backward))
        }
        .await;

        match result {
            Ok(status) => FollowStatusResponse::ok(status.is_following, status.is_mutual),
            Err(e) => {
                let (code, message) = report("check_follow_status", &e);
                FollowStatusResponse::error(code, message)
            }
        }
    }

    /// Bound a repository call by the request deadline.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| GraphError::Timeout { operation })?
    }
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GraphError::InvalidArgument(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_pair(follower_id: &str, following_id: &str) -> Result<()> {
    validate_id("follower_id", follower_id)?;
    validate_id("following_id", following_id)
}

/// Log a failure at a level matching its cause and produce the response pair.
fn report(operation: &str, err: &GraphError) -> (ResponseCode, String) {
    let code = err.code();
    match err {
        GraphError::StoreUnavailable { .. } | GraphError::Serialization(_) => {
            error!("{} failed: {}", operation, err);
        }
        GraphError::Timeout { .. } => {
            error!("{} exceeded the request deadline", operation);
        }
        _ => {
            debug!("{} rejected: {}", operation, err);
        }
    }
    (code, err.public_message())
}
