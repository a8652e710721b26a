//! Relationship types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directed follow edge: `follower_id` follows `following_id`.
///
/// Edges are never updated in place. An edge either exists or it doesn't.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub follower_id: String,
    pub following_id: String,
    pub created_at: DateTime<Utc>,
}

impl RelationshipRecord {
    pub fn new(follower_id: impl Into<String>, following_id: impl Into<String>) -> Self {
        Self {
            follower_id: follower_id.into(),
            following_id: following_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_self_follow(&self) -> bool {
        self.follower_id == self.following_id
    }
}

/// Result of a follow status check between two users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowStatus {
    pub is_following: bool,
    pub is_mutual: bool,
}

impl FollowStatus {
    pub fn from_directions(forward: bool, backward: bool) -> Self {
        Self {
            is_following: forward,
            is_mutual: forward && backward,
        }
    }
}
