//! Relationship RPC messages
//!
//! Every response carries a numeric `code` (0 on success) and a
//! human-readable `message`. Failures never surface as transport errors.

use super::RelationshipRecord;
use serde::{Deserialize, Serialize};

/// Stable response codes returned by every relationship RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResponseCode {
    Success,
    /// Missing or malformed identifiers
    InvalidArgument,
    SelfFollow,
    AlreadyFollowing,
    StoreUnavailable,
    Timeout,
    Internal,
}

impl ResponseCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::InvalidArgument => 1001,
            ResponseCode::SelfFollow => 1002,
            ResponseCode::AlreadyFollowing => 2001,
            ResponseCode::StoreUnavailable => 5001,
            ResponseCode::Timeout => 5002,
            ResponseCode::Internal => 5003,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResponseCode::Success
    }
}

impl From<ResponseCode> for i32 {
    fn from(code: ResponseCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ResponseCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseCode::Success),
            1001 => Ok(ResponseCode::InvalidArgument),
            1002 => Ok(ResponseCode::SelfFollow),
            2001 => Ok(ResponseCode::AlreadyFollowing),
            5001 => Ok(ResponseCode::StoreUnavailable),
            5002 => Ok(ResponseCode::Timeout),
            5003 => Ok(ResponseCode::Internal),
            other => Err(format!("unknown response code: {}", other)),
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

// Requests

/// Body of Follow / Unfollow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeRequest {
    #[serde(default)]
    pub follower_id: String,
    #[serde(default)]
    pub following_id: String,
}

/// Query of IsFollowing / CheckFollowStatus
pub type EdgeQuery = EdgeRequest;

/// Query of the paginated list RPCs. Absent values take the defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// Responses

/// Response of Follow / Unfollow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub code: ResponseCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsFollowingResponse {
    pub code: ResponseCode,
    pub message: String,
    pub is_following: bool,
}

/// Response of GetFollowList / GetMutualFollows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeListResponse {
    pub code: ResponseCode,
    pub message: String,
    pub edges: Vec<RelationshipRecord>,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerListResponse {
    pub code: ResponseCode,
    pub message: String,
    pub edges: Vec<RelationshipRecord>,
}

/// Response of GetFollowCount / GetFollowerCount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub code: ResponseCode,
    pub message: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowStatusResponse {
    pub code: ResponseCode,
    pub message: String,
    pub is_following: bool,
    pub is_mutual: bool,
}

pub const SUCCESS_MESSAGE: &str = "success";

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl IsFollowingResponse {
    pub fn ok(is_following: bool) -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            is_following,
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            is_following: false,
        }
    }
}

impl EdgeListResponse {
    pub fn ok(edges: Vec<RelationshipRecord>, total: i64, has_more: bool) -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            edges,
            total,
            has_more,
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            edges: Vec::new(),
            total: 0,
            has_more: false,
        }
    }
}

impl FollowerListResponse {
    pub fn ok(edges: Vec<RelationshipRecord>) -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            edges,
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            edges: Vec::new(),
        }
    }
}

impl CountResponse {
    pub fn ok(count: i64) -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            count,
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            count: 0,
        }
    }
}

impl FollowStatusResponse {
    pub fn ok(is_following: bool, is_mutual: bool) -> Self {
        Self {
            code: ResponseCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            is_following,
            is_mutual,
        }
    }

    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            is_following: false,
            is_mutual: false,
        }
    }
}
