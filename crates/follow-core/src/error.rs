//! Error types for the follow graph

use follow_types::ResponseCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Which tier of storage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Durable,
    Cache,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Durable => write!(f, "durable"),
            StoreKind::Cache => write!(f, "cache"),
        }
    }
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("User {0} cannot follow themselves")]
    SelfFollow(String),

    #[error("{follower_id} already follows {following_id}")]
    AlreadyFollowing {
        follower_id: String,
        following_id: String,
    },

    #[error("{store} store unavailable during {operation}: {message}")]
    StoreUnavailable {
        operation: &'static str,
        store: StoreKind,
        message: String,
    },

    #[error("Timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    /// Wrap a raw storage error with the call and the store it failed in.
    pub fn store(store: StoreKind, operation: &'static str, err: impl std::fmt::Display) -> Self {
        GraphError::StoreUnavailable {
            operation,
            store,
            message: err.to_string(),
        }
    }

    pub fn durable(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::store(StoreKind::Durable, operation, err)
    }

    pub fn cache(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::store(StoreKind::Cache, operation, err)
    }

    pub fn code(&self) -> ResponseCode {
        match self {
            GraphError::InvalidArgument(_) => ResponseCode::InvalidArgument,
            GraphError::SelfFollow(_) => ResponseCode::SelfFollow,
            GraphError::AlreadyFollowing { .. } => ResponseCode::AlreadyFollowing,
            GraphError::StoreUnavailable { .. } => ResponseCode::StoreUnavailable,
            GraphError::Timeout { .. } => ResponseCode::Timeout,
            GraphError::Serialization(_) => ResponseCode::Internal,
        }
    }

    /// Message safe to hand back across the RPC boundary.
    ///
    /// Storage failures are reported generically; the raw error stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GraphError::StoreUnavailable { operation, .. } => {
                format!("storage unavailable during {}", operation)
            }
            GraphError::Serialization(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            GraphError::SelfFollow("u1".into()).code(),
            ResponseCode::SelfFollow
        );
        assert_eq!(
            GraphError::durable("follow", "connection refused").code(),
            ResponseCode::StoreUnavailable
        );
        assert_eq!(
            GraphError::Timeout { operation: "unfollow" }.code(),
            ResponseCode::Timeout
        );
    }

    #[test]
    fn test_public_message_hides_store_details() {
        let err = GraphError::cache("is_following", "IoError: broken pipe 10.0.0.3:6379");
        assert!(err.to_string().contains("broken pipe"));
        assert!(err.to_string().contains("cache store"));
        assert_eq!(err.public_message(), "storage unavailable during is_following");
    }
}
