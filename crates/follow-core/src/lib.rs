//! Follow Core Library
//!
//! Domain error type, the relationship repository port, and the
//! store-independent algorithms (pagination, mutual-follow intersection).

// Re-export pure types from follow-types
pub use follow_types::*;

pub mod error;
pub mod mutual;
pub mod ports;

pub use error::{GraphError, Result, StoreKind};
pub use mutual::{intersect_follow_sets, paginate};
pub use ports::RelationshipRepository;
