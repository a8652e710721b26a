//! Port traits (interfaces) for dependency injection

pub mod relationship;

pub use relationship::RelationshipRepository;
