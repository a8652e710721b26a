//! Business logic services

pub mod relationship;

pub use relationship::RelationshipService;
