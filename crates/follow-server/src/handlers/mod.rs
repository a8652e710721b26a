//! HTTP handlers

pub mod health;
pub mod relationships;

pub use health::health;
