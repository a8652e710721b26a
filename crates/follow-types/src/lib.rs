//! Follow Types - Pure type definitions for the follow graph
//!
//! This crate contains only plain data types (edges, pagination, RPC
//! messages) with no async runtime or storage dependencies, so it can be
//! shared by the server and by any client of the relationship RPCs.

pub mod message;
pub mod page;
pub mod relationship;

pub use message::*;
pub use page::*;
pub use relationship::*;
