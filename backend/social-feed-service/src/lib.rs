//! Social feed service: posts, votes and a cursor-paginated feed.
//!
//! Votes keep each post's `points` equal to the sum of its stored votes;
//! per-request loaders batch the creator and vote-status lookups of a page.

pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod loaders;
pub mod metrics;
pub mod middleware;
pub mod services;
pub mod store;

pub use error::{ServiceError, ServiceResult};
