//! In-memory response store for the stash caching proxy.
//!
//! The store is deliberately runtime-free: it knows nothing about tokio or
//! axum. Callers pass `now` explicitly to every time-dependent operation so a
//! single request or sweep pass evaluates freshness against one instant.

pub mod entry;
pub mod store;

pub use entry::CacheEntry;
pub use store::{CacheStats, CacheStore};
