//! Coordination store adapters.
//!
//! The in-memory store lives in `relaydesk-coordination`; this module adds the
//! persistent backend.

#[cfg(feature = "redis")]
pub mod redis_store;

#[cfg(feature = "redis")]
pub use redis_store::{RedisCoordinationStore, RedisStoreOptions};
