//! Coordination store abstraction (mechanics only).
//!
//! Every piece of shared mutable coordination state (locks, backlogs, wake flags,
//! workflow state) lives behind this trait. Producers and workers run as separate
//! processes, so **all** mutual exclusion comes from the store's atomic operations:
//!
//! - **Plain keys**: get / set-with-TTL / delete
//! - **Set-if-absent**: the only way to create a key that must be unique
//! - **Compare-and-act**: set, delete or extend a key only if its current value matches
//! - **Ordered collections**: a per-key sorted set with insert-if-absent by member,
//!   ascending range-by-score reads and removal by member
//!
//! Implementations must make each method atomic on its own. Callers never combine a
//! read and a write without one of the compare-and-act operations guarding it.
//!
//! ## Expiry
//!
//! Every write carries a TTL. A crashed holder's lock, a forgotten wake flag or an
//! abandoned workflow state all disappear on their own; the coordination layer trades
//! strict mutual exclusion for liveness here and expects callers to tolerate the rare
//! double-processing this allows.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

mod in_memory;

pub use in_memory::InMemoryCoordinationStore;

/// Coordination store failure.
///
/// These are transport/infrastructure failures. They always propagate to the caller
/// and are never mapped onto a coordination outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("store state poisoned")]
    Poisoned,
}

/// Member of an ordered per-key collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

/// Keyed store with TTLs, compare-and-act operations and ordered collections.
pub trait CoordinationStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally write `value` with a TTL.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Write only if the key does not exist. Returns whether the write happened.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete the key. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Write `value` only if the current value equals `expected` (`None` = key absent).
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete the key only if its current value equals `expected`.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reset the key's TTL only if its current value equals `expected`.
    fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Insert `member` into the ordered collection unless it is already present.
    ///
    /// The collection's TTL is refreshed either way.
    fn sorted_add_if_absent(
        &self,
        key: &str,
        member: &str,
        score: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Up to `limit` members in ascending score order (ties by member).
    fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, StoreError>;

    /// Remove members; returns how many were present.
    fn sorted_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    fn sorted_len(&self, key: &str) -> Result<usize, StoreError>;
}

impl<S> CoordinationStore for Arc<S>
where
    S: CoordinationStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, value, ttl)
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_set(key, expected, value, ttl)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).compare_and_delete(key, expected)
    }

    fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        (**self).compare_and_expire(key, expected, ttl)
    }

    fn sorted_add_if_absent(
        &self,
        key: &str,
        member: &str,
        score: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).sorted_add_if_absent(key, member, score, ttl)
    }

    fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, StoreError> {
        (**self).sorted_range(key, limit)
    }

    fn sorted_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        (**self).sorted_remove(key, members)
    }

    fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        (**self).sorted_len(key)
    }
}
