//! Distributed lock over the coordination store.
//!
//! A lock is a key holding the owner's token with a TTL:
//!
//! - `acquire` is set-if-absent
//! - `renew` is compare-and-extend
//! - `release` is compare-and-delete
//!
//! Renew and release are single atomic store operations, so a holder whose lock expired
//! and was re-acquired by someone else can never extend or delete the new owner's lock.
//! A `false` from either means ownership is gone: abort the unit of work, do not retry
//! the lock call.

use std::time::Duration;

use tracing::debug;

use relaydesk_core::LockOwner;

use crate::store::{CoordinationStore, StoreError};

#[derive(Debug, Clone)]
pub struct DistributedLock<S> {
    store: S,
}

impl<S> DistributedLock<S>
where
    S: CoordinationStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn acquire(&self, key: &str, owner: LockOwner, ttl: Duration) -> Result<bool, StoreError> {
        let acquired = self.store.set_if_absent(key, &owner.to_string(), ttl)?;
        debug!(lock = key, owner = %owner, acquired, "lock acquire");
        Ok(acquired)
    }

    pub fn renew(&self, key: &str, owner: LockOwner, ttl: Duration) -> Result<bool, StoreError> {
        self.store.compare_and_expire(key, &owner.to_string(), ttl)
    }

    pub fn release(&self, key: &str, owner: LockOwner) -> Result<bool, StoreError> {
        let released = self.store.compare_and_delete(key, &owner.to_string())?;
        debug!(lock = key, owner = %owner, released, "lock release");
        Ok(released)
    }

    /// Current holder, if any.
    pub fn holder(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get(key)
    }
}
