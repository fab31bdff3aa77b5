//! Per-key backlog of pending trigger IDs plus a wake flag.
//!
//! Members are unique per key (redelivery of the same ID is a no-op) and come back in
//! ascending score order, where the score is the triggering event's timestamp in
//! milliseconds. Workers must process in that order.
//!
//! The wake flag is set on every enqueue with a short TTL. A worker that already holds
//! the key's lock consumes it after draining to learn whether new input arrived in the
//! meantime, without needing a push channel.

use std::time::Duration;

use relaydesk_core::JobDomain;

use crate::keys;
use crate::store::{CoordinationStore, StoreError};

const WAKE_SENTINEL: &str = "1";

/// One pending trigger in a key's backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub member_id: String,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueResult {
    /// `false` when the member was already pending
    pub added: bool,
}

#[derive(Debug, Clone)]
pub struct MessageQueue<S> {
    store: S,
    domain: JobDomain,
    backlog_ttl: Duration,
}

impl<S> MessageQueue<S>
where
    S: CoordinationStore,
{
    pub fn new(store: S, domain: JobDomain, backlog_ttl: Duration) -> Self {
        Self {
            store,
            domain,
            backlog_ttl,
        }
    }

    pub fn enqueue(
        &self,
        logical: &str,
        member_id: &str,
        score: i64,
        wake_ttl: Duration,
    ) -> Result<EnqueueResult, StoreError> {
        let added = self.store.sorted_add_if_absent(
            &keys::queue_key(self.domain, logical),
            member_id,
            score,
            self.backlog_ttl,
        )?;
        self.store
            .set(&keys::wake_key(self.domain, logical), WAKE_SENTINEL, wake_ttl)?;
        Ok(EnqueueResult { added })
    }

    /// Oldest `limit` entries, without removing them.
    pub fn peek_batch(&self, logical: &str, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .store
            .sorted_range(&keys::queue_key(self.domain, logical), limit)?
            .into_iter()
            .map(|m| QueueEntry {
                member_id: m.member,
                score: m.score,
            })
            .collect())
    }

    /// Remove entries once they are durably processed.
    pub fn remove(&self, logical: &str, member_ids: &[String]) -> Result<usize, StoreError> {
        if member_ids.is_empty() {
            return Ok(0);
        }
        self.store
            .sorted_remove(&keys::queue_key(self.domain, logical), member_ids)
    }

    pub fn size(&self, logical: &str) -> Result<usize, StoreError> {
        self.store.sorted_len(&keys::queue_key(self.domain, logical))
    }

    /// Delete the wake flag and report whether it was set.
    pub fn consume_wake_flag(&self, logical: &str) -> Result<bool, StoreError> {
        self.store.delete(&keys::wake_key(self.domain, logical))
    }
}
