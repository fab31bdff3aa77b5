//! Job queue runtime abstraction.
//!
//! The decision engine only needs the producer-side primitives in [`JobQueue`]:
//! add under a unique key, look a key up, read a job's lifecycle state, remove a job,
//! and count jobs per state. Any runtime offering these is injectable.
//!
//! [`JobRuntime`] adds the worker-side transitions (claim, complete, fail, promote) an
//! executor needs to drive jobs through their lifecycle.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use relaydesk_core::{JobKey, JobOptions, JobRecord, LifecycleState};

mod in_memory;

pub use in_memory::InMemoryJobQueue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// A job already exists under the key; nothing was written.
    #[error("job already exists: {0}")]
    AlreadyExists(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
    #[error("job queue state poisoned")]
    Poisoned,
}

/// Job counts per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Producer-side job queue primitives.
pub trait JobQueue: Send + Sync {
    /// Add a job under `key`. Fails with [`QueueError::AlreadyExists`] if the key is taken.
    fn add(&self, key: &JobKey, payload: JsonValue, options: &JobOptions) -> Result<JobRecord, QueueError>;

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, QueueError>;

    /// Current lifecycle state, or `None` if the job no longer exists.
    fn lifecycle_state(&self, job: &JobRecord) -> Result<Option<LifecycleState>, QueueError>;

    /// Remove a job that is not running. Returns `false` if it is gone or active.
    fn remove(&self, job: &JobRecord) -> Result<bool, QueueError>;

    fn counts(&self) -> Result<JobCounts, QueueError>;
}

/// Worker-side transitions.
pub trait JobRuntime: JobQueue {
    /// Claim the oldest runnable job, marking it active.
    fn claim_next(&self) -> Result<Option<JobRecord>, QueueError>;

    fn complete(&self, key: &JobKey) -> Result<JobRecord, QueueError>;

    /// Record a failed execution; the retry policy decides between delayed and failed.
    fn fail(&self, key: &JobKey, error: &str) -> Result<JobRecord, QueueError>;

    /// Make a delayed job runnable now. Returns `false` if it was not delayed.
    fn promote(&self, key: &JobKey) -> Result<bool, QueueError>;
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn add(&self, key: &JobKey, payload: JsonValue, options: &JobOptions) -> Result<JobRecord, QueueError> {
        (**self).add(key, payload, options)
    }

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, QueueError> {
        (**self).get(key)
    }

    fn lifecycle_state(&self, job: &JobRecord) -> Result<Option<LifecycleState>, QueueError> {
        (**self).lifecycle_state(job)
    }

    fn remove(&self, job: &JobRecord) -> Result<bool, QueueError> {
        (**self).remove(job)
    }

    fn counts(&self) -> Result<JobCounts, QueueError> {
        (**self).counts()
    }
}

impl<Q> JobRuntime for Arc<Q>
where
    Q: JobRuntime + ?Sized,
{
    fn claim_next(&self) -> Result<Option<JobRecord>, QueueError> {
        (**self).claim_next()
    }

    fn complete(&self, key: &JobKey) -> Result<JobRecord, QueueError> {
        (**self).complete(key)
    }

    fn fail(&self, key: &JobKey, error: &str) -> Result<JobRecord, QueueError> {
        (**self).fail(key, error)
    }

    fn promote(&self, key: &JobKey) -> Result<bool, QueueError> {
        (**self).promote(key)
    }
}
