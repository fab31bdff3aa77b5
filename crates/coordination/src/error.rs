//! Coordination error model.
//!
//! Only infrastructure failures and broken invariants are errors. A skipped trigger,
//! a superseded run or a busy lock are ordinary results and never show up here.

use thiserror::Error;

use relaydesk_core::{Direction, DomainError};

use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Coordination store unavailable or rejected a command.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Job queue runtime unavailable or rejected a command.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The key kept changing under the engine; no decision settled.
    #[error("job key {0} kept changing; gave up after repeated decisions")]
    Contention(String),

    /// Lock renew/release found another owner: the current unit of work must stop.
    #[error("lock {0} is no longer held by this worker")]
    LockLost(String),

    /// A deferred job woke up with no workflow state to validate against.
    #[error("workflow state missing for {key} ({direction})")]
    MissingWorkflowState { key: String, direction: Direction },

    /// A job payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),

    /// The worker's business handler failed.
    #[error("handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<serde_json::Error> for CoordinationError {
    fn from(value: serde_json::Error) -> Self {
        CoordinationError::Payload(value.to_string())
    }
}
