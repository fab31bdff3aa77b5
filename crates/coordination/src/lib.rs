//! `relaydesk-coordination`: job coordination mechanics.
//!
//! Everything here works against two injectable seams:
//!
//! - [`store::CoordinationStore`]: keyed store with TTLs, compare-and-act and ordered sets
//! - [`queue::JobQueue`]: deferred-job runtime with unique-key adds
//!
//! On top of them sit the lock, the per-key backlog, the workflow state store, the
//! decision engine, the typed triggers and the worker-side batch guard.

pub mod batch;
pub mod engine;
pub mod error;
pub mod keys;
pub mod lock;
pub mod message_queue;
pub mod queue;
pub mod store;
pub mod triggers;
pub mod workflow_state;

pub use batch::{Batch, BatchRunner, RunOutcome};
pub use engine::{EnqueueRequest, JobDecisionEngine, Outcome, OutcomeKind};
pub use error::CoordinationError;
pub use lock::DistributedLock;
pub use message_queue::{EnqueueResult, MessageQueue, QueueEntry};
pub use queue::{InMemoryJobQueue, JobCounts, JobQueue, JobRuntime, QueueError};
pub use store::{CoordinationStore, InMemoryCoordinationStore, ScoredMember, StoreError};
pub use triggers::{
    AiAgentReplyTrigger, AiTrainingTrigger, BatchJobPayload, MessageEvent, MessageNotificationTrigger,
    TriggerReceipt, TriggerSettings, WebCrawlTrigger,
};
pub use workflow_state::WorkflowStateStore;
