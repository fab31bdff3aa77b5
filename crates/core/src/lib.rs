//! `relaydesk-core`: job coordination building blocks.
//!
//! This crate contains **pure** primitives (no IO, no clocks beyond what callers pass in):
//! identifiers, job keys and lifecycle states, retry policies, the deduplication
//! decision table and workflow-state records.

pub mod decision;
pub mod error;
pub mod id;
pub mod job;
pub mod retry;
pub mod workflow;

pub use decision::{Decision, DedupPolicy, SkipReason};
pub use error::{DomainError, DomainResult};
pub use id::{LockOwner, TenantId};
pub use job::{JobDomain, JobKey, JobOptions, JobRecord, LifecycleState};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use workflow::{Anchor, Direction, RunId, WorkflowState};
