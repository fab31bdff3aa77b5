//! Typed triggers: one producer per job domain.
//!
//! A trigger derives the deterministic job key for its domain, builds the job payload and
//! options, and runs the decision engine. Batching domains (AI replies, notifications)
//! also record the triggering message in the per-key backlog and keep the workflow state
//! in step with the outcome.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relaydesk_core::{Anchor, Direction, JobKey, JobOptions, RetryPolicy, RunId, TenantId};

use crate::engine::{Outcome, OutcomeKind};
use crate::keys;

mod ai_reply;
mod batching;
mod crawl;
mod notification;
mod training;

pub use ai_reply::AiAgentReplyTrigger;
pub use crawl::{CrawlPayload, CrawlRequest, WebCrawlTrigger};
pub use notification::MessageNotificationTrigger;
pub use training::{AiTrainingTrigger, TrainingPayload, TrainingRequest};

/// Delay, retry policy and coordination TTLs for one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSettings {
    /// Start delay: the debounce window for batching domains
    pub delay: Duration,
    pub retry: RetryPolicy,
    pub wake_ttl: Duration,
    pub backlog_ttl: Duration,
    pub state_ttl: Duration,
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

impl TriggerSettings {
    pub fn new(delay: Duration, retry: RetryPolicy) -> Self {
        Self {
            delay,
            retry,
            wake_ttl: Duration::from_secs(30),
            backlog_ttl: DAY,
            state_ttl: DAY,
        }
    }

    pub fn ai_agent_reply() -> Self {
        Self::new(
            Duration::from_secs(2),
            RetryPolicy::exponential(5, Duration::from_secs(5)),
        )
    }

    pub fn ai_training() -> Self {
        Self::new(
            Duration::from_secs(10),
            RetryPolicy::exponential(2, Duration::from_secs(30)),
        )
    }

    pub fn message_notification() -> Self {
        Self::new(
            Duration::from_secs(60),
            RetryPolicy::exponential(6, Duration::from_secs(45 * 60)),
        )
    }

    pub fn web_crawl() -> Self {
        Self::new(
            Duration::ZERO,
            RetryPolicy::exponential(3, Duration::from_secs(60)),
        )
    }

    pub fn with_ttls(mut self, state_ttl: Duration, backlog_ttl: Duration, wake_ttl: Duration) -> Self {
        self.state_ttl = state_ttl;
        self.backlog_ttl = backlog_ttl;
        self.wake_ttl = wake_ttl;
        self
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions::new(self.retry.clone()).delayed(self.delay)
    }
}

/// What a trigger did, without the job records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReceipt {
    pub job_key: JobKey,
    pub outcome: OutcomeKind,
    /// Run that will act on this trigger, when known
    pub run_id: Option<RunId>,
}

/// A conversation message that may need a deferred reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub tenant_id: TenantId,
    pub conversation_id: String,
    pub message_id: String,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
}

impl MessageEvent {
    /// `{tenant}:{conversation}`
    pub fn conversation_key(&self) -> String {
        keys::tenant_scoped(self.tenant_id, &self.conversation_id)
    }
}

/// Payload of a batching job: which run it belongs to and the event that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobPayload {
    pub tenant_id: TenantId,
    pub conversation_id: String,
    pub direction: Direction,
    pub run_id: RunId,
    pub triggered_by: Anchor,
}

impl BatchJobPayload {
    pub fn conversation_key(&self) -> String {
        keys::tenant_scoped(self.tenant_id, &self.conversation_id)
    }
}

/// Run id carried by a skipped outcome's payload, if it has one.
fn existing_run_id(outcome: &Outcome) -> Option<RunId> {
    match outcome {
        Outcome::Skipped {
            existing_payload: Some(payload),
            ..
        } => payload
            .get("run_id")
            .and_then(|v| v.as_str())
            .map(RunId::new),
        _ => None,
    }
}
