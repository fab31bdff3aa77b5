use tracing::instrument;

use relaydesk_core::{Direction, JobDomain, JobKey};

use crate::error::CoordinationError;
use crate::queue::JobQueue;
use crate::store::CoordinationStore;
use crate::workflow_state::WorkflowStateStore;

use super::batching::BatchingTrigger;
use super::{MessageEvent, TriggerReceipt, TriggerSettings};

/// Schedules an AI agent reply for a conversation.
///
/// Debounced: a burst of messages produces one reply job, and a message arriving while
/// the agent is already composing starts a superseding run.
///
/// One reply covers the whole conversation, whichever side wrote each message, so the
/// workflow state is always tracked under [`Self::STATE_DIRECTION`].
#[derive(Debug, Clone)]
pub struct AiAgentReplyTrigger<S, Q> {
    inner: BatchingTrigger<S, Q>,
}

impl<S, Q> AiAgentReplyTrigger<S, Q>
where
    S: CoordinationStore + Clone,
    Q: JobQueue,
{
    /// The agent answers inbound traffic; outbound messages join the same batch.
    pub const STATE_DIRECTION: Direction = Direction::Inbound;

    pub fn new(store: S, queue: Q, settings: TriggerSettings) -> Self {
        Self {
            inner: BatchingTrigger::new(JobDomain::AiAgentReply, store, queue, settings),
        }
    }

    /// `ai-agent-reply:{tenant}:{conversation}`
    pub fn job_key(event: &MessageEvent) -> Result<JobKey, CoordinationError> {
        Ok(JobKey::new(JobDomain::AiAgentReply, event.conversation_key())?)
    }

    #[instrument(skip(self, event), fields(conversation = %event.conversation_id, message_id = %event.message_id))]
    pub fn trigger(&self, event: &MessageEvent) -> Result<TriggerReceipt, CoordinationError> {
        self.inner.fire(Self::job_key(event)?, Self::STATE_DIRECTION, event)
    }

    pub fn settings(&self) -> &TriggerSettings {
        self.inner.settings()
    }

    pub fn workflow_states(&self) -> &WorkflowStateStore<S> {
        self.inner.states()
    }
}
