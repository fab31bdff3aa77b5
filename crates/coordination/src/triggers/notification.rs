use tracing::instrument;

use relaydesk_core::{JobDomain, JobKey};

use crate::error::CoordinationError;
use crate::queue::JobQueue;
use crate::store::CoordinationStore;
use crate::workflow_state::WorkflowStateStore;

use super::batching::BatchingTrigger;
use super::{MessageEvent, TriggerReceipt, TriggerSettings};

/// Batches new-message notification emails per conversation and direction.
#[derive(Debug, Clone)]
pub struct MessageNotificationTrigger<S, Q> {
    inner: BatchingTrigger<S, Q>,
}

impl<S, Q> MessageNotificationTrigger<S, Q>
where
    S: CoordinationStore + Clone,
    Q: JobQueue,
{
    pub fn new(store: S, queue: Q, settings: TriggerSettings) -> Self {
        Self {
            inner: BatchingTrigger::new(JobDomain::MessageNotification, store, queue, settings),
        }
    }

    /// `message-notification:{tenant}:{conversation}:{direction}`
    pub fn job_key(event: &MessageEvent) -> Result<JobKey, CoordinationError> {
        Ok(JobKey::new(
            JobDomain::MessageNotification,
            format!("{}:{}", event.conversation_key(), event.direction),
        )?)
    }

    #[instrument(skip(self, event), fields(conversation = %event.conversation_id, direction = %event.direction))]
    pub fn trigger(&self, event: &MessageEvent) -> Result<TriggerReceipt, CoordinationError> {
        self.inner.fire(Self::job_key(event)?, event.direction, event)
    }

    pub fn settings(&self) -> &TriggerSettings {
        self.inner.settings()
    }

    pub fn workflow_states(&self) -> &WorkflowStateStore<S> {
        self.inner.states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutcomeKind;
    use crate::queue::InMemoryJobQueue;
    use crate::store::InMemoryCoordinationStore;
    use chrono::{DateTime, Utc};
    use relaydesk_core::{Direction, TenantId};
    use std::sync::Arc;
    use std::time::Duration;

    type Trigger = MessageNotificationTrigger<Arc<InMemoryCoordinationStore>, Arc<InMemoryJobQueue>>;

    fn event(tenant: TenantId, id: &str, direction: Direction, secs: i64) -> MessageEvent {
        MessageEvent {
            tenant_id: tenant,
            conversation_id: "conv-1".to_string(),
            message_id: id.to_string(),
            direction,
            sent_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn defaults_batch_for_a_minute_and_retry_slowly() {
        let settings = TriggerSettings::message_notification();
        assert_eq!(settings.delay, Duration::from_secs(60));
        assert_eq!(settings.retry.max_attempts, 6);
        assert_eq!(settings.retry.base_delay, Duration::from_secs(45 * 60));
    }

    #[test]
    fn directions_get_separate_jobs_and_states() {
        let trigger = MessageNotificationTrigger::new(
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(InMemoryJobQueue::new()),
            TriggerSettings::message_notification(),
        );
        let tenant = TenantId::new();

        let inbound = trigger.trigger(&event(tenant, "m1", Direction::Inbound, 0)).unwrap();
        let outbound = trigger.trigger(&event(tenant, "m2", Direction::Outbound, 1)).unwrap();

        assert_eq!(inbound.outcome, OutcomeKind::Created);
        assert_eq!(outbound.outcome, OutcomeKind::Created);
        assert_eq!(
            outbound.job_key.to_string(),
            format!("message-notification:{tenant}:conv-1:outbound")
        );

        let conversation = format!("{tenant}:conv-1");
        let states = trigger.workflow_states();
        let inbound_state = states.get_state(&conversation, Direction::Inbound).unwrap().unwrap();
        let outbound_state = states.get_state(&conversation, Direction::Outbound).unwrap().unwrap();
        assert_eq!(inbound_state.anchor.id, "m1");
        assert_eq!(outbound_state.anchor.id, "m2");
    }

    #[test]
    fn whitespace_in_conversation_id_is_rejected() {
        let mut bad = event(TenantId::new(), "m1", Direction::Inbound, 0);
        bad.conversation_id = "conv 1".to_string();

        assert!(matches!(Trigger::job_key(&bad), Err(CoordinationError::Domain(_))));
    }
}
