use tracing::{debug, info, warn};

use relaydesk_core::{Anchor, DedupPolicy, Direction, JobDomain, JobKey, RunId, SkipReason};

use crate::engine::{EnqueueRequest, JobDecisionEngine, Outcome};
use crate::error::CoordinationError;
use crate::message_queue::MessageQueue;
use crate::queue::JobQueue;
use crate::store::CoordinationStore;
use crate::workflow_state::WorkflowStateStore;

use super::{existing_run_id, BatchJobPayload, MessageEvent, TriggerReceipt, TriggerSettings};

/// Debounced trigger shared by the message batching domains.
///
/// Order matters: the message is in the backlog before any job can observe it, and the
/// workflow state is only touched once the engine has settled the outcome.
///
/// `direction` names the workflow state the job key is tracked under. It must be the
/// same for every event that maps to one key, so the job's payload, the trigger and the
/// worker all read and clear the same record.
#[derive(Debug, Clone)]
pub(super) struct BatchingTrigger<S, Q> {
    engine: JobDecisionEngine<Q>,
    backlog: MessageQueue<S>,
    states: WorkflowStateStore<S>,
    settings: TriggerSettings,
}

impl<S, Q> BatchingTrigger<S, Q>
where
    S: CoordinationStore + Clone,
    Q: JobQueue,
{
    pub(super) fn new(domain: JobDomain, store: S, queue: Q, settings: TriggerSettings) -> Self {
        Self {
            engine: JobDecisionEngine::new(queue),
            backlog: MessageQueue::new(store.clone(), domain, settings.backlog_ttl),
            states: WorkflowStateStore::new(store, domain, settings.state_ttl),
            settings,
        }
    }

    pub(super) fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub(super) fn states(&self) -> &WorkflowStateStore<S> {
        &self.states
    }

    pub(super) fn fire(
        &self,
        key: JobKey,
        direction: Direction,
        event: &MessageEvent,
    ) -> Result<TriggerReceipt, CoordinationError> {
        let millis = event.sent_at.timestamp_millis();
        let enqueued = self
            .backlog
            .enqueue(key.logical(), &event.message_id, millis, self.settings.wake_ttl)?;
        if !enqueued.added {
            debug!(job_key = %key, message_id = %event.message_id, "message already in backlog");
        }

        let run_id = RunId::derive(&key, event.sent_at);
        let anchor = Anchor::new(event.message_id.clone(), event.sent_at);
        let payload = BatchJobPayload {
            tenant_id: event.tenant_id,
            conversation_id: event.conversation_id.clone(),
            direction,
            run_id: run_id.clone(),
            triggered_by: anchor.clone(),
        };
        let request = EnqueueRequest {
            key: key.clone(),
            payload: serde_json::to_value(&payload)?,
            options: self.settings.job_options(),
            disambiguator: millis.to_string(),
        };

        let outcome = self.engine.decide(DedupPolicy::Debounced, &request)?;
        let conversation = event.conversation_key();

        let run_id = match &outcome {
            Outcome::Created { .. } | Outcome::Replaced { .. } | Outcome::Superseding { .. } => {
                self.states
                    .supersede(&conversation, direction, run_id.clone(), anchor)?;
                Some(run_id)
            }
            Outcome::Skipped {
                reason: SkipReason::Debouncing,
                existing_payload,
            } => match existing_run_id(&outcome) {
                Some(surviving) => {
                    self.states
                        .absorb(&conversation, direction, surviving.clone(), anchor)?;
                    Some(surviving)
                }
                None if existing_payload.is_some() => {
                    return Err(CoordinationError::Payload(format!(
                        "job {key} carries no run id"
                    )));
                }
                None => {
                    // Surviving job vanished between reads; its worker owns the backlog now.
                    warn!(job_key = %key, "debounced without a surviving job payload");
                    None
                }
            },
            Outcome::Skipped { .. } => existing_run_id(&outcome),
        };

        info!(
            job_key = %key,
            outcome = %outcome.kind(),
            run_id = ?run_id.as_ref().map(RunId::as_str),
            "trigger processed"
        );

        Ok(TriggerReceipt {
            job_key: outcome.job().map(|job| job.key.clone()).unwrap_or(key),
            outcome: outcome.kind(),
            run_id,
        })
    }
}
