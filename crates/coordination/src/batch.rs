//! Worker-side run guard for batching jobs.
//!
//! A batching job only carries its run id and the message that triggered it. The work
//! itself is whatever sits in the key's backlog when the job runs. The guard:
//!
//! 1. checks the workflow state still names this run (missing state aborts the run)
//! 2. takes the per-key lock
//! 3. drains the backlog oldest-first, renewing the lock and re-checking the run before
//!    every handler call, and removing entries only after the handler succeeded
//! 4. clears the workflow state and releases the lock

use std::time::Duration;

use tracing::{debug, error, info, warn};

use relaydesk_core::{Anchor, JobDomain, JobRecord, LockOwner};

use crate::error::CoordinationError;
use crate::keys;
use crate::lock::DistributedLock;
use crate::message_queue::{MessageQueue, QueueEntry};
use crate::store::CoordinationStore;
use crate::triggers::{BatchJobPayload, TriggerSettings};
use crate::workflow_state::WorkflowStateStore;

const DEFAULT_BATCH_SIZE: usize = 50;

/// One slice of the backlog handed to the business handler.
#[derive(Debug)]
pub struct Batch<'a> {
    pub payload: &'a BatchJobPayload,
    /// First unseen event of the whole batch, not of this slice
    pub anchor: &'a Anchor,
    pub entries: &'a [QueueEntry],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Delivered { processed: usize },
    /// A newer run owns the batch; nothing was produced.
    Superseded,
    /// Another worker is draining this key.
    LockBusy,
}

#[derive(Debug, Clone)]
pub struct BatchRunner<S> {
    domain: JobDomain,
    backlog: MessageQueue<S>,
    states: WorkflowStateStore<S>,
    lock: DistributedLock<S>,
    lock_ttl: Duration,
    batch_size: usize,
}

impl<S> BatchRunner<S>
where
    S: CoordinationStore + Clone,
{
    pub fn new(store: S, domain: JobDomain, settings: &TriggerSettings, lock_ttl: Duration) -> Self {
        Self {
            domain,
            backlog: MessageQueue::new(store.clone(), domain, settings.backlog_ttl),
            states: WorkflowStateStore::new(store.clone(), domain, settings.state_ttl),
            lock: DistributedLock::new(store),
            lock_ttl,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn domain(&self) -> JobDomain {
        self.domain
    }

    pub fn run<F>(&self, job: &JobRecord, mut handler: F) -> Result<RunOutcome, CoordinationError>
    where
        F: FnMut(&Batch<'_>) -> Result<(), CoordinationError>,
    {
        let payload: BatchJobPayload = job.payload_as()?;
        let conversation = payload.conversation_key();

        let Some(state) = self.states.get_state(&conversation, payload.direction)? else {
            error!(
                job_key = %job.key,
                run_id = %payload.run_id,
                "workflow state missing for deferred job, aborting run"
            );
            return Err(CoordinationError::MissingWorkflowState {
                key: conversation,
                direction: payload.direction,
            });
        };
        if !state.is_run(&payload.run_id) {
            info!(job_key = %job.key, run_id = %payload.run_id, current = %state.run_id, "run superseded");
            return Ok(RunOutcome::Superseded);
        }

        let logical = job.key.logical();
        let lock_key = keys::lock_key(self.domain, logical);
        let owner = LockOwner::new();
        if !self.lock.acquire(&lock_key, owner, self.lock_ttl)? {
            debug!(job_key = %job.key, "backlog lock busy");
            return Ok(RunOutcome::LockBusy);
        }

        let result = self.drain(logical, &lock_key, owner, &payload, &mut handler);

        match self.lock.release(&lock_key, owner) {
            Ok(true) => {}
            Ok(false) => warn!(lock = %lock_key, "lock expired before release"),
            Err(e) if result.is_ok() => return Err(e.into()),
            Err(e) => warn!(lock = %lock_key, error = %e, "lock release failed"),
        }
        result
    }

    fn drain<F>(
        &self,
        logical: &str,
        lock_key: &str,
        owner: LockOwner,
        payload: &BatchJobPayload,
        handler: &mut F,
    ) -> Result<RunOutcome, CoordinationError>
    where
        F: FnMut(&Batch<'_>) -> Result<(), CoordinationError>,
    {
        let conversation = payload.conversation_key();
        let mut processed = 0;

        loop {
            let entries = self.backlog.peek_batch(logical, self.batch_size)?;
            if entries.is_empty() {
                // Input that arrived while we held the lock sets the flag; look once more.
                if self.backlog.consume_wake_flag(logical)? {
                    continue;
                }
                break;
            }

            if !self.lock.renew(lock_key, owner, self.lock_ttl)? {
                return Err(CoordinationError::LockLost(lock_key.to_string()));
            }
            let state = match self.states.get_state(&conversation, payload.direction)? {
                Some(state) if state.is_run(&payload.run_id) => state,
                _ => {
                    info!(run_id = %payload.run_id, processed, "run superseded mid-batch");
                    return Ok(RunOutcome::Superseded);
                }
            };

            handler(&Batch {
                payload,
                anchor: &state.anchor,
                entries: &entries,
            })?;

            let ids: Vec<String> = entries.into_iter().map(|e| e.member_id).collect();
            processed += self.backlog.remove(logical, &ids)?;
        }

        if !self
            .states
            .clear_if_run(&conversation, payload.direction, &payload.run_id)?
        {
            debug!(run_id = %payload.run_id, "workflow state moved on before clearing");
        }
        info!(run_id = %payload.run_id, processed, "batch delivered");
        Ok(RunOutcome::Delivered { processed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, JobQueue, JobRuntime};
    use crate::store::InMemoryCoordinationStore;
    use crate::engine::OutcomeKind;
    use crate::triggers::{AiAgentReplyTrigger, MessageEvent};
    use chrono::{DateTime, Utc};
    use relaydesk_core::{Direction, SkipReason, TenantId};
    use std::sync::Arc;

    type Store = Arc<InMemoryCoordinationStore>;

    struct Fixture {
        store: Store,
        queue: Arc<InMemoryJobQueue>,
        trigger: AiAgentReplyTrigger<Store, Arc<InMemoryJobQueue>>,
        runner: BatchRunner<Store>,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let settings = TriggerSettings::ai_agent_reply();
        Fixture {
            trigger: AiAgentReplyTrigger::new(store.clone(), queue.clone(), settings.clone()),
            runner: BatchRunner::new(
                store.clone(),
                JobDomain::AiAgentReply,
                &settings,
                Duration::from_secs(30),
            ),
            store,
            queue,
            tenant: TenantId::new(),
        }
    }

    impl Fixture {
        fn message(&self, id: &str, secs: i64) -> MessageEvent {
            self.message_from(Direction::Inbound, id, secs)
        }

        fn message_from(&self, direction: Direction, id: &str, secs: i64) -> MessageEvent {
            MessageEvent {
                tenant_id: self.tenant,
                conversation_id: "conv-1".to_string(),
                message_id: id.to_string(),
                direction,
                sent_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            }
        }

        fn claim(&self, key: &relaydesk_core::JobKey) -> JobRecord {
            self.queue.promote(key).unwrap();
            self.queue.claim_next().unwrap().unwrap()
        }
    }

    #[test]
    fn delivers_whole_backlog_in_order_and_clears_state() {
        let f = fixture();
        let receipt = f.trigger.trigger(&f.message("m2", 2)).unwrap();
        f.trigger.trigger(&f.message("m1", 1)).unwrap();
        f.trigger.trigger(&f.message("m3", 3)).unwrap();

        let job = f.claim(&receipt.job_key);
        let mut seen = Vec::new();
        let mut anchors = Vec::new();
        let outcome = f
            .runner
            .run(&job, |batch| {
                seen.extend(batch.entries.iter().map(|e| e.member_id.clone()));
                anchors.push(batch.anchor.id.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome, RunOutcome::Delivered { processed: 3 });
        assert_eq!(seen, ["m1", "m2", "m3"]);
        assert_eq!(anchors, ["m1"]);

        let conversation = format!("{}:conv-1", f.tenant);
        let states = f.trigger.workflow_states();
        assert_eq!(states.get_state(&conversation, Direction::Inbound).unwrap(), None);
        assert_eq!(f.store.get(&keys::lock_key(JobDomain::AiAgentReply, &conversation)).unwrap(), None);
    }

    #[test]
    fn superseded_run_produces_nothing() {
        let f = fixture();
        let first = f.trigger.trigger(&f.message("m1", 0)).unwrap();
        let job = f.claim(&first.job_key);

        // Arrives while the first job is active: new run takes over
        f.trigger.trigger(&f.message("m2", 5)).unwrap();

        let mut calls = 0;
        let outcome = f
            .runner
            .run(&job, |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome, RunOutcome::Superseded);
        assert_eq!(calls, 0);
        assert_eq!(
            f.runner.backlog.size(&format!("{}:conv-1", f.tenant)).unwrap(),
            2
        );
    }

    #[test]
    fn missing_state_is_an_invariant_violation() {
        let f = fixture();
        let receipt = f.trigger.trigger(&f.message("m1", 0)).unwrap();
        let conversation = format!("{}:conv-1", f.tenant);
        f.trigger
            .workflow_states()
            .clear_state(&conversation, Direction::Inbound)
            .unwrap();

        let job = f.claim(&receipt.job_key);
        let err = f.runner.run(&job, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoordinationError::MissingWorkflowState { .. }));
    }

    #[test]
    fn busy_lock_leaves_backlog_alone() {
        let f = fixture();
        let receipt = f.trigger.trigger(&f.message("m1", 0)).unwrap();
        let conversation = format!("{}:conv-1", f.tenant);
        let lock = DistributedLock::new(f.store.clone());
        assert!(lock
            .acquire(
                &keys::lock_key(JobDomain::AiAgentReply, &conversation),
                LockOwner::new(),
                Duration::from_secs(30)
            )
            .unwrap());

        let job = f.claim(&receipt.job_key);
        assert_eq!(f.runner.run(&job, |_| Ok(())).unwrap(), RunOutcome::LockBusy);
        assert_eq!(f.runner.backlog.size(&conversation).unwrap(), 1);
    }

    #[test]
    fn handler_failure_keeps_entries_and_state_and_releases_lock() {
        let f = fixture();
        let receipt = f.trigger.trigger(&f.message("m1", 0)).unwrap();
        let conversation = format!("{}:conv-1", f.tenant);

        let job = f.claim(&receipt.job_key);
        let err = f
            .runner
            .run(&job, |_| Err(CoordinationError::Handler("model timeout".into())))
            .unwrap_err();

        assert!(matches!(err, CoordinationError::Handler(_)));
        assert_eq!(f.runner.backlog.size(&conversation).unwrap(), 1);
        assert!(f
            .trigger
            .workflow_states()
            .get_state(&conversation, Direction::Inbound)
            .unwrap()
            .is_some());
        assert_eq!(f.store.get(&keys::lock_key(JobDomain::AiAgentReply, &conversation)).unwrap(), None);
    }

    #[test]
    fn small_batches_drain_everything() {
        let f = fixture();
        let receipt = f.trigger.trigger(&f.message("m0", 0)).unwrap();
        for i in 1..5 {
            f.trigger.trigger(&f.message(&format!("m{i}"), i)).unwrap();
        }

        let runner = f.runner.clone().with_batch_size(2);
        let job = f.claim(&receipt.job_key);
        let mut slices = 0;
        let outcome = runner
            .run(&job, |_| {
                slices += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome, RunOutcome::Delivered { processed: 5 });
        assert_eq!(slices, 3);
        assert!(f.queue.get(&receipt.job_key).unwrap().is_some());
    }

    #[test]
    fn mixed_direction_burst_is_one_batch_and_leaves_no_state_behind() {
        let f = fixture();
        let conversation = format!("{}:conv-1", f.tenant);
        let first = f.trigger.trigger(&f.message_from(Direction::Inbound, "m1", 0)).unwrap();
        let reply = f.trigger.trigger(&f.message_from(Direction::Outbound, "m2", 1)).unwrap();
        assert_eq!(reply.outcome, OutcomeKind::Skipped(SkipReason::Debouncing));
        assert_eq!(reply.run_id, first.run_id);

        let job = f.claim(&first.job_key);
        let mut seen = Vec::new();
        let outcome = f
            .runner
            .run(&job, |batch| {
                seen.extend(batch.entries.iter().map(|e| e.member_id.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, RunOutcome::Delivered { processed: 2 });
        assert_eq!(seen, ["m1", "m2"]);

        let states = f.trigger.workflow_states();
        assert_eq!(states.get_state(&conversation, Direction::Inbound).unwrap(), None);
        assert_eq!(states.get_state(&conversation, Direction::Outbound).unwrap(), None);
        f.queue.complete(&job.key).unwrap();

        // An hour later the next batch starts from its own first message
        let later = f.trigger.trigger(&f.message_from(Direction::Outbound, "m3", 3_600)).unwrap();
        assert_eq!(later.outcome, OutcomeKind::Replaced);
        let job = f.claim(&later.job_key);
        let mut anchors = Vec::new();
        f.runner
            .run(&job, |batch| {
                anchors.push(batch.anchor.id.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(anchors, ["m3"]);
    }

    #[test]
    fn outbound_message_supersedes_active_inbound_run() {
        let f = fixture();
        let first = f.trigger.trigger(&f.message_from(Direction::Inbound, "m1", 0)).unwrap();
        let job = f.claim(&first.job_key);

        let second = f.trigger.trigger(&f.message_from(Direction::Outbound, "m2", 5)).unwrap();
        assert_eq!(second.outcome, OutcomeKind::Superseding);

        assert_eq!(f.runner.run(&job, |_| Ok(())).unwrap(), RunOutcome::Superseded);
    }
}
