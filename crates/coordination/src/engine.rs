//! Job decision engine.
//!
//! Applies a [`DedupPolicy`] against a [`JobQueue`]. The queue's unique-key `add` is the
//! only source of mutual exclusion between producers: when it reports the key as taken,
//! or a replacement finds the old job already gone, the engine re-reads the key and
//! decides again.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use relaydesk_core::{Decision, DedupPolicy, JobKey, JobOptions, JobRecord, SkipReason};

use crate::error::CoordinationError;
use crate::queue::{JobQueue, QueueError};

const MAX_DECISION_ROUNDS: usize = 3;

/// A job the caller would like to exist.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub key: JobKey,
    pub payload: JsonValue,
    pub options: JobOptions,
    /// Suffix for the job key when an active run must be superseded
    pub disambiguator: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created {
        job: JobRecord,
    },
    Replaced {
        job: JobRecord,
        previous: JobRecord,
    },
    /// A new job under a disambiguated key; the active run is left to notice it is stale.
    Superseding {
        job: JobRecord,
        active: JobKey,
    },
    Skipped {
        reason: SkipReason,
        /// Payload of the job that will actually run, when the policy shares it
        existing_payload: Option<JsonValue>,
    },
}

/// Outcome without the job records, for receipts and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum OutcomeKind {
    Created,
    Replaced,
    Superseding,
    Skipped(SkipReason),
}

impl core::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OutcomeKind::Created => f.write_str("created"),
            OutcomeKind::Replaced => f.write_str("replaced"),
            OutcomeKind::Superseding => f.write_str("superseding"),
            OutcomeKind::Skipped(reason) => write!(f, "skipped({reason})"),
        }
    }
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Created { .. } => OutcomeKind::Created,
            Outcome::Replaced { .. } => OutcomeKind::Replaced,
            Outcome::Superseding { .. } => OutcomeKind::Superseding,
            Outcome::Skipped { reason, .. } => OutcomeKind::Skipped(*reason),
        }
    }

    /// Whether this trigger's own job was written.
    pub fn is_created(&self) -> bool {
        !matches!(self, Outcome::Skipped { .. })
    }

    /// The job written for this trigger, if any.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            Outcome::Created { job } | Outcome::Replaced { job, .. } | Outcome::Superseding { job, .. } => {
                Some(job)
            }
            Outcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobDecisionEngine<Q> {
    queue: Q,
}

impl<Q> JobDecisionEngine<Q>
where
    Q: JobQueue,
{
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    #[instrument(skip(self, request), fields(job_key = %request.key))]
    pub fn decide(&self, policy: DedupPolicy, request: &EnqueueRequest) -> Result<Outcome, CoordinationError> {
        for round in 0..MAX_DECISION_ROUNDS {
            let existing = self.queue.get(&request.key)?;
            let state = match &existing {
                Some(job) => self.queue.lifecycle_state(job)?,
                None => None,
            };

            match policy.decide(state.as_ref()) {
                Decision::Create => {
                    if let Some(job) = self.try_add(&request.key, request)? {
                        return Ok(Outcome::Created { job });
                    }
                }
                Decision::Replace => {
                    let Some(previous) = existing else { continue };
                    if !self.queue.remove(&previous)? {
                        debug!(round, "job changed before it could be replaced");
                        continue;
                    }
                    if let Some(job) = self.try_add(&request.key, request)? {
                        return Ok(Outcome::Replaced { job, previous });
                    }
                }
                Decision::CreateDisambiguated => {
                    let key = request.key.with_disambiguator(&request.disambiguator)?;
                    return match self.try_add(&key, request)? {
                        Some(job) => Ok(Outcome::Superseding {
                            job,
                            active: request.key.clone(),
                        }),
                        // Same trigger instant already has its superseding job
                        None => Ok(Outcome::Skipped {
                            reason: SkipReason::Debouncing,
                            existing_payload: self.queue.get(&key)?.map(|job| job.payload),
                        }),
                    };
                }
                Decision::Skip(reason) => {
                    if reason == SkipReason::Unexpected {
                        warn!(
                            state = %state.as_ref().map(|s| s.as_str()).unwrap_or("absent"),
                            "unexpected lifecycle state, skipping"
                        );
                    }
                    let existing_payload = if policy.returns_existing_payload() {
                        existing.map(|job| job.payload)
                    } else {
                        None
                    };
                    return Ok(Outcome::Skipped {
                        reason,
                        existing_payload,
                    });
                }
            }
            debug!(round, "job key changed concurrently, deciding again");
        }

        warn!("no decision settled");
        Err(CoordinationError::Contention(request.key.to_string()))
    }

    /// `None` when the key is already taken.
    fn try_add(&self, key: &JobKey, request: &EnqueueRequest) -> Result<Option<JobRecord>, CoordinationError> {
        match self.queue.add(key, request.payload.clone(), &request.options) {
            Ok(job) => Ok(Some(job)),
            Err(QueueError::AlreadyExists(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, JobCounts, JobRuntime};
    use chrono::Utc;
    use relaydesk_core::{JobDomain, LifecycleState};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn key() -> JobKey {
        JobKey::new(JobDomain::AiAgentReply, "t1:conv-1").unwrap()
    }

    fn request(run: &str) -> EnqueueRequest {
        EnqueueRequest {
            key: key(),
            payload: json!({ "run_id": run }),
            options: JobOptions::default(),
            disambiguator: "1700000000000".to_string(),
        }
    }

    /// Queue whose stored job always reports a fixed lifecycle state.
    struct FixedStateQueue {
        state: Option<LifecycleState>,
        added: Mutex<Vec<JobKey>>,
    }

    impl FixedStateQueue {
        fn new(state: Option<LifecycleState>) -> Self {
            Self {
                state,
                added: Mutex::new(Vec::new()),
            }
        }
    }

    impl JobQueue for FixedStateQueue {
        fn add(&self, key: &JobKey, payload: JsonValue, options: &JobOptions) -> Result<JobRecord, QueueError> {
            self.added.lock().unwrap().push(key.clone());
            Ok(JobRecord::new(key.clone(), payload, options.clone(), Utc::now()))
        }

        fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, QueueError> {
            Ok(self.state.as_ref().map(|_| {
                JobRecord::new(key.clone(), json!({ "run_id": "old" }), JobOptions::default(), Utc::now())
            }))
        }

        fn lifecycle_state(&self, _job: &JobRecord) -> Result<Option<LifecycleState>, QueueError> {
            Ok(self.state.clone())
        }

        fn remove(&self, _job: &JobRecord) -> Result<bool, QueueError> {
            Ok(true)
        }

        fn counts(&self) -> Result<JobCounts, QueueError> {
            Ok(JobCounts::default())
        }
    }

    #[test]
    fn outcomes_follow_the_policy_table() {
        use DedupPolicy::{Debounced, SingleActive, Unique};
        use LifecycleState as S;
        use OutcomeKind::{Created, Replaced, Skipped, Superseding};

        let old = Some(json!({ "run_id": "old" }));
        let unknown = S::Unknown("paused".to_string());

        // (state, policy, kind, existing payload returned)
        let rows = vec![
            (None, Debounced, Created, None),
            (None, SingleActive, Created, None),
            (None, Unique, Created, None),
            (Some(S::Completed), Debounced, Replaced, None),
            (Some(S::Failed), SingleActive, Replaced, None),
            (Some(S::Completed), Unique, Replaced, None),
            (Some(S::Waiting), Debounced, Skipped(SkipReason::Debouncing), old.clone()),
            (Some(S::Delayed), Debounced, Skipped(SkipReason::Debouncing), old.clone()),
            (Some(S::Delayed), SingleActive, Replaced, None),
            (Some(S::Waiting), Unique, Skipped(SkipReason::Debouncing), None),
            (Some(S::Active), Debounced, Superseding, None),
            (Some(S::Active), SingleActive, Skipped(SkipReason::Active), old.clone()),
            (Some(S::Active), Unique, Skipped(SkipReason::Active), None),
            (Some(unknown.clone()), Debounced, Skipped(SkipReason::Unexpected), old.clone()),
            (Some(unknown.clone()), SingleActive, Skipped(SkipReason::Unexpected), old.clone()),
            (Some(unknown), Unique, Skipped(SkipReason::Unexpected), None),
        ];

        for (state, policy, kind, payload) in rows {
            let engine = JobDecisionEngine::new(FixedStateQueue::new(state.clone()));
            let outcome = engine.decide(policy, &request("new")).unwrap();

            assert_eq!(outcome.kind(), kind, "{policy:?} / {state:?}");
            if let Outcome::Skipped { existing_payload, .. } = &outcome {
                assert_eq!(existing_payload, &payload, "{policy:?} / {state:?}");
                assert!(engine.queue().added.lock().unwrap().is_empty());
            }
        }
    }

    #[test]
    fn superseding_job_uses_a_disambiguated_key() {
        let engine = JobDecisionEngine::new(FixedStateQueue::new(Some(LifecycleState::Active)));
        let outcome = engine.decide(DedupPolicy::Debounced, &request("new")).unwrap();

        let Outcome::Superseding { job, active } = outcome else {
            panic!("expected superseding outcome");
        };
        assert_eq!(active, key());
        assert_eq!(job.key.to_string(), "ai-agent-reply:t1:conv-1:1700000000000");
    }

    #[test]
    fn same_superseding_trigger_twice_is_debounced() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = JobDecisionEngine::new(queue.clone());

        engine.decide(DedupPolicy::Debounced, &request("A")).unwrap();
        queue.claim_next().unwrap().unwrap();

        let first = engine.decide(DedupPolicy::Debounced, &request("B")).unwrap();
        assert_eq!(first.kind(), OutcomeKind::Superseding);

        let again = engine.decide(DedupPolicy::Debounced, &request("B")).unwrap();
        assert_eq!(
            again,
            Outcome::Skipped {
                reason: SkipReason::Debouncing,
                existing_payload: Some(json!({ "run_id": "B" })),
            }
        );
    }

    #[test]
    fn repeated_triggers_never_create_two_jobs() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = JobDecisionEngine::new(queue.clone());

        for policy in [DedupPolicy::Debounced, DedupPolicy::SingleActive, DedupPolicy::Unique] {
            for i in 0..3 {
                engine.decide(policy, &request(&format!("run-{i}"))).unwrap();
            }
            assert_eq!(queue.jobs_for("t1:conv-1").unwrap().len(), 1, "{policy:?}");
        }
    }

    /// Every add collides and every read sees nothing: the key is flapping.
    struct FlappingQueue;

    impl JobQueue for FlappingQueue {
        fn add(&self, key: &JobKey, _: JsonValue, _: &JobOptions) -> Result<JobRecord, QueueError> {
            Err(QueueError::AlreadyExists(key.to_string()))
        }
        fn get(&self, _: &JobKey) -> Result<Option<JobRecord>, QueueError> {
            Ok(None)
        }
        fn lifecycle_state(&self, _: &JobRecord) -> Result<Option<LifecycleState>, QueueError> {
            Ok(None)
        }
        fn remove(&self, _: &JobRecord) -> Result<bool, QueueError> {
            Ok(false)
        }
        fn counts(&self) -> Result<JobCounts, QueueError> {
            Ok(JobCounts::default())
        }
    }

    #[test]
    fn gives_up_with_contention_after_bounded_rounds() {
        let engine = JobDecisionEngine::new(FlappingQueue);
        let err = engine.decide(DedupPolicy::Debounced, &request("A")).unwrap_err();
        assert!(matches!(err, CoordinationError::Contention(k) if k == "ai-agent-reply:t1:conv-1"));
    }

    struct DownQueue;

    impl JobQueue for DownQueue {
        fn add(&self, _: &JobKey, _: JsonValue, _: &JobOptions) -> Result<JobRecord, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        fn get(&self, _: &JobKey) -> Result<Option<JobRecord>, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        fn lifecycle_state(&self, _: &JobRecord) -> Result<Option<LifecycleState>, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        fn remove(&self, _: &JobRecord) -> Result<bool, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        fn counts(&self) -> Result<JobCounts, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn unavailable_queue_is_an_error_not_a_decision() {
        let engine = JobDecisionEngine::new(DownQueue);
        let err = engine.decide(DedupPolicy::Unique, &request("A")).unwrap_err();
        assert!(matches!(err, CoordinationError::Queue(QueueError::Unavailable(_))));
    }
}
