//! In-memory job queue runtime for tests/dev.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value as JsonValue;

use relaydesk_core::{JobKey, JobOptions, JobRecord, LifecycleState};

use super::{JobCounts, JobQueue, JobRuntime, QueueError};

/// In-memory runtime keyed by the rendered job key.
///
/// Completed and failed jobs under a primary key are retained until replaced, which is
/// what lets the decision engine observe terminal states. Superseding jobs live under a
/// fresh disambiguated key each time and are dropped as soon as they settle, so the map
/// stays bounded by the number of live logical keys.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, JobRecord>>, QueueError> {
        self.jobs.read().map_err(|_| QueueError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, JobRecord>>, QueueError> {
        self.jobs.write().map_err(|_| QueueError::Poisoned)
    }

    /// All jobs for a logical key (primary and disambiguated), oldest first.
    pub fn jobs_for(&self, logical: &str) -> Result<Vec<JobRecord>, QueueError> {
        let jobs = self.read()?;
        let mut out: Vec<_> = jobs
            .values()
            .filter(|j| j.key.logical() == logical)
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        Ok(out)
    }

    fn transition<F>(&self, key: &JobKey, f: F) -> Result<JobRecord, QueueError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(&key.to_string())
            .ok_or_else(|| QueueError::NotFound(key.to_string()))?;
        f(job);
        let updated = job.clone();
        if updated.state.is_terminal() && key.disambiguator().is_some() {
            jobs.remove(&key.to_string());
        }
        Ok(updated)
    }
}

impl JobQueue for InMemoryJobQueue {
    fn add(&self, key: &JobKey, payload: JsonValue, options: &JobOptions) -> Result<JobRecord, QueueError> {
        let mut jobs = self.write()?;
        let id = key.to_string();
        if jobs.contains_key(&id) {
            return Err(QueueError::AlreadyExists(id));
        }
        let job = JobRecord::new(key.clone(), payload, options.clone(), Utc::now());
        jobs.insert(id, job.clone());
        Ok(job)
    }

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, QueueError> {
        let jobs = self.read()?;
        let now = Utc::now();
        Ok(jobs.get(&key.to_string()).map(|j| {
            let mut j = j.clone();
            j.state = j.state_at(now);
            j
        }))
    }

    fn lifecycle_state(&self, job: &JobRecord) -> Result<Option<LifecycleState>, QueueError> {
        let jobs = self.read()?;
        Ok(jobs.get(&job.key.to_string()).map(|j| j.state_at(Utc::now())))
    }

    fn remove(&self, job: &JobRecord) -> Result<bool, QueueError> {
        let mut jobs = self.write()?;
        let id = job.key.to_string();
        match jobs.get(&id) {
            Some(stored) if stored.state == LifecycleState::Active => Ok(false),
            Some(_) => {
                jobs.remove(&id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn counts(&self) -> Result<JobCounts, QueueError> {
        let jobs = self.read()?;
        let now = Utc::now();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.state_at(now) {
                LifecycleState::Waiting => counts.waiting += 1,
                LifecycleState::Delayed => counts.delayed += 1,
                LifecycleState::Active => counts.active += 1,
                LifecycleState::Completed => counts.completed += 1,
                LifecycleState::Failed => counts.failed += 1,
                LifecycleState::Unknown(_) => {}
            }
        }
        Ok(counts)
    }
}

impl JobRuntime for InMemoryJobQueue {
    fn claim_next(&self) -> Result<Option<JobRecord>, QueueError> {
        let mut jobs = self.write()?;
        let now = Utc::now();

        // Oldest ready job first
        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.ready_at, j.created_at))
            .map(|j| j.key.to_string());

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_active();
                job.clone()
            })
        }))
    }

    fn complete(&self, key: &JobKey) -> Result<JobRecord, QueueError> {
        self.transition(key, JobRecord::mark_completed)
    }

    fn fail(&self, key: &JobKey, error: &str) -> Result<JobRecord, QueueError> {
        self.transition(key, |job| {
            job.mark_failed(error, Utc::now());
        })
    }

    fn promote(&self, key: &JobKey) -> Result<bool, QueueError> {
        let mut promoted = false;
        self.transition(key, |job| promoted = job.promote(Utc::now()))?;
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_core::{JobDomain, RetryPolicy};
    use std::time::Duration;

    fn key(logical: &str) -> JobKey {
        JobKey::new(JobDomain::WebCrawl, logical).unwrap()
    }

    #[test]
    fn add_is_unique_per_key() {
        let queue = InMemoryJobQueue::new();
        let options = JobOptions::default();

        queue.add(&key("src-1"), serde_json::json!({"n": 1}), &options).unwrap();
        let err = queue
            .add(&key("src-1"), serde_json::json!({"n": 2}), &options)
            .unwrap_err();

        assert_eq!(err, QueueError::AlreadyExists("web-crawl:src-1".to_string()));
        assert_eq!(queue.get(&key("src-1")).unwrap().unwrap().payload["n"], 1);
    }

    #[test]
    fn claim_complete_lifecycle() {
        let queue = InMemoryJobQueue::new();
        let job = queue
            .add(&key("src-1"), serde_json::json!({}), &JobOptions::default())
            .unwrap();
        assert_eq!(queue.lifecycle_state(&job).unwrap(), Some(LifecycleState::Waiting));

        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.state, LifecycleState::Active);
        assert_eq!(claimed.attempts_made, 1);
        assert!(queue.claim_next().unwrap().is_none());

        // Running jobs cannot be removed
        assert!(!queue.remove(&job).unwrap());

        queue.complete(&job.key).unwrap();
        assert_eq!(queue.lifecycle_state(&job).unwrap(), Some(LifecycleState::Completed));
        assert!(queue.remove(&job).unwrap());
        assert_eq!(queue.lifecycle_state(&job).unwrap(), None);
    }

    #[test]
    fn delayed_jobs_wait_until_promoted() {
        let queue = InMemoryJobQueue::new();
        let options = JobOptions::default().delayed(Duration::from_secs(60));
        let job = queue.add(&key("src-1"), serde_json::json!({}), &options).unwrap();

        assert_eq!(queue.lifecycle_state(&job).unwrap(), Some(LifecycleState::Delayed));
        assert!(queue.claim_next().unwrap().is_none());

        assert!(queue.promote(&job.key).unwrap());
        assert!(!queue.promote(&job.key).unwrap());
        assert_eq!(queue.claim_next().unwrap().unwrap().key, job.key);
    }

    #[test]
    fn failures_retry_then_fail_for_good() {
        let queue = InMemoryJobQueue::new();
        let options = JobOptions::new(RetryPolicy::exponential(2, Duration::from_secs(30)));
        let job = queue.add(&key("src-1"), serde_json::json!({}), &options).unwrap();

        queue.claim_next().unwrap().unwrap();
        let after_first = queue.fail(&job.key, "timeout").unwrap();
        assert_eq!(after_first.state, LifecycleState::Delayed);

        queue.promote(&job.key).unwrap();
        queue.claim_next().unwrap().unwrap();
        let after_second = queue.fail(&job.key, "timeout").unwrap();
        assert_eq!(after_second.state, LifecycleState::Failed);
        assert_eq!(after_second.attempts_made, 2);
    }

    #[test]
    fn counts_by_state() {
        let queue = InMemoryJobQueue::new();
        let delayed = JobOptions::default().delayed(Duration::from_secs(60));
        queue.add(&key("a"), serde_json::json!({}), &JobOptions::default()).unwrap();
        queue.add(&key("b"), serde_json::json!({}), &JobOptions::default()).unwrap();
        queue.add(&key("c"), serde_json::json!({}), &delayed).unwrap();
        queue.claim_next().unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.delayed, 1);
    }

    #[test]
    fn settled_successor_jobs_are_dropped() {
        let queue = InMemoryJobQueue::new();
        let primary = key("t1:conv-1");
        queue.add(&primary, serde_json::json!({}), &JobOptions::default()).unwrap();
        queue.claim_next().unwrap().unwrap();

        for millis in 0..100 {
            let successor = primary.with_disambiguator(millis.to_string()).unwrap();
            queue.add(&successor, serde_json::json!({}), &JobOptions::default()).unwrap();
        }
        while let Some(job) = queue.claim_next().unwrap() {
            queue.complete(&job.key).unwrap();
        }
        queue.complete(&primary).unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(queue.jobs_for("t1:conv-1").unwrap().len(), 1);
        assert_eq!(queue.get(&primary).unwrap().unwrap().state, LifecycleState::Completed);
    }

    #[test]
    fn permanently_failed_successor_is_dropped_but_retrying_one_is_kept() {
        let queue = InMemoryJobQueue::new();
        let successor = key("t1:conv-1").with_disambiguator("5000").unwrap();
        let options = JobOptions::new(RetryPolicy::exponential(2, Duration::from_secs(30)));
        queue.add(&successor, serde_json::json!({}), &options).unwrap();

        queue.claim_next().unwrap().unwrap();
        assert_eq!(queue.fail(&successor, "boom").unwrap().state, LifecycleState::Delayed);
        assert!(queue.get(&successor).unwrap().is_some());

        queue.promote(&successor).unwrap();
        queue.claim_next().unwrap().unwrap();
        assert_eq!(queue.fail(&successor, "boom").unwrap().state, LifecycleState::Failed);
        assert!(queue.get(&successor).unwrap().is_none());
    }
}
