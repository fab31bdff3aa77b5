use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use relaydesk_core::{DedupPolicy, JobDomain, JobKey, RunId, TenantId};

use crate::engine::{EnqueueRequest, JobDecisionEngine};
use crate::error::CoordinationError;
use crate::keys;
use crate::queue::JobQueue;

use super::{existing_run_id, TriggerReceipt, TriggerSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub tenant_id: TenantId,
    pub source_id: String,
    pub url: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPayload {
    pub tenant_id: TenantId,
    pub source_id: String,
    pub url: String,
    pub run_id: RunId,
}

/// Schedules a crawl of a knowledge source.
///
/// Single-active: a pending crawl is replaced by the newest request, a running crawl is
/// left alone and the request is dropped. Callers retry once the running crawl ends.
#[derive(Debug, Clone)]
pub struct WebCrawlTrigger<Q> {
    engine: JobDecisionEngine<Q>,
    settings: TriggerSettings,
}

impl<Q> WebCrawlTrigger<Q>
where
    Q: JobQueue,
{
    pub fn new(queue: Q, settings: TriggerSettings) -> Self {
        Self {
            engine: JobDecisionEngine::new(queue),
            settings,
        }
    }

    /// `web-crawl:{tenant}:{source}`
    pub fn job_key(request: &CrawlRequest) -> Result<JobKey, CoordinationError> {
        Ok(JobKey::new(
            JobDomain::WebCrawl,
            keys::tenant_scoped(request.tenant_id, &request.source_id),
        )?)
    }

    #[instrument(skip(self, request), fields(source_id = %request.source_id))]
    pub fn trigger(&self, request: &CrawlRequest) -> Result<TriggerReceipt, CoordinationError> {
        let key = Self::job_key(request)?;
        let run_id = RunId::derive(&key, request.requested_at);
        let payload = CrawlPayload {
            tenant_id: request.tenant_id,
            source_id: request.source_id.clone(),
            url: request.url.clone(),
            run_id: run_id.clone(),
        };

        let outcome = self.engine.decide(
            DedupPolicy::SingleActive,
            &EnqueueRequest {
                key: key.clone(),
                payload: serde_json::to_value(&payload)?,
                options: self.settings.job_options(),
                disambiguator: request.requested_at.timestamp_millis().to_string(),
            },
        )?;
        info!(job_key = %key, outcome = %outcome.kind(), "crawl trigger processed");

        let run_id = if outcome.is_created() {
            Some(run_id)
        } else {
            existing_run_id(&outcome)
        };
        Ok(TriggerReceipt {
            job_key: key,
            outcome: outcome.kind(),
            run_id,
        })
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutcomeKind;
    use crate::queue::{InMemoryJobQueue, JobQueue, JobRuntime};
    use relaydesk_core::SkipReason;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(tenant: TenantId, url: &str, secs: i64) -> CrawlRequest {
        CrawlRequest {
            tenant_id: tenant,
            source_id: "src-1".to_string(),
            url: url.to_string(),
            requested_at: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn defaults_run_immediately() {
        let settings = TriggerSettings::web_crawl();
        assert_eq!(settings.delay, Duration::ZERO);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay, Duration::from_secs(60));
    }

    #[test]
    fn pending_crawl_is_replaced_by_newest_request() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let trigger = WebCrawlTrigger::new(queue.clone(), TriggerSettings::web_crawl());
        let tenant = TenantId::new();

        trigger.trigger(&request(tenant, "https://a.example", 0)).unwrap();
        let second = trigger.trigger(&request(tenant, "https://b.example", 1)).unwrap();
        assert_eq!(second.outcome, OutcomeKind::Replaced);

        let job = queue.get(&second.job_key).unwrap().unwrap();
        let payload: CrawlPayload = job.payload_as().unwrap();
        assert_eq!(payload.url, "https://b.example");
    }

    #[test]
    fn running_crawl_reports_its_run() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let trigger = WebCrawlTrigger::new(queue.clone(), TriggerSettings::web_crawl());
        let tenant = TenantId::new();

        let first = trigger.trigger(&request(tenant, "https://a.example", 0)).unwrap();
        queue.claim_next().unwrap().unwrap();

        let second = trigger.trigger(&request(tenant, "https://a.example", 1)).unwrap();
        assert_eq!(second.outcome, OutcomeKind::Skipped(SkipReason::Active));
        assert_eq!(second.run_id, first.run_id);
    }
}
