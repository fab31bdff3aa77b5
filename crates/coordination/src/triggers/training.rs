use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use relaydesk_core::{DedupPolicy, JobDomain, JobKey, RunId, TenantId};

use crate::engine::{EnqueueRequest, JobDecisionEngine};
use crate::error::CoordinationError;
use crate::keys;
use crate::queue::JobQueue;

use super::{TriggerReceipt, TriggerSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub tenant_id: TenantId,
    pub agent_id: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPayload {
    pub tenant_id: TenantId,
    pub agent_id: String,
    pub run_id: RunId,
    pub requested_at: DateTime<Utc>,
}

/// Schedules (re)training of an AI agent.
///
/// Unique: while a training job is pending or running, further requests are dropped.
/// The worker trains from the agent's current sources, so nothing is lost.
#[derive(Debug, Clone)]
pub struct AiTrainingTrigger<Q> {
    engine: JobDecisionEngine<Q>,
    settings: TriggerSettings,
}

impl<Q> AiTrainingTrigger<Q>
where
    Q: JobQueue,
{
    pub fn new(queue: Q, settings: TriggerSettings) -> Self {
        Self {
            engine: JobDecisionEngine::new(queue),
            settings,
        }
    }

    /// `ai-training:{tenant}:{agent}`
    pub fn job_key(request: &TrainingRequest) -> Result<JobKey, CoordinationError> {
        Ok(JobKey::new(
            JobDomain::AiTraining,
            keys::tenant_scoped(request.tenant_id, &request.agent_id),
        )?)
    }

    #[instrument(skip(self, request), fields(agent_id = %request.agent_id))]
    pub fn trigger(&self, request: &TrainingRequest) -> Result<TriggerReceipt, CoordinationError> {
        let key = Self::job_key(request)?;
        let run_id = RunId::derive(&key, request.requested_at);
        let payload = TrainingPayload {
            tenant_id: request.tenant_id,
            agent_id: request.agent_id.clone(),
            run_id: run_id.clone(),
            requested_at: request.requested_at,
        };

        let outcome = self.engine.decide(
            DedupPolicy::Unique,
            &EnqueueRequest {
                key: key.clone(),
                payload: serde_json::to_value(&payload)?,
                options: self.settings.job_options(),
                disambiguator: request.requested_at.timestamp_millis().to_string(),
            },
        )?;
        info!(job_key = %key, outcome = %outcome.kind(), "training trigger processed");

        Ok(TriggerReceipt {
            job_key: key,
            outcome: outcome.kind(),
            run_id: outcome.is_created().then_some(run_id),
        })
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }
}
