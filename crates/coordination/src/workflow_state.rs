//! Workflow state store: the authoritative run and batch anchor per (key, direction).
//!
//! State is stored as JSON under `{domain}:workflow:{logical}:{direction}` with a TTL.
//! Every update that depends on the current value is a compare-and-set loop against the
//! raw stored string, so concurrent triggers never lose each other's anchors.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use relaydesk_core::{Anchor, Direction, JobDomain, RunId, WorkflowState};

use crate::error::CoordinationError;
use crate::keys;
use crate::store::{CoordinationStore, StoreError};

/// Upper bound on compare-and-set rounds before giving up with `Contention`.
const MAX_CAS_ROUNDS: usize = 16;

#[derive(Debug, Clone)]
pub struct WorkflowStateStore<S> {
    store: S,
    domain: JobDomain,
    ttl: Duration,
}

impl<S> WorkflowStateStore<S>
where
    S: CoordinationStore,
{
    pub fn new(store: S, domain: JobDomain, ttl: Duration) -> Self {
        Self { store, domain, ttl }
    }

    pub fn domain(&self) -> JobDomain {
        self.domain
    }

    fn key(&self, logical: &str, direction: Direction) -> String {
        keys::workflow_key(self.domain, logical, direction)
    }

    fn decode(raw: &str) -> Result<WorkflowState, CoordinationError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()).into())
    }

    fn encode(state: &WorkflowState) -> Result<String, CoordinationError> {
        serde_json::to_string(state).map_err(|e| StoreError::Serialization(e.to_string()).into())
    }

    pub fn get_state(
        &self,
        logical: &str,
        direction: Direction,
    ) -> Result<Option<WorkflowState>, CoordinationError> {
        self.store
            .get(&self.key(logical, direction))?
            .map(|raw| Self::decode(&raw))
            .transpose()
    }

    /// Unconditional write. Prefer [`supersede`](Self::supersede) or
    /// [`absorb`](Self::absorb) whenever the new value depends on the old one.
    pub fn set_state(
        &self,
        logical: &str,
        direction: Direction,
        state: &WorkflowState,
    ) -> Result<(), CoordinationError> {
        self.store
            .set(&self.key(logical, direction), &Self::encode(state)?, self.ttl)?;
        Ok(())
    }

    pub fn clear_state(&self, logical: &str, direction: Direction) -> Result<bool, CoordinationError> {
        Ok(self.store.delete(&self.key(logical, direction))?)
    }

    /// Supersession check. `false` when state is missing or names another run.
    pub fn is_run_active(
        &self,
        logical: &str,
        direction: Direction,
        run_id: &RunId,
    ) -> Result<bool, CoordinationError> {
        Ok(self
            .get_state(logical, direction)?
            .is_some_and(|state| state.is_run(run_id)))
    }

    /// Make `run_id` authoritative, keeping the earliest anchor of the batch.
    pub fn supersede(
        &self,
        logical: &str,
        direction: Direction,
        run_id: RunId,
        anchor: Anchor,
    ) -> Result<WorkflowState, CoordinationError> {
        self.update(logical, direction, |current| {
            let now = Utc::now();
            match current {
                Some(mut state) => {
                    state.supersede(run_id.clone(), anchor.clone(), now);
                    state
                }
                None => WorkflowState::start(run_id.clone(), anchor.clone(), now),
            }
        })
    }

    /// Fold a debounced trigger into the batch of `run_id`, the run that will actually
    /// execute. An existing run is never replaced; only the anchor can move earlier.
    pub fn absorb(
        &self,
        logical: &str,
        direction: Direction,
        run_id: RunId,
        anchor: Anchor,
    ) -> Result<WorkflowState, CoordinationError> {
        self.update(logical, direction, |current| {
            let now = Utc::now();
            match current {
                Some(mut state) => {
                    state.absorb(anchor.clone(), now);
                    state
                }
                None => WorkflowState::start(run_id.clone(), anchor.clone(), now),
            }
        })
    }

    /// Delete the state only while `run_id` is still authoritative.
    pub fn clear_if_run(
        &self,
        logical: &str,
        direction: Direction,
        run_id: &RunId,
    ) -> Result<bool, CoordinationError> {
        let key = self.key(logical, direction);
        for _ in 0..MAX_CAS_ROUNDS {
            let Some(raw) = self.store.get(&key)? else {
                return Ok(false);
            };
            if !Self::decode(&raw)?.is_run(run_id) {
                return Ok(false);
            }
            if self.store.compare_and_delete(&key, &raw)? {
                debug!(workflow = %key, run_id = %run_id, "workflow state cleared");
                return Ok(true);
            }
        }
        Err(CoordinationError::Contention(key))
    }

    fn update<F>(&self, logical: &str, direction: Direction, f: F) -> Result<WorkflowState, CoordinationError>
    where
        F: Fn(Option<WorkflowState>) -> WorkflowState,
    {
        let key = self.key(logical, direction);
        for round in 0..MAX_CAS_ROUNDS {
            let raw = self.store.get(&key)?;
            let current = raw.as_deref().map(Self::decode).transpose()?;
            let next = f(current);
            if self
                .store
                .compare_and_set(&key, raw.as_deref(), &Self::encode(&next)?, self.ttl)?
            {
                return Ok(next);
            }
            debug!(workflow = %key, round, "workflow state changed concurrently, retrying");
        }
        warn!(workflow = %key, "workflow state update gave up under contention");
        Err(CoordinationError::Contention(key))
    }
}
