//! Workflow state: which run is authoritative for a batch, and where the batch starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobKey;

/// Direction of the conversation traffic a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Contact → workspace (e.g. a visitor writing in)
    Inbound,
    /// Workspace → contact (e.g. an agent or AI reply)
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque run token. Compared for equality only; no ordering is implied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `{jobKey}@{millis}`: distinct per trigger instant, stable across redelivery.
    pub fn derive(key: &JobKey, at: DateTime<Utc>) -> Self {
        Self(format!("{key}@{}", at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// First event of the current undelivered batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub at: DateTime<Utc>,
}

impl Anchor {
    pub fn new(id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { id: id.into(), at }
    }

    /// The earlier of two anchors; ties keep `self`.
    pub fn earliest(self, other: Anchor) -> Anchor {
        if other.at < self.at { other } else { self }
    }
}

/// Authoritative run and batch anchor for one (key, direction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub anchor: Anchor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// State for the first trigger of a batch.
    pub fn start(run_id: RunId, anchor: Anchor, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            anchor,
            created_at: now,
            updated_at: now,
        }
    }

    /// Install a new authoritative run, keeping the earliest anchor.
    pub fn supersede(&mut self, run_id: RunId, anchor: Anchor, now: DateTime<Utc>) {
        self.run_id = run_id;
        self.anchor = self.anchor.clone().earliest(anchor);
        self.updated_at = now;
    }

    /// Fold another trigger into the current batch without touching the run.
    pub fn absorb(&mut self, anchor: Anchor, now: DateTime<Utc>) {
        self.anchor = self.anchor.clone().earliest(anchor);
        self.updated_at = now;
    }

    pub fn is_run(&self, run_id: &RunId) -> bool {
        &self.run_id == run_id
    }
}
