//! Deduplication policies and the decision table behind every enqueue.
//!
//! The table is pure: it maps the lifecycle state currently stored under a job key
//! onto what the caller should do with a new trigger. Applying the decision against a
//! queue runtime (remove/add, re-reading on contention) is the coordination layer's job.
//!
//! | existing state     | `Debounced`                | `SingleActive`             | `Unique`           |
//! |--------------------|----------------------------|----------------------------|--------------------|
//! | absent             | create                     | create                     | create             |
//! | completed / failed | replace                    | replace                    | replace            |
//! | waiting / delayed  | skip (debouncing, payload) | replace                    | skip (debouncing)  |
//! | active             | create disambiguated       | skip (active, payload)     | skip (active)      |
//! | unrecognised       | skip (unexpected, payload) | skip (unexpected, payload) | skip (unexpected)  |

use serde::{Deserialize, Serialize};

use crate::job::LifecycleState;

/// How a job domain treats a new trigger when a job already exists under its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Coalesce into the pending job; the worker re-reads shared state before acting.
    Debounced,
    /// Replace pending jobs; never start a second run while one is active.
    SingleActive,
    /// Debounce by presence only; no payload information flows back to the caller.
    Unique,
}

/// Why a trigger did not produce a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A pending job already covers this trigger.
    Debouncing,
    /// A run is in flight and the policy refuses to start another.
    Active,
    /// The runtime reported a state this layer does not recognise.
    Unexpected,
}

impl core::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            SkipReason::Debouncing => "debouncing",
            SkipReason::Active => "active",
            SkipReason::Unexpected => "unexpected",
        })
    }
}

/// What to do with a trigger, before touching the queue runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing is stored under the key; add the new job.
    Create,
    /// Remove the stored job, then add the new one.
    Replace,
    /// Leave the active job alone and add the new one under a disambiguated key.
    CreateDisambiguated,
    Skip(SkipReason),
}

impl DedupPolicy {
    /// Look up the decision for the state stored under the target key.
    pub fn decide(self, existing: Option<&LifecycleState>) -> Decision {
        let Some(state) = existing else {
            return Decision::Create;
        };

        match (self, state) {
            (_, LifecycleState::Completed | LifecycleState::Failed) => Decision::Replace,

            (DedupPolicy::Debounced, LifecycleState::Waiting | LifecycleState::Delayed) => {
                Decision::Skip(SkipReason::Debouncing)
            }
            (DedupPolicy::SingleActive, LifecycleState::Waiting | LifecycleState::Delayed) => {
                Decision::Replace
            }
            (DedupPolicy::Unique, LifecycleState::Waiting | LifecycleState::Delayed) => {
                Decision::Skip(SkipReason::Debouncing)
            }

            (DedupPolicy::Debounced, LifecycleState::Active) => Decision::CreateDisambiguated,
            (DedupPolicy::SingleActive | DedupPolicy::Unique, LifecycleState::Active) => {
                Decision::Skip(SkipReason::Active)
            }

            (_, LifecycleState::Unknown(_)) => Decision::Skip(SkipReason::Unexpected),
        }
    }

    /// Whether skips under this policy hand the existing job's payload back to the caller.
    pub fn returns_existing_payload(self) -> bool {
        !matches!(self, DedupPolicy::Unique)
    }
}
