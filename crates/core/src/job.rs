//! Job identity, lifecycle and options.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::retry::RetryPolicy;

/// Job domain, used as the first segment of every job and coordination key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobDomain {
    /// AI agent replying to a conversation
    AiAgentReply,
    /// AI agent (re)training
    AiTraining,
    /// Batched new-message notification emails
    MessageNotification,
    /// Website crawling for a knowledge source
    WebCrawl,
}

impl JobDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobDomain::AiAgentReply => "ai-agent-reply",
            JobDomain::AiTraining => "ai-training",
            JobDomain::MessageNotification => "message-notification",
            JobDomain::WebCrawl => "web-crawl",
        }
    }
}

impl core::fmt::Display for JobDomain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic job key: `{domain}:{logical}[:{disambiguator}]`.
///
/// The key is the queue runtime's own uniqueness key, which is what guarantees at most
/// one job record per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    domain: JobDomain,
    logical: String,
    disambiguator: Option<String>,
}

fn validate_segment(what: &str, value: &str) -> DomainResult<()> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{what} must not be empty")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "{what} must not contain whitespace: {value:?}"
        )));
    }
    Ok(())
}

impl JobKey {
    pub fn new(domain: JobDomain, logical: impl Into<String>) -> DomainResult<Self> {
        let logical = logical.into();
        validate_segment("logical key", &logical)?;
        Ok(Self {
            domain,
            logical,
            disambiguator: None,
        })
    }

    /// Derive a sibling key for the same logical unit of work.
    pub fn with_disambiguator(&self, disambiguator: impl Into<String>) -> DomainResult<Self> {
        let disambiguator = disambiguator.into();
        validate_segment("disambiguator", &disambiguator)?;
        if disambiguator.contains(':') {
            return Err(DomainError::validation(format!(
                "disambiguator must not contain ':': {disambiguator:?}"
            )));
        }
        Ok(Self {
            domain: self.domain,
            logical: self.logical.clone(),
            disambiguator: Some(disambiguator),
        })
    }

    pub fn domain(&self) -> JobDomain {
        self.domain
    }

    pub fn logical(&self) -> &str {
        &self.logical
    }

    pub fn disambiguator(&self) -> Option<&str> {
        self.disambiguator.as_deref()
    }

    /// The key without its disambiguator.
    pub fn primary(&self) -> JobKey {
        Self {
            domain: self.domain,
            logical: self.logical.clone(),
            disambiguator: None,
        }
    }
}

impl core::fmt::Display for JobKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.domain, self.logical)?;
        if let Some(d) = &self.disambiguator {
            write!(f, ":{d}")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a job as reported by the queue runtime.
///
/// Absence is modelled as `Option::None` by callers, never as a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    /// Anything the runtime reports that this layer does not recognise.
    Unknown(String),
}

impl LifecycleState {
    /// Map a runtime's textual state onto the lifecycle.
    pub fn from_runtime(state: &str) -> Self {
        match state {
            "waiting" | "wait" => LifecycleState::Waiting,
            "delayed" => LifecycleState::Delayed,
            "active" => LifecycleState::Active,
            "completed" => LifecycleState::Completed,
            "failed" => LifecycleState::Failed,
            other => LifecycleState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::Waiting => "waiting",
            LifecycleState::Delayed => "delayed",
            LifecycleState::Active => "active",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
            LifecycleState::Unknown(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }
}

impl core::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options passed to the queue runtime when a job is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Start delay before the job becomes runnable
    pub delay: Duration,
    /// Retry policy applied by the runtime on failure
    pub retry: RetryPolicy,
}

impl JobOptions {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            delay: Duration::ZERO,
            retry,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// A deferred job as held by the queue runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub payload: JsonValue,
    pub state: LifecycleState,
    pub options: JobOptions,
    /// Executions started so far
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the job may run
    pub ready_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

fn offset(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl JobRecord {
    pub fn new(key: JobKey, payload: JsonValue, options: JobOptions, now: DateTime<Utc>) -> Self {
        let ready_at = offset(now, options.delay);
        let state = if options.delay.is_zero() {
            LifecycleState::Waiting
        } else {
            LifecycleState::Delayed
        };
        Self {
            key,
            payload,
            state,
            options,
            attempts_made: 0,
            created_at: now,
            ready_at,
            last_error: None,
        }
    }

    /// Lifecycle state at `now`; a delayed job whose delay elapsed reads as waiting.
    pub fn state_at(&self, now: DateTime<Utc>) -> LifecycleState {
        match self.state {
            LifecycleState::Delayed if now >= self.ready_at => LifecycleState::Waiting,
            ref other => other.clone(),
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == LifecycleState::Waiting
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn mark_active(&mut self) {
        self.state = LifecycleState::Active;
        self.attempts_made += 1;
    }

    pub fn mark_completed(&mut self) {
        self.state = LifecycleState::Completed;
        self.last_error = None;
    }

    /// Record a failed execution. Returns `true` when the job was rescheduled.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        self.last_error = Some(error.into());
        if self.options.retry.should_retry(self.attempts_made) {
            let delay = self.options.retry.delay_for_attempt(self.attempts_made);
            self.ready_at = offset(now, delay);
            self.state = LifecycleState::Delayed;
            true
        } else {
            self.state = LifecycleState::Failed;
            false
        }
    }

    /// Make a delayed job runnable immediately.
    pub fn promote(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != LifecycleState::Delayed {
            return false;
        }
        self.ready_at = now;
        self.state = LifecycleState::Waiting;
        true
    }
}
