//! Environment-driven configuration.
//!
//! | variable | default |
//! |---|---|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `COORDINATION_KEY_PREFIX` | `relaydesk` |
//! | `COORDINATION_CONNECT_TIMEOUT_MS` | `2000` |
//! | `COORDINATION_IO_TIMEOUT_MS` | `1000` |
//! | `WORKFLOW_STATE_TTL_SECS` | `86400` |
//! | `QUEUE_BACKLOG_TTL_SECS` | `86400` |
//! | `QUEUE_WAKE_TTL_SECS` | `30` |
//! | `WORKER_LOCK_TTL_SECS` | `30` |
//! | `EXECUTOR_POLL_INTERVAL_MS` | `100` |
//!
//! Unparseable values fall back to the default with a warning.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use relaydesk_coordination::TriggerSettings;
use relaydesk_core::JobDomain;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationConfig {
    pub use_persistent_stores: bool,
    pub redis_url: String,
    pub key_prefix: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub workflow_state_ttl: Duration,
    pub backlog_ttl: Duration,
    pub wake_ttl: Duration,
    pub lock_ttl: Duration,
    pub poll_interval: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl CoordinationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str, default: u64| Duration::from_secs(parse_or(&lookup, name, default));
        let millis = |name: &str, default: u64| Duration::from_millis(parse_or(&lookup, name, default));

        Self {
            use_persistent_stores: parse_or(&lookup, "USE_PERSISTENT_STORES", false),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            key_prefix: lookup("COORDINATION_KEY_PREFIX").unwrap_or_else(|| "relaydesk".to_string()),
            connect_timeout: millis("COORDINATION_CONNECT_TIMEOUT_MS", 2_000),
            io_timeout: millis("COORDINATION_IO_TIMEOUT_MS", 1_000),
            workflow_state_ttl: secs("WORKFLOW_STATE_TTL_SECS", 86_400),
            backlog_ttl: secs("QUEUE_BACKLOG_TTL_SECS", 86_400),
            wake_ttl: secs("QUEUE_WAKE_TTL_SECS", 30),
            lock_ttl: secs("WORKER_LOCK_TTL_SECS", 30),
            poll_interval: millis("EXECUTOR_POLL_INTERVAL_MS", 100),
        }
    }

    /// Default settings for a domain with this config's TTLs applied.
    pub fn trigger_settings(&self, domain: JobDomain) -> TriggerSettings {
        let settings = match domain {
            JobDomain::AiAgentReply => TriggerSettings::ai_agent_reply(),
            JobDomain::AiTraining => TriggerSettings::ai_training(),
            JobDomain::MessageNotification => TriggerSettings::message_notification(),
            JobDomain::WebCrawl => TriggerSettings::web_crawl(),
        };
        settings.with_ttls(self.workflow_state_ttl, self.backlog_ttl, self.wake_ttl)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "invalid config value, using default");
            default
        }),
    }
}
