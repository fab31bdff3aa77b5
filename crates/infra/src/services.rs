//! Service wiring: one coordination store, one job runtime, the four triggers.

use std::sync::Arc;

use tracing::info;

use relaydesk_coordination::{
    AiAgentReplyTrigger, AiTrainingTrigger, BatchRunner, CoordinationStore, InMemoryCoordinationStore,
    InMemoryJobQueue, MessageNotificationTrigger, StoreError, WebCrawlTrigger,
};
use relaydesk_core::JobDomain;

use crate::config::CoordinationConfig;

#[cfg(feature = "redis")]
use crate::store::{RedisCoordinationStore, RedisStoreOptions};

/// Type-erased coordination store shared by every component.
pub type SharedStore = Arc<dyn CoordinationStore>;
pub type SharedJobs = Arc<InMemoryJobQueue>;

#[derive(Clone)]
pub struct CoordinationServices {
    pub config: CoordinationConfig,
    pub store: SharedStore,
    pub jobs: SharedJobs,
    pub ai_reply: AiAgentReplyTrigger<SharedStore, SharedJobs>,
    pub notifications: MessageNotificationTrigger<SharedStore, SharedJobs>,
    pub training: AiTrainingTrigger<SharedJobs>,
    pub crawl: WebCrawlTrigger<SharedJobs>,
}

impl CoordinationServices {
    /// Wire services from config.
    ///
    /// With `USE_PERSISTENT_STORES=true` the coordination store is Redis; without the
    /// `redis` feature that request falls back to the in-memory store with a warning.
    pub fn build(config: &CoordinationConfig) -> Result<Self, StoreError> {
        let store = build_store(config)?;
        Ok(Self::with_store(config, store, Arc::new(InMemoryJobQueue::new())))
    }

    /// Wire services around an existing store and job runtime.
    pub fn with_store(config: &CoordinationConfig, store: SharedStore, jobs: SharedJobs) -> Self {
        Self {
            ai_reply: AiAgentReplyTrigger::new(
                store.clone(),
                jobs.clone(),
                config.trigger_settings(JobDomain::AiAgentReply),
            ),
            notifications: MessageNotificationTrigger::new(
                store.clone(),
                jobs.clone(),
                config.trigger_settings(JobDomain::MessageNotification),
            ),
            training: AiTrainingTrigger::new(jobs.clone(), config.trigger_settings(JobDomain::AiTraining)),
            crawl: WebCrawlTrigger::new(jobs.clone(), config.trigger_settings(JobDomain::WebCrawl)),
            config: config.clone(),
            store,
            jobs,
        }
    }

    /// Worker-side guard for a batching domain.
    pub fn batch_runner(&self, domain: JobDomain) -> BatchRunner<SharedStore> {
        BatchRunner::new(
            self.store.clone(),
            domain,
            &self.config.trigger_settings(domain),
            self.config.lock_ttl,
        )
    }
}

fn build_store(config: &CoordinationConfig) -> Result<SharedStore, StoreError> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            let store = RedisCoordinationStore::new(
                &config.redis_url,
                RedisStoreOptions {
                    key_prefix: config.key_prefix.clone(),
                    connect_timeout: config.connect_timeout,
                    io_timeout: config.io_timeout,
                },
            )?;
            store.ping()?;
            info!(prefix = %config.key_prefix, "using redis coordination store");
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!("USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory");
        }
    }

    info!("using in-memory coordination store");
    Ok(Arc::new(InMemoryCoordinationStore::new()))
}
