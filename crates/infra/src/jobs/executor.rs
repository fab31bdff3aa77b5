//! Job executor: polls a job runtime and routes jobs to per-domain handlers.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use relaydesk_coordination::{JobRuntime, QueueError};
use relaydesk_core::{JobDomain, JobRecord, LifecycleState};

/// Result of running a job handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// The runtime retries per the job's policy, or fails it for good.
    Failure(String),
}

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&JobRecord) -> JobResult + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no handler registered for {0}")]
    NoHandler(JobDomain),

    #[error("job {key} failed: {error}")]
    Failed { key: String, error: String, will_retry: bool },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll when no job is ready
    pub poll_interval: Duration,
    /// Thread name and log field
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Failed executions that will be retried
    pub jobs_retried: u64,
    /// Jobs that exhausted their retry policy
    pub jobs_failed: u64,
    pub uptime_secs: u64,
}

/// Background job executor.
///
/// Claims ready jobs from a [`JobRuntime`], runs the handler registered for the job's
/// domain, and reports the result back so the runtime can complete, retry or fail it.
pub struct JobExecutor<Q: JobRuntime> {
    runtime: Q,
    handlers: HashMap<JobDomain, JobHandler>,
}

impl<Q: JobRuntime + 'static> JobExecutor<Q> {
    pub fn new(runtime: Q) -> Self {
        Self {
            runtime,
            handlers: HashMap::new(),
        }
    }

    pub fn register_handler<F>(&mut self, domain: JobDomain, handler: F)
    where
        F: Fn(&JobRecord) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(domain, Box::new(handler));
    }

    /// Spawn the executor loop on its own thread.
    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle>
    where
        Q: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Claim and run the next ready job. `Ok(None)` when nothing is ready.
    pub fn run_next(&self) -> Result<Option<JobRecord>, ExecutorError> {
        match self.runtime.claim_next()? {
            Some(job) => self.execute(&job).map(Some),
            None => Ok(None),
        }
    }

    /// Run an already-claimed job and report the result to the runtime.
    pub fn execute(&self, job: &JobRecord) -> Result<JobRecord, ExecutorError> {
        let domain = job.key.domain();
        let Some(handler) = self.handlers.get(&domain) else {
            let error = format!("no handler registered for {domain}");
            warn!(job_key = %job.key, "no handler for job");
            self.runtime.fail(&job.key, &error)?;
            return Err(ExecutorError::NoHandler(domain));
        };

        match handler(job) {
            JobResult::Success => {
                let done = self.runtime.complete(&job.key)?;
                debug!(job_key = %job.key, attempts = done.attempts_made, "job completed");
                Ok(done)
            }
            JobResult::Failure(error) => {
                let updated = self.runtime.fail(&job.key, &error)?;
                let will_retry = updated.state != LifecycleState::Failed;
                if will_retry {
                    debug!(job_key = %job.key, attempt = updated.attempts_made, error = %error, "job will be retried");
                } else {
                    warn!(job_key = %job.key, attempts = updated.attempts_made, error = %error, "job failed permanently");
                }
                Err(ExecutorError::Failed {
                    key: job.key.to_string(),
                    error,
                    will_retry,
                })
            }
        }
    }
}

fn executor_loop<Q: JobRuntime + 'static>(
    executor: JobExecutor<Q>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let result = executor.run_next();

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
            match &result {
                Ok(Some(_)) => {
                    s.jobs_processed += 1;
                    s.jobs_succeeded += 1;
                }
                Err(ExecutorError::Failed { will_retry: true, .. }) => {
                    s.jobs_processed += 1;
                    s.jobs_retried += 1;
                }
                Err(ExecutorError::Failed { .. } | ExecutorError::NoHandler(_)) => {
                    s.jobs_processed += 1;
                    s.jobs_failed += 1;
                }
                Ok(None) | Err(ExecutorError::Queue(_)) => {}
            }
        }

        match result {
            Ok(Some(_)) => {}
            Ok(None) => thread::sleep(config.poll_interval),
            Err(ExecutorError::Queue(e)) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
            Err(e) => debug!(executor = %config.name, error = %e, "job execution failed"),
        }
    }

    info!(executor = %config.name, "job executor stopped");
}
