//! Worker-side job execution.
//!
//! - `JobExecutor`: polls a `JobRuntime`, routes jobs to per-domain handlers and reports
//!   success or failure back so the runtime applies the retry policy
//! - `batch_handler`: adapts a `BatchRunner` into an executor handler for the batching
//!   domains

pub mod executor;
pub mod handlers;

pub use executor::{
    ExecutorError, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler, JobResult,
};
pub use handlers::batch_handler;
