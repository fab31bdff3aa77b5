use tracing::info;

use relaydesk_coordination::{Batch, BatchRunner, CoordinationError, CoordinationStore, RunOutcome};
use relaydesk_core::JobRecord;

use super::executor::JobResult;

/// Wrap a batch runner and a delivery function into an executor handler.
///
/// A superseded run completes without side effects. A busy lock is reported as a
/// failure so the runtime retries the job after backoff, once the other worker is done.
pub fn batch_handler<S, F>(runner: BatchRunner<S>, deliver: F) -> impl Fn(&JobRecord) -> JobResult + Send + Sync
where
    S: CoordinationStore + Clone,
    F: Fn(&Batch<'_>) -> Result<(), String> + Send + Sync,
{
    move |job| {
        let outcome = runner.run(job, |batch| deliver(batch).map_err(CoordinationError::Handler));
        match outcome {
            Ok(RunOutcome::Delivered { processed }) => {
                info!(job_key = %job.key, processed, "batch job delivered");
                JobResult::Success
            }
            Ok(RunOutcome::Superseded) => JobResult::Success,
            Ok(RunOutcome::LockBusy) => JobResult::Failure("backlog lock busy".to_string()),
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}
