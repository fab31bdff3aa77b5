mod intake;

use std::io::BufRead;

use anyhow::Context;
use tracing::{info, warn};

use relaydesk_coordination::triggers::{CrawlPayload, TrainingPayload};
use relaydesk_core::{JobDomain, JobRecord};
use relaydesk_infra::jobs::{batch_handler, JobExecutor, JobExecutorConfig, JobResult};
use relaydesk_infra::{CoordinationConfig, CoordinationServices};

use intake::IntakeEvent;

fn main() -> anyhow::Result<()> {
    relaydesk_observability::init();

    let config = CoordinationConfig::from_env();
    let services = CoordinationServices::build(&config).context("failed to build coordination services")?;

    let mut executor = JobExecutor::new(services.jobs.clone());
    for domain in [JobDomain::AiAgentReply, JobDomain::MessageNotification] {
        executor.register_handler(
            domain,
            batch_handler(services.batch_runner(domain), move |batch| {
                info!(
                    %domain,
                    conversation = %batch.payload.conversation_key(),
                    direction = %batch.payload.direction,
                    run_id = %batch.payload.run_id,
                    anchor = %batch.anchor.id,
                    messages = batch.entries.len(),
                    "delivering batch"
                );
                Ok(())
            }),
        );
    }
    executor.register_handler(JobDomain::AiTraining, |job| {
        log_payload::<TrainingPayload>(job, |p| {
            info!(tenant_id = %p.tenant_id, agent_id = %p.agent_id, run_id = %p.run_id, "training agent")
        })
    });
    executor.register_handler(JobDomain::WebCrawl, |job| {
        log_payload::<CrawlPayload>(job, |p| {
            info!(tenant_id = %p.tenant_id, source_id = %p.source_id, url = %p.url, run_id = %p.run_id, "crawling source")
        })
    });

    let handle = executor
        .spawn(
            JobExecutorConfig::default()
                .with_name("relaydesk-worker")
                .with_poll_interval(config.poll_interval),
        )
        .context("failed to spawn job executor")?;

    info!(
        persistent = config.use_persistent_stores,
        "worker running, reading events from stdin until it closes"
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin read failed, stopping intake");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match IntakeEvent::parse(&line).and_then(|event| intake::dispatch(&services, &event)) {
            Ok(receipts) => {
                for receipt in receipts {
                    info!(
                        job_key = %receipt.job_key,
                        outcome = %receipt.outcome,
                        run_id = ?receipt.run_id.as_ref().map(|r| r.as_str()),
                        "event accepted"
                    );
                }
            }
            Err(e) => warn!(error = %e, "event rejected"),
        }
    }

    let stats = handle.stats();
    handle.shutdown();
    info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        retried = stats.jobs_retried,
        failed = stats.jobs_failed,
        "worker stopped"
    );
    Ok(())
}

fn log_payload<T>(job: &JobRecord, log: impl Fn(&T)) -> JobResult
where
    T: serde::de::DeserializeOwned,
{
    match job.payload_as::<T>() {
        Ok(payload) => {
            log(&payload);
            JobResult::Success
        }
        Err(e) => JobResult::Failure(format!("invalid payload: {e}")),
    }
}
