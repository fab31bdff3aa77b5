//! Line-delimited JSON intake.
//!
//! Each line is one event, tagged by `kind`:
//!
//! ```text
//! {"kind":"message","tenant_id":"...","conversation_id":"c1","message_id":"m1","direction":"inbound","sent_at":"2024-01-01T00:00:00Z"}
//! {"kind":"training","tenant_id":"...","agent_id":"a1","requested_at":"2024-01-01T00:00:00Z"}
//! {"kind":"crawl","tenant_id":"...","source_id":"s1","url":"https://docs.example","requested_at":"2024-01-01T00:00:00Z"}
//! ```
//!
//! A message feeds both the AI reply and the notification triggers.

use serde::Deserialize;
use thiserror::Error;

use relaydesk_coordination::triggers::{CrawlRequest, TrainingRequest};
use relaydesk_coordination::{CoordinationError, MessageEvent, TriggerReceipt};
use relaydesk_infra::CoordinationServices;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntakeEvent {
    Message(MessageEvent),
    Training(TrainingRequest),
    Crawl(CrawlRequest),
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid event: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Trigger(#[from] CoordinationError),
}

impl IntakeEvent {
    pub fn parse(line: &str) -> Result<Self, IntakeError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Route one event to its triggers.
pub fn dispatch(services: &CoordinationServices, event: &IntakeEvent) -> Result<Vec<TriggerReceipt>, IntakeError> {
    let receipts = match event {
        IntakeEvent::Message(message) => vec![
            services.ai_reply.trigger(message)?,
            services.notifications.trigger(message)?,
        ],
        IntakeEvent::Training(request) => vec![services.training.trigger(request)?],
        IntakeEvent::Crawl(request) => vec![services.crawl.trigger(request)?],
    };
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_coordination::{JobQueue, OutcomeKind};
    use relaydesk_core::{Direction, SkipReason, TenantId};
    use relaydesk_infra::CoordinationConfig;

    fn services() -> CoordinationServices {
        CoordinationServices::build(&CoordinationConfig::default()).unwrap()
    }

    fn message_line(tenant: TenantId, id: &str, sent_at: &str) -> String {
        format!(
            r#"{{"kind":"message","tenant_id":"{tenant}","conversation_id":"conv-1","message_id":"{id}","direction":"inbound","sent_at":"{sent_at}"}}"#
        )
    }

    #[test]
    fn message_lines_schedule_reply_and_notification() {
        let services = services();
        let tenant = TenantId::new();

        let event = IntakeEvent::parse(&message_line(tenant, "m1", "2024-01-01T00:00:00Z")).unwrap();
        let IntakeEvent::Message(message) = &event else {
            panic!("expected a message event, got {event:?}");
        };
        assert_eq!(message.direction, Direction::Inbound);

        let receipts = dispatch(&services, &event).unwrap();
        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().all(|r| r.outcome == OutcomeKind::Created));
        assert_eq!(receipts[0].job_key.to_string(), format!("ai-agent-reply:{tenant}:conv-1"));
        assert_eq!(
            receipts[1].job_key.to_string(),
            format!("message-notification:{tenant}:conv-1:inbound")
        );

        let again = IntakeEvent::parse(&message_line(tenant, "m2", "2024-01-01T00:00:01Z")).unwrap();
        let receipts = dispatch(&services, &again).unwrap();
        assert!(receipts
            .iter()
            .all(|r| r.outcome == OutcomeKind::Skipped(SkipReason::Debouncing)));
        assert_eq!(services.jobs.counts().unwrap().delayed, 2);
    }

    #[test]
    fn training_and_crawl_lines_reach_their_triggers() {
        let services = services();
        let tenant = TenantId::new();

        let training = IntakeEvent::parse(&format!(
            r#"{{"kind":"training","tenant_id":"{tenant}","agent_id":"agent-1","requested_at":"2024-01-01T00:00:00Z"}}"#
        ))
        .unwrap();
        let crawl = IntakeEvent::parse(&format!(
            r#"{{"kind":"crawl","tenant_id":"{tenant}","source_id":"src-1","url":"https://docs.example","requested_at":"2024-01-01T00:00:00Z"}}"#
        ))
        .unwrap();

        assert_eq!(dispatch(&services, &training).unwrap()[0].outcome, OutcomeKind::Created);
        assert_eq!(dispatch(&services, &crawl).unwrap()[0].outcome, OutcomeKind::Created);
        let counts = services.jobs.counts().unwrap();
        assert_eq!(counts.waiting + counts.delayed, 2);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(IntakeEvent::parse("not json"), Err(IntakeError::Parse(_))));
        assert!(matches!(
            IntakeEvent::parse(r#"{"kind":"fax","to":"nobody"}"#),
            Err(IntakeError::Parse(_))
        ));
    }
}
