//! Key naming for coordination entries.
//!
//! Job keys render themselves (`{domain}:{logical}[:{disambiguator}]`). Coordination
//! entries for the same logical unit of work live next to them:
//!
//! - `{domain}:queue:{logical}`: backlog of pending trigger IDs
//! - `{domain}:wake:{logical}`: wake flag
//! - `{domain}:lock:{logical}`: worker lock
//! - `{domain}:workflow:{logical}:{direction}`: workflow state

use relaydesk_core::{Direction, JobDomain, TenantId};

pub fn queue_key(domain: JobDomain, logical: &str) -> String {
    format!("{domain}:queue:{logical}")
}

pub fn wake_key(domain: JobDomain, logical: &str) -> String {
    format!("{domain}:wake:{logical}")
}

pub fn lock_key(domain: JobDomain, logical: &str) -> String {
    format!("{domain}:lock:{logical}")
}

pub fn workflow_key(domain: JobDomain, logical: &str, direction: Direction) -> String {
    format!("{domain}:workflow:{logical}:{direction}")
}

/// Logical key for a tenant-owned entity: `{tenant}:{entity}`.
pub fn tenant_scoped(tenant_id: TenantId, entity: &str) -> String {
    format!("{tenant_id}:{entity}")
}
