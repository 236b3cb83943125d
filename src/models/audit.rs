use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor recorded for transitions the engine makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Well-known audit action tags.
pub mod actions {
    pub const INGESTED: &str = "ingested";
    pub const FETCH_OK: &str = "fetch:ok";
    pub const FETCH_RETRY: &str = "fetch:retry";
    pub const FETCH_FAILED: &str = "fetch:failed";
    pub const FETCH_DEADLINE: &str = "fetch:deadline";
    pub const ERROR: &str = "error";
}

pub type Details = serde_json::Map<String, serde_json::Value>;

/// An immutable record of one event in a job's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub actor_id: String,
    pub action: String,
    pub details: Details,
    pub timestamp: DateTime<Utc>,
}

/// An audit entry before the store assigns id and timestamp.
///
/// `job_id` is filled in by the store when entries accompany a `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub job_id: Option<Uuid>,
    pub actor_id: String,
    pub action: String,
    pub details: Details,
}

impl NewAuditEntry {
    pub fn new(actor_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            job_id: None,
            actor_id: actor_id.into(),
            action: action.into(),
            details: Details::new(),
        }
    }

    pub fn system(action: impl Into<String>) -> Self {
        Self::new(SYSTEM_ACTOR, action)
    }

    pub fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn into_entry(self, id: i64, job_id: Uuid, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            job_id,
            actor_id: self.actor_id,
            action: self.action,
            details: self.details,
            timestamp,
        }
    }
}

/// Externally visible projection of an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditView {
    pub id: i64,
    pub job_id: Uuid,
    pub actor_id: String,
    pub action: String,
    pub details: Details,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditEntry> for AuditView {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id,
            job_id: entry.job_id,
            actor_id: entry.actor_id,
            action: entry.action,
            details: entry.details,
            timestamp: entry.timestamp,
        }
    }
}
