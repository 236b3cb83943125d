use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::operation::Operation;
use crate::services::storage::BlobRef;

/// Operation settings and source description recorded with a job.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of an image job.
///
/// `Queued → Processing → {Done, Error}`; `Queued` may also fail directly.
/// `Done` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Error)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

/// Where the original bytes of a job came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    UploadedFile,
    RemoteFetch,
}

/// A persisted image processing job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,
    pub source_kind: SourceKind,
    /// Absent only when ingestion failed before any bytes were stored.
    pub original_ref: Option<BlobRef>,
    pub processed_ref: Option<BlobRef>,
    pub mime_type: String,
    pub processed_mime_type: Option<String>,
    pub operation: Operation,
    pub params: Params,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    /// Applies a mutation after checking it against the state machine.
    pub fn apply(&mut self, mutation: JobMutation, at: DateTime<Utc>) -> Result<(), TransitionError> {
        let next = mutation.target_status();
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        match mutation {
            JobMutation::Start => {}
            JobMutation::Complete {
                processed_ref,
                processed_mime_type,
                width,
                height,
            } => {
                self.processed_ref = Some(processed_ref);
                self.processed_mime_type = Some(processed_mime_type);
                self.width = Some(width);
                self.height = Some(height);
            }
            JobMutation::Fail { message } => {
                self.error_message = Some(message);
            }
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

/// A job before the store has assigned its id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: String,
    pub source_kind: SourceKind,
    pub original_ref: Option<BlobRef>,
    pub mime_type: String,
    pub operation: Operation,
    pub params: Params,
    pub initial: InitialStatus,
}

/// The only states a job may be created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialStatus {
    Queued,
    Processing,
    Failed { message: String },
}

impl NewJob {
    pub fn into_job(self, id: Uuid, at: DateTime<Utc>) -> Job {
        let (status, error_message) = match self.initial {
            InitialStatus::Queued => (JobStatus::Queued, None),
            InitialStatus::Processing => (JobStatus::Processing, None),
            InitialStatus::Failed { message } => (JobStatus::Error, Some(message)),
        };

        Job {
            id,
            owner_id: self.owner_id,
            source_kind: self.source_kind,
            original_ref: self.original_ref,
            processed_ref: None,
            mime_type: self.mime_type,
            processed_mime_type: None,
            operation: self.operation,
            params: self.params,
            status,
            error_message,
            width: None,
            height: None,
            created_at: at,
            updated_at: at,
        }
    }
}

/// A status transition requested by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    Start,
    Complete {
        processed_ref: BlobRef,
        processed_mime_type: String,
        width: u32,
        height: u32,
    },
    Fail {
        message: String,
    },
}

impl JobMutation {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobMutation::Start => JobStatus::Processing,
            JobMutation::Complete { .. } => JobStatus::Done,
            JobMutation::Fail { .. } => JobStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Externally visible projection of a job. Blob references stay internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub id: Uuid,
    pub owner_id: String,
    pub source_kind: SourceKind,
    pub operation: String,
    pub params: Params,
    pub status: JobStatus,
    pub mime_type: String,
    pub has_processed: bool,
    pub error_message: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            owner_id: job.owner_id,
            source_kind: job.source_kind,
            operation: job.operation.name().to_string(),
            params: job.params,
            status: job.status,
            mime_type: job.mime_type,
            has_processed: job.processed_ref.is_some(),
            error_message: job.error_message,
            width: job.width,
            height: job.height,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
