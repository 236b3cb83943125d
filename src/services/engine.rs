//! Job lifecycle orchestration: ingest, record, transform, finalize.
//!
//! Every accepted submission ends up as exactly one job in a terminal state
//! with a trail whose last entry matches that state. Ingestion failures do
//! not surface as call errors; they produce a job in `Error`.
//!
//! Once a job exists, finalization runs on its own task. Dropping the
//! `submit` future stops the wait, not the job.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::audit::{actions, AuditView, NewAuditEntry};
use crate::models::fetch::{FetchSpec, RemoteSources};
use crate::models::identity::Identity;
use crate::models::job::{InitialStatus, Job, JobMutation, JobView, NewJob, Params, SourceKind};
use crate::models::operation::Operation;
use crate::models::query::{AuditFilter, JobFilter, JobSort, Page, SortOrder};
use crate::services::access::AccessGuard;
use crate::services::fetcher::{AttemptOutcome, FetchError, FetchEvent, RetryingFetcher};
use crate::services::storage::{BlobArea, BlobError, BlobStore};
use crate::services::transform::{Transform, TransformError, TransformOutput};

pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the original image comes from.
#[derive(Debug, Clone)]
pub enum Payload {
    Upload { bytes: Vec<u8>, mime_type: String },
    Remote(FetchSpec),
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub owner_id: String,
    pub payload: Payload,
    pub operation: String,
    pub params: Params,
    /// Absolute deadline for the whole submission, if any.
    pub deadline: Option<Instant>,
}

/// Which stored image to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Original,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("job not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("blob store error: {0}")]
    Blob(BlobError),

    #[error("job task aborted: {0}")]
    Aborted(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => EngineError::NotFound,
            StoreError::Conflict(t) => EngineError::Conflict(t.to_string()),
            other => EngineError::Store(other),
        }
    }
}

impl From<BlobError> for EngineError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(_) => EngineError::NotFound,
            other => EngineError::Blob(other),
        }
    }
}

impl From<FetchError> for EngineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::DeadlineExceeded => EngineError::DeadlineExceeded,
            other => EngineError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// Original image ready to be recorded.
struct Ingested {
    bytes: Vec<u8>,
    mime_type: String,
}

/// Everything known about a submission before its job exists.
struct Draft {
    owner_id: String,
    source_kind: SourceKind,
    mime_type: String,
    operation: Operation,
    params: Params,
    trail: Vec<NewAuditEntry>,
}

pub struct JobEngine {
    finisher: Finisher,
    fetcher: RetryingFetcher,
    sources: RemoteSources,
}

/// The part of the engine that moves a `Processing` job to its terminal
/// state. Cheap to clone so it can be moved onto a spawned task.
#[derive(Clone)]
struct Finisher {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    transform: Arc<dyn Transform>,
    transform_timeout: Duration,
}

impl JobEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        transform: Arc<dyn Transform>,
        fetcher: RetryingFetcher,
    ) -> Self {
        Self {
            finisher: Finisher {
                store,
                blobs,
                transform,
                transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            },
            fetcher,
            sources: RemoteSources::default(),
        }
    }

    pub fn with_sources(mut self, sources: RemoteSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.finisher.transform_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.finisher.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.finisher.blobs
    }

    /// Accepts a submission and drives it to a terminal state.
    ///
    /// Returns an error only when the request itself is rejected (unknown
    /// operation, bad payload) or the store cannot persist the job. Fetch,
    /// blob and transform failures yield `Ok(id)` of a job in `Error`.
    pub async fn submit(&self, submission: Submission) -> Result<Uuid, EngineError> {
        let Submission {
            owner_id,
            payload,
            operation,
            mut params,
            deadline,
        } = submission;

        if owner_id.trim().is_empty() {
            return Err(EngineError::InvalidPayload("owner id is empty".to_string()));
        }
        let operation = Operation::parse(&operation, &params).map_err(|e| EngineError::InvalidOperation(e.to_string()))?;
        params
            .entry("op".to_string())
            .or_insert_with(|| operation.name().into());

        let (source_kind, draft_mime) = match &payload {
            Payload::Upload { bytes, mime_type } => {
                if !mime_type.starts_with("image/") {
                    return Err(EngineError::UnsupportedMediaType(mime_type.clone()));
                }
                if bytes.is_empty() {
                    return Err(EngineError::InvalidPayload("empty upload".to_string()));
                }
                (SourceKind::UploadedFile, mime_type.clone())
            }
            Payload::Remote(spec) => {
                spec.validate().map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
                params.insert("fetch".to_string(), spec.describe().into());
                (SourceKind::RemoteFetch, spec.expected_mime().to_string())
            }
        };

        let source_label: &'static str = source_kind.into();
        metrics::counter!("image_jobs_submitted_total", "source" => source_label).increment(1);
        let started = std::time::Instant::now();

        let mut draft = Draft {
            owner_id,
            source_kind,
            mime_type: draft_mime,
            operation,
            params,
            trail: Vec::new(),
        };

        let ingested = match payload {
            Payload::Upload { bytes, mime_type } => Ingested { bytes, mime_type },
            Payload::Remote(spec) => {
                // Validated above; only a malformed base URL can fail here.
                let url = self
                    .sources
                    .url_for(&spec)
                    .map_err(|e| EngineError::InvalidPayload(e.to_string()))?;

                let report = self.fetcher.get(&url, deadline).await;
                draft.trail.extend(report.events.iter().map(fetch_entry));

                match report.result {
                    Ok(image) => {
                        draft.mime_type = image.content_type.clone();
                        Ingested {
                            bytes: image.bytes,
                            mime_type: image.content_type,
                        }
                    }
                    Err(e) => return self.reject(draft, "fetch", EngineError::from(e), started).await,
                }
            }
        };

        let original_ref = match self.blobs().put(BlobArea::Originals, &ingested.bytes, &ingested.mime_type).await {
            Ok(blob) => blob,
            Err(e) => return self.reject(draft, "store", EngineError::Blob(e), started).await,
        };

        let source: &'static str = draft.source_kind.into();
        draft.trail.push(
            NewAuditEntry::new(draft.owner_id.clone(), actions::INGESTED)
                .detail("source", source)
                .detail("mime_type", ingested.mime_type.clone())
                .detail("bytes", ingested.bytes.len()),
        );

        let job = self
            .store()
            .create(
                NewJob {
                    owner_id: draft.owner_id,
                    source_kind: draft.source_kind,
                    original_ref: Some(original_ref),
                    mime_type: draft.mime_type,
                    operation: draft.operation,
                    params: draft.params,
                    initial: InitialStatus::Processing,
                },
                draft.trail,
            )
            .await?;

        tracing::info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            op = job.operation.name(),
            source = source,
            "Job ingested"
        );

        let job_id = job.id;
        let finisher = self.finisher.clone();
        let task = tokio::spawn(async move { finisher.process(job, ingested.bytes, deadline, started).await });

        match task.await {
            Ok(result) => result.map(|()| job_id),
            Err(join) => {
                tracing::error!(job_id = %job_id, error = %join, "Job task aborted");
                Err(EngineError::Aborted(join.to_string()))
            }
        }
    }

    /// Records a job that failed before its original was stored.
    async fn reject(
        &self,
        mut draft: Draft,
        stage: &'static str,
        cause: EngineError,
        started: std::time::Instant,
    ) -> Result<Uuid, EngineError> {
        let message = cause.to_string();
        draft.trail.push(
            NewAuditEntry::system(actions::ERROR)
                .detail("stage", stage)
                .detail("cause", message.clone()),
        );

        let job = self
            .store()
            .create(
                NewJob {
                    owner_id: draft.owner_id,
                    source_kind: draft.source_kind,
                    original_ref: None,
                    mime_type: draft.mime_type,
                    operation: draft.operation,
                    params: draft.params,
                    initial: InitialStatus::Failed {
                        message: message.clone(),
                    },
                },
                draft.trail,
            )
            .await?;

        tracing::warn!(job_id = %job.id, stage = stage, error = %message, "Job failed during ingestion");
        record_finished(false, started);
        Ok(job.id)
    }

    /// Jobs the caller cannot read look exactly like jobs that do not exist.
    pub async fn get(&self, job_id: Uuid, caller: &Identity) -> Result<JobView, EngineError> {
        self.readable(job_id, caller).await.map(JobView::from)
    }

    async fn readable(&self, job_id: Uuid, caller: &Identity) -> Result<Job, EngineError> {
        match self.store().get(job_id).await? {
            Some(job) if AccessGuard::can_read(&job, caller) => Ok(job),
            Some(_) => {
                tracing::debug!(job_id = %job_id, caller = %caller.subject, "Read denied");
                Err(EngineError::NotFound)
            }
            None => Err(EngineError::NotFound),
        }
    }

    pub async fn list_mine(
        &self,
        caller: &Identity,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<Vec<JobView>, EngineError> {
        let jobs = self.store().list_by_owner(&caller.subject, filter, sort, page).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    pub async fn list_audit(
        &self,
        caller: &Identity,
        filter: &AuditFilter,
        order: SortOrder,
        page: Page,
    ) -> Result<Vec<AuditView>, EngineError> {
        if !AccessGuard::can_audit(caller) {
            return Err(EngineError::Forbidden);
        }
        let entries = self.store().list_audit(filter, order, page).await?;
        Ok(entries.into_iter().map(AuditView::from).collect())
    }

    pub async fn fetch_artifact(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        caller: &Identity,
    ) -> Result<Artifact, EngineError> {
        let job = self.readable(job_id, caller).await?;

        let (blob, mime_type) = match kind {
            ArtifactKind::Original => (job.original_ref, Some(job.mime_type)),
            ArtifactKind::Processed => (job.processed_ref, job.processed_mime_type),
        };
        let blob = blob.ok_or(EngineError::NotFound)?;
        let bytes = self.blobs().get(&blob).await?;

        Ok(Artifact {
            bytes,
            mime_type: mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        })
    }
}

impl Finisher {
    /// Runs the transform under the tighter of `deadline` and the engine's
    /// own ceiling, then moves the job to `Done` or `Error`.
    async fn process(
        &self,
        job: Job,
        bytes: Vec<u8>,
        deadline: Option<Instant>,
        started: std::time::Instant,
    ) -> Result<(), EngineError> {
        let ceiling = Instant::now() + self.transform_timeout;
        let limit = deadline.map_or(ceiling, |d| d.min(ceiling));

        let transform = Arc::clone(&self.transform);
        let operation = job.operation;
        let mime_type = job.mime_type.clone();
        let input_bytes = bytes.len();
        let transform_started = std::time::Instant::now();

        let task = tokio::task::spawn_blocking(move || transform.apply(&bytes, &mime_type, &operation));
        let outcome: Result<TransformOutput, EngineError> = match tokio::time::timeout_at(limit, task).await {
            Err(_) => Err(EngineError::DeadlineExceeded),
            Ok(Err(join)) => Err(EngineError::Transform(TransformError::Failed(format!(
                "transform task aborted: {join}"
            )))),
            Ok(Ok(result)) => result.map_err(EngineError::from),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => return self.fail(&job, "transform", e, started).await,
        };

        let processed_ref = match self.blobs.put(BlobArea::Processed, &output.bytes, &output.mime_type).await {
            Ok(blob) => blob,
            Err(e) => return self.fail(&job, "store", EngineError::Blob(e), started).await,
        };

        let entry = NewAuditEntry::system(job.operation.audit_action())
            .detail("width", output.width)
            .detail("height", output.height)
            .detail("input_bytes", input_bytes)
            .detail("output_bytes", output.bytes.len())
            .detail("duration_ms", transform_started.elapsed().as_millis() as u64);

        let completed = self
            .store
            .update(
                job.id,
                JobMutation::Complete {
                    processed_ref,
                    processed_mime_type: output.mime_type,
                    width: output.width,
                    height: output.height,
                },
                vec![entry],
            )
            .await;

        let done = match completed {
            Ok(done) => done,
            // Already terminal or gone: nothing left to finalize.
            Err(e @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => return Err(e.into()),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Recording completion failed");
                return self.fail(&job, "store", EngineError::Store(e), started).await;
            }
        };

        tracing::info!(
            job_id = %done.id,
            op = done.operation.name(),
            width = output.width,
            height = output.height,
            "Job completed"
        );
        record_finished(true, started);
        Ok(())
    }

    async fn fail(
        &self,
        job: &Job,
        stage: &'static str,
        cause: EngineError,
        started: std::time::Instant,
    ) -> Result<(), EngineError> {
        let message = cause.to_string();
        let entry = NewAuditEntry::system(actions::ERROR)
            .detail("stage", stage)
            .detail("cause", message.clone());

        if let Err(e) = self
            .store
            .update(job.id, JobMutation::Fail { message: message.clone() }, vec![entry])
            .await
        {
            tracing::error!(job_id = %job.id, stage = stage, error = %e, "Recording failure failed");
            return Err(e.into());
        }

        tracing::warn!(job_id = %job.id, stage = stage, error = %message, "Job failed");
        record_finished(false, started);
        Ok(())
    }
}

fn fetch_entry(event: &FetchEvent) -> NewAuditEntry {
    let action = match event.outcome {
        AttemptOutcome::Success => actions::FETCH_OK,
        AttemptOutcome::Retryable => actions::FETCH_RETRY,
        AttemptOutcome::Hard => actions::FETCH_FAILED,
        AttemptOutcome::DeadlineExceeded => actions::FETCH_DEADLINE,
    };

    let mut entry = NewAuditEntry::system(action).detail("attempt", event.attempt);
    if let Some(status) = event.status {
        entry = entry.detail("status", status);
    }
    if let Some(cause) = &event.cause {
        entry = entry.detail("cause", cause.clone());
    }
    if let Some(delay) = event.delay {
        entry = entry.detail("delay_ms", delay.as_millis() as u64);
    }
    if let Some(bytes) = event.bytes {
        entry = entry.detail("bytes", bytes);
    }
    entry
}

fn record_finished(succeeded: bool, started: std::time::Instant) {
    if succeeded {
        metrics::counter!("image_jobs_completed_total").increment(1);
    } else {
        metrics::counter!("image_jobs_failed_total").increment(1);
    }
    metrics::histogram!("image_job_processing_seconds").record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fetch_entry_actions() {
        let event = FetchEvent {
            attempt: 2,
            outcome: AttemptOutcome::Retryable,
            status: Some(503),
            cause: Some("HTTP 503".to_string()),
            delay: Some(Duration::from_millis(1200)),
            bytes: None,
        };
        let entry = fetch_entry(&event);
        assert_eq!(entry.action, actions::FETCH_RETRY);
        assert_eq!(entry.actor_id, "system");
        assert_eq!(entry.details["attempt"], 2);
        assert_eq!(entry.details["status"], 503);
        assert_eq!(entry.details["delay_ms"], 1200);
    }

    #[test]
    fn test_upstream_error_message_keeps_status() {
        let e = EngineError::from(FetchError::Status { status: 404 });
        assert!(matches!(e, EngineError::UpstreamUnavailable(_)));
        assert!(e.to_string().contains("404"));

        let e = EngineError::from(FetchError::DeadlineExceeded);
        assert!(matches!(e, EngineError::DeadlineExceeded));
    }

    #[test]
    fn test_store_not_found_is_not_found() {
        let e = EngineError::from(StoreError::NotFound(Uuid::new_v4()));
        assert!(matches!(e, EngineError::NotFound));
    }
}
