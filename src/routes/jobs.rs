use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::caller::Caller;
use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::fetch::FetchSpec;
use crate::models::job::{JobStatus, JobView, Params};
use crate::models::query::{JobFilter, JobSort, Page, SortField, SortOrder, DEFAULT_PAGE_LIMIT};
use crate::services::engine::{ArtifactKind, Payload, Submission};

/// POST /api/v1/jobs: upload an image (`image` field) with `op` and
/// optional operation fields such as `w`/`h`.
pub async fn submit_upload(
    State(state): State<AppState>,
    Caller(caller): Caller,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let mut image: Option<(Vec<u8>, Option<String>)> = None;
    let mut operation: Option<String> = None;
    let mut params = Params::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let declared = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                image = Some((data.to_vec(), declared));
            }
            "op" => {
                operation = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?);
            }
            "" => continue,
            _ => {
                let value = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                params.insert(name, value.into());
            }
        }
    }

    let (bytes, declared) = image.ok_or_else(|| ApiError::BadRequest("missing `image` field".to_string()))?;
    let operation = operation.ok_or_else(|| ApiError::BadRequest("missing `op` field".to_string()))?;
    let mime_type = resolve_mime(&bytes, declared);

    let submission = Submission {
        owner_id: caller.subject.clone(),
        payload: Payload::Upload { bytes, mime_type },
        operation,
        params,
        deadline: Some(Instant::now() + state.submit_deadline),
    };
    let job_id = state.engine.submit(submission).await?;
    let job = state.engine.get(job_id, &caller).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Declared types like `application/octet-stream` are replaced by the
/// sniffed image format when one is recognised.
fn resolve_mime(bytes: &[u8], declared: Option<String>) -> String {
    match declared {
        Some(mime) if mime.starts_with("image/") => mime,
        other => image::guess_format(bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| other.unwrap_or_else(|| "application/octet-stream".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoteJobRequest {
    /// Defaults to `passthrough`, storing the fetched image as-is.
    #[serde(default = "default_remote_op")]
    pub op: String,
    #[serde(default)]
    pub params: Params,
    pub fetch: FetchSpec,
}

fn default_remote_op() -> String {
    "passthrough".to_string()
}

/// POST /api/v1/jobs/remote: fetch the original from a third-party source.
pub async fn submit_remote(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<RemoteJobRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let submission = Submission {
        owner_id: caller.subject.clone(),
        payload: Payload::Remote(request.fetch),
        operation: request.op,
        params: request.params,
        deadline: Some(Instant::now() + state.submit_deadline),
    };
    let job_id = state.engine.submit(submission).await?;
    let job = state.engine.get(job_id, &caller).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub action: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub sort_by: Option<SortField>,
    pub order: Option<SortOrder>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListJobsQuery {
    fn page(&self) -> Page {
        match self.page {
            Some(page) => Page::numbered(page, self.per_page.unwrap_or(DEFAULT_PAGE_LIMIT)),
            None => Page::new(self.limit.unwrap_or(DEFAULT_PAGE_LIMIT), self.offset.unwrap_or(0)),
        }
    }
}

/// GET /api/v1/jobs: the caller's own jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let filter = JobFilter {
        status: query.status,
        action: query.action.clone(),
        created_after: query.created_after,
        created_before: query.created_before,
    };
    let sort = JobSort {
        field: query.sort_by.unwrap_or_default(),
        order: query.order.unwrap_or_default(),
    };

    let jobs = state.engine.list_mine(&caller, &filter, sort, query.page()).await?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(state.engine.get(job_id, &caller).await?))
}

/// GET /api/v1/jobs/{id}/original
pub async fn get_original(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    artifact(&state, job_id, ArtifactKind::Original, &caller).await
}

/// GET /api/v1/jobs/{id}/processed
pub async fn get_processed(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    artifact(&state, job_id, ArtifactKind::Processed, &caller).await
}

async fn artifact(
    state: &AppState,
    job_id: Uuid,
    kind: ArtifactKind,
    caller: &crate::models::identity::Identity,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = state.engine.fetch_artifact(job_id, kind, caller).await?;
    Ok(([(CONTENT_TYPE, artifact.mime_type)], artifact.bytes))
}
