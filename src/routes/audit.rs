use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::caller::Caller;
use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::audit::AuditView;
use crate::models::query::{AuditFilter, Page, SortOrder, DEFAULT_PAGE_LIMIT};

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub job_id: Option<Uuid>,
    pub actor: Option<String>,
    pub order: Option<SortOrder>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

/// GET /api/v1/audit: admin only.
pub async fn list_audit(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditView>>, ApiError> {
    let filter = AuditFilter {
        action: query.action,
        job_id: query.job_id,
        actor_id: query.actor,
    };
    let page = Page::new(query.limit.unwrap_or(DEFAULT_PAGE_LIMIT), query.offset.unwrap_or(0));

    let entries = state
        .engine
        .list_audit(&caller, &filter, query.order.unwrap_or_default(), page)
        .await?;
    Ok(Json(entries))
}
