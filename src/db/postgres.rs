use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::audit::{AuditEntry, Details, NewAuditEntry};
use crate::models::job::{Job, JobMutation, JobStatus, NewJob, SourceKind};
use crate::models::query::{AuditFilter, JobFilter, JobSort, Page, SortField, SortOrder};
use crate::services::storage::BlobRef;

const JOB_COLUMNS: &str = "id, owner_id, source_kind, original_ref, processed_ref, mime_type, \
     processed_mime_type, operation, params, status, error_message, width, height, created_at, updated_at";

const AUDIT_COLUMNS: &str = "id, job_id, actor_id, action, details, timestamp";

/// PostgreSQL-backed `JobStore`.
///
/// Every mutation runs in its own transaction that row-locks the job
/// (`SELECT … FOR UPDATE`), so transitions on one job are serialised while
/// different jobs proceed independently.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let source_kind: String = row.try_get("source_kind")?;
    let status: String = row.try_get("status")?;
    let operation: serde_json::Value = row.try_get("operation")?;
    let params: serde_json::Value = row.try_get("params")?;
    let width: Option<i64> = row.try_get("width")?;
    let height: Option<i64> = row.try_get("height")?;

    let corrupt = |what: &str| StoreError::Corrupt(format!("job {id}: bad {what}"));

    Ok(Job {
        id,
        owner_id: row.try_get("owner_id")?,
        source_kind: source_kind.parse::<SourceKind>().map_err(|_| corrupt("source_kind"))?,
        original_ref: row.try_get::<Option<String>, _>("original_ref")?.map(BlobRef::new),
        processed_ref: row.try_get::<Option<String>, _>("processed_ref")?.map(BlobRef::new),
        mime_type: row.try_get("mime_type")?,
        processed_mime_type: row.try_get("processed_mime_type")?,
        operation: serde_json::from_value(operation).map_err(|_| corrupt("operation"))?,
        params: serde_json::from_value(params).map_err(|_| corrupt("params"))?,
        status: status.parse::<JobStatus>().map_err(|_| corrupt("status"))?,
        error_message: row.try_get("error_message")?,
        width: width.map(u32::try_from).transpose().map_err(|_| corrupt("width"))?,
        height: height.map(u32::try_from).transpose().map_err(|_| corrupt("height"))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let details: serde_json::Value = row.try_get("details")?;
    Ok(AuditEntry {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        actor_id: row.try_get("actor_id")?,
        action: row.try_get("action")?,
        details: serde_json::from_value::<Details>(details)
            .map_err(|e| StoreError::Corrupt(format!("audit details: {e}")))?,
        timestamp: row.try_get("timestamp")?,
    })
}

/// Insert one audit entry on an open connection (usually a transaction).
async fn insert_audit(conn: &mut PgConnection, job_id: Uuid, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO audit_entries (job_id, actor_id, action, details)
        VALUES ($1, $2, $3, $4)
        RETURNING {AUDIT_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(&entry.actor_id)
    .bind(&entry.action)
    .bind(serde_json::Value::Object(entry.details))
    .fetch_one(conn)
    .await?;

    audit_from_row(&row)
}

fn direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        let job = job.into_job(Uuid::new_v4(), Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO image_jobs (id, owner_id, source_kind, original_ref, mime_type, operation,
                                    params, status, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(job.id)
        .bind(&job.owner_id)
        .bind(job.source_kind.to_string())
        .bind(job.original_ref.as_ref().map(BlobRef::as_str))
        .bind(&job.mime_type)
        .bind(serde_json::to_value(job.operation).map_err(|e| StoreError::Corrupt(e.to_string()))?)
        .bind(serde_json::Value::Object(job.params.clone()))
        .bind(job.status.to_string())
        .bind(job.error_message.as_deref())
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        for entry in trail {
            insert_audit(&mut tx, job.id, entry).await?;
        }
        tx.commit().await?;

        tracing::debug!(job_id = %job.id, status = %job.status, "Inserted job");
        Ok(job)
    }

    async fn update(&self, job_id: Uuid, mutation: JobMutation, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM image_jobs WHERE id = $1 FOR UPDATE"))
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        let mut job = job_from_row(&row)?;
        // Dropping `tx` on error rolls the transaction back.
        job.apply(mutation, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE image_jobs
            SET status = $2,
                processed_ref = $3,
                processed_mime_type = $4,
                error_message = $5,
                width = $6,
                height = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(job.processed_ref.as_ref().map(BlobRef::as_str))
        .bind(job.processed_mime_type.as_deref())
        .bind(job.error_message.as_deref())
        .bind(job.width.map(i64::from))
        .bind(job.height.map(i64::from))
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for entry in trail {
            insert_audit(&mut tx, job.id, entry).await?;
        }
        tx.commit().await?;

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM image_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<Vec<Job>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM image_jobs j WHERE j.owner_id = "));
        query.push_bind(owner_id.to_string());

        if let Some(status) = filter.status {
            query.push(" AND j.status = ").push_bind(status.to_string());
        }
        if let Some(after) = filter.created_after {
            query.push(" AND j.created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            query.push(" AND j.created_at <= ").push_bind(before);
        }
        if let Some(action) = &filter.action {
            query
                .push(" AND EXISTS (SELECT 1 FROM audit_entries a WHERE a.job_id = j.id AND a.action = ")
                .push_bind(action.clone())
                .push(")");
        }

        let dir = direction(sort.order);
        match sort.field {
            SortField::CreatedAt => query.push(format!(" ORDER BY j.created_at {dir}, j.id {dir}")),
            SortField::Status => query.push(format!(" ORDER BY j.status {dir}, j.created_at {dir}")),
        };
        query
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let job_id = entry.job_id.ok_or(StoreError::MissingJobId)?;
        let mut tx = self.pool.begin().await?;

        // Same row lock as `update`, so an append never interleaves with a transition.
        sqlx::query("SELECT id FROM image_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        let entry = insert_audit(&mut tx, job_id, entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn list_audit(&self, filter: &AuditFilter, order: SortOrder, page: Page) -> Result<Vec<AuditEntry>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE TRUE"));

        if let Some(action) = &filter.action {
            query.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(job_id) = filter.job_id {
            query.push(" AND job_id = ").push_bind(job_id);
        }
        if let Some(actor) = &filter.actor_id {
            query.push(" AND actor_id = ").push_bind(actor.clone());
        }

        let dir = direction(order);
        query
            .push(format!(" ORDER BY timestamp {dir}, id {dir}"))
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
