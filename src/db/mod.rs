use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::audit::{AuditEntry, NewAuditEntry};
use crate::models::job::{Job, JobMutation, NewJob, TransitionError};
use crate::models::query::{AuditFilter, JobFilter, JobSort, Page, SortOrder};

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Persistence contract for jobs and their audit trail.
///
/// `create` and `update` take the audit entries that belong to the same
/// transition; implementations commit the job change and the entries as
/// one unit, serialised per job id. Operations on different jobs never
/// wait on each other.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Assigns id and timestamps; stores the job with its initial trail.
    async fn create(&self, job: NewJob, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError>;

    /// Applies a state-machine mutation together with its trail.
    ///
    /// Fails with `NotFound` for an unknown id and `Conflict` when the
    /// transition is illegal (e.g. a second terminal transition).
    async fn update(&self, job_id: Uuid, mutation: JobMutation, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<Vec<Job>, StoreError>;

    /// Appends one entry to an existing job's trail.
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// Entries ordered by `(timestamp, id)`.
    async fn list_audit(&self, filter: &AuditFilter, order: SortOrder, page: Page) -> Result<Vec<AuditEntry>, StoreError>;

    /// Connectivity probe for health checks.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("conflict: {0}")]
    Conflict(#[from] TransitionError),

    #[error("audit entry has no job id")]
    MissingJobId,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
