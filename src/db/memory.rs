//! In-process reference `JobStore`.
//!
//! Each job and its trail sit behind their own mutex. The index lock is only
//! held long enough to insert or clone a record handle, never while a record
//! is being mutated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::audit::{AuditEntry, NewAuditEntry};
use crate::models::job::{Job, JobMutation, NewJob};
use crate::models::query::{AuditFilter, JobFilter, JobSort, Page, SortField, SortOrder};

struct JobRecord {
    job: Job,
    trail: Vec<AuditEntry>,
}

type Handle = Arc<Mutex<JobRecord>>;

#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<Uuid, Handle>>,
    last_audit_id: AtomicI64,
    /// Last issued timestamp in microseconds.
    last_micros: AtomicI64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly increasing per store instance, even if the wall clock steps back.
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let next = |previous: i64| now.max(previous + 1);
        let issued = match self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |previous| Some(next(previous)))
        {
            Ok(previous) | Err(previous) => next(previous),
        };
        DateTime::from_timestamp_micros(issued).unwrap_or_else(Utc::now)
    }

    fn stamp(&self, entry: NewAuditEntry, job_id: Uuid) -> AuditEntry {
        let id = self.last_audit_id.fetch_add(1, Ordering::SeqCst) + 1;
        entry.into_entry(id, job_id, self.now())
    }

    async fn handle(&self, job_id: Uuid) -> Option<Handle> {
        self.records.read().await.get(&job_id).cloned()
    }

    async fn handles(&self) -> Vec<Handle> {
        self.records.read().await.values().cloned().collect()
    }
}

fn matches_job(job: &Job, trail: &[AuditEntry], owner_id: &str, filter: &JobFilter) -> bool {
    job.owner_id == owner_id
        && filter.status.map_or(true, |s| job.status == s)
        && filter.created_after.map_or(true, |t| job.created_at >= t)
        && filter.created_before.map_or(true, |t| job.created_at <= t)
        && filter
            .action
            .as_deref()
            .map_or(true, |action| trail.iter().any(|e| e.action == action))
}

fn matches_entry(entry: &AuditEntry, filter: &AuditFilter) -> bool {
    filter.action.as_deref().map_or(true, |a| entry.action == a)
        && filter.actor_id.as_deref().map_or(true, |a| entry.actor_id == a)
        && filter.job_id.map_or(true, |id| entry.job_id == id)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        let id = Uuid::new_v4();
        let job = job.into_job(id, self.now());
        let trail = trail.into_iter().map(|entry| self.stamp(entry, id)).collect();

        let record = Arc::new(Mutex::new(JobRecord {
            job: job.clone(),
            trail,
        }));
        self.records.write().await.insert(id, record);
        Ok(job)
    }

    async fn update(&self, job_id: Uuid, mutation: JobMutation, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        let handle = self.handle(job_id).await.ok_or(StoreError::NotFound(job_id))?;
        let mut record = handle.lock().await;

        // Mutate a copy first so a rejected transition leaves nothing behind.
        let mut job = record.job.clone();
        job.apply(mutation, self.now())?;

        let stamped: Vec<AuditEntry> = trail.into_iter().map(|entry| self.stamp(entry, job_id)).collect();
        record.trail.extend(stamped);
        record.job = job.clone();
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        match self.handle(job_id).await {
            Some(handle) => Ok(Some(handle.lock().await.job.clone())),
            None => Ok(None),
        }
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        for handle in self.handles().await {
            let record = handle.lock().await;
            if matches_job(&record.job, &record.trail, owner_id, filter) {
                jobs.push(record.job.clone());
            }
        }

        jobs.sort_by(|a, b| match sort.field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
            SortField::Status => a
                .status
                .to_string()
                .cmp(&b.status.to_string())
                .then(a.created_at.cmp(&b.created_at)),
        });
        if sort.order == SortOrder::Desc {
            jobs.reverse();
        }
        Ok(page.slice(jobs))
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let job_id = entry.job_id.ok_or(StoreError::MissingJobId)?;
        let handle = self.handle(job_id).await.ok_or(StoreError::NotFound(job_id))?;
        let mut record = handle.lock().await;

        let entry = self.stamp(entry, job_id);
        record.trail.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(&self, filter: &AuditFilter, order: SortOrder, page: Page) -> Result<Vec<AuditEntry>, StoreError> {
        let handles = match filter.job_id {
            Some(job_id) => self.handle(job_id).await.into_iter().collect(),
            None => self.handles().await,
        };

        let mut entries = Vec::new();
        for handle in handles {
            let record = handle.lock().await;
            entries.extend(record.trail.iter().filter(|e| matches_entry(e, filter)).cloned());
        }

        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        if order == SortOrder::Desc {
            entries.reverse();
        }
        Ok(page.slice(entries))
    }
}
