//! PostgreSQL-backed store tests.
//!
//! Requires a reachable database in `DATABASE_URL`.
//! Run with: cargo test --test integration_test -- --ignored

mod fixtures;

use std::sync::Arc;

use fixtures::png;
use image_jobs::db::{self, JobStore, PgJobStore, StoreError};
use image_jobs::models::audit::NewAuditEntry;
use image_jobs::models::identity::Identity;
use image_jobs::models::job::{InitialStatus, JobMutation, JobStatus, NewJob, Params, SourceKind};
use image_jobs::models::operation::Operation;
use image_jobs::models::query::{AuditFilter, JobFilter, JobSort, Page, SortOrder};
use image_jobs::services::engine::{JobEngine, Payload, Submission};
use image_jobs::services::fetcher::{RetryPolicy, RetryingFetcher};
use image_jobs::services::storage::{BlobRef, MemoryBlobStore};
use image_jobs::services::transform::ImageTransform;
use uuid::Uuid;

async fn store() -> PgJobStore {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&url).await.expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to run migrations");
    PgJobStore::new(pool)
}

fn new_job(owner: &str) -> NewJob {
    NewJob {
        owner_id: owner.to_string(),
        source_kind: SourceKind::UploadedFile,
        original_ref: Some(BlobRef::new("originals/test.png")),
        mime_type: "image/png".to_string(),
        operation: Operation::Resize { width: 4, height: 2 },
        params: Params::new(),
        initial: InitialStatus::Processing,
    }
}

#[tokio::test]
#[ignore]
async fn test_pg_lifecycle_and_conflict() {
    let store = store().await;
    let owner = format!("it-{}", Uuid::new_v4());

    let job = store
        .create(new_job(&owner), vec![NewAuditEntry::new(owner.clone(), "ingested")])
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Processing);

    let done = store
        .update(
            job.id,
            JobMutation::Complete {
                processed_ref: BlobRef::new("processed/test.png"),
                processed_mime_type: "image/png".to_string(),
                width: 4,
                height: 2,
            },
            vec![NewAuditEntry::system("transform:resize")],
        )
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.dimensions(), Some((4, 2)));

    let err = store
        .update(job.id, JobMutation::Fail { message: "late".into() }, vec![NewAuditEntry::system("error")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let reloaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.operation, Operation::Resize { width: 4, height: 2 });
    assert_eq!(reloaded.status, JobStatus::Done);

    let trail = store
        .list_audit(
            &AuditFilter {
                job_id: Some(job.id),
                ..Default::default()
            },
            SortOrder::Asc,
            Page::default(),
        )
        .await
        .unwrap();
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["ingested", "transform:resize"]);
    assert!(trail[0].id < trail[1].id);
}

#[tokio::test]
#[ignore]
async fn test_pg_listing_filters() {
    let store = store().await;
    let owner = format!("it-{}", Uuid::new_v4());

    let first = store.create(new_job(&owner), vec![]).await.unwrap();
    let mut failed = new_job(&owner);
    failed.initial = InitialStatus::Failed {
        message: "external API HTTP 404".into(),
    };
    let second = store
        .create(failed, vec![NewAuditEntry::system("error")])
        .await
        .unwrap();

    let all = store
        .list_by_owner(&owner, &JobFilter::default(), JobSort::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let errors = JobFilter {
        action: Some("error".to_string()),
        ..Default::default()
    };
    let jobs = store
        .list_by_owner(&owner, &errors, JobSort::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].error_message.as_deref(), Some("external API HTTP 404"));

    assert!(store.append_audit(NewAuditEntry::system("note").for_job(first.id)).await.is_ok());
    let err = store
        .append_audit(NewAuditEntry::system("note").for_job(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_pg_engine_round_trip() {
    let store: Arc<dyn JobStore> = Arc::new(store().await);
    let engine = JobEngine::new(
        store,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(ImageTransform),
        RetryingFetcher::new(RetryPolicy::default()).unwrap(),
    );
    let owner = format!("it-{}", Uuid::new_v4());

    let job_id = engine
        .submit(Submission {
            owner_id: owner.clone(),
            payload: Payload::Upload {
                bytes: png(10, 10),
                mime_type: "image/png".to_string(),
            },
            operation: "edge".to_string(),
            params: Params::new(),
            deadline: None,
        })
        .await
        .unwrap();

    let job = engine.get(job_id, &Identity::user(owner.as_str())).await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(engine.store().health_check().await.is_ok());
}
