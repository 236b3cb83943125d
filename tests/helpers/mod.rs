//! Test helpers: in-memory engines, stub transforms and a local server.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image_jobs::app_state::AppState;
use image_jobs::db::{JobStore, MemoryJobStore, StoreError};
use image_jobs::models::audit::{AuditEntry, AuditView, NewAuditEntry};
use image_jobs::models::fetch::RemoteSources;
use image_jobs::models::identity::Identity;
use image_jobs::models::job::{Job, JobMutation, NewJob, Params};
use image_jobs::models::operation::Operation;
use image_jobs::models::query::{AuditFilter, JobFilter, JobSort, Page, SortOrder};
use image_jobs::routes;
use image_jobs::services::auth::JwtAuthenticator;
use image_jobs::services::engine::{JobEngine, Payload, Submission};
use image_jobs::services::fetcher::{RetryPolicy, RetryingFetcher};
use image_jobs::services::storage::{BlobStore, MemoryBlobStore};
use image_jobs::services::transform::{ImageTransform, Transform, TransformError, TransformOutput};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";

/// Short backoff so retry tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    }
}

pub struct Harness {
    pub engine: Arc<JobEngine>,
    pub store: Arc<MemoryJobStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub struct HarnessBuilder {
    transform: Arc<dyn Transform>,
    sources: RemoteSources,
    policy: RetryPolicy,
    transform_timeout: Duration,
    reject_completions: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            transform: Arc::new(ImageTransform),
            sources: RemoteSources::default(),
            policy: fast_policy(),
            transform_timeout: Duration::from_secs(10),
            reject_completions: false,
        }
    }
}

impl HarnessBuilder {
    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Points both remote sources at `base_url`.
    pub fn remote(mut self, base_url: &str) -> Self {
        self.sources = RemoteSources {
            picsum_base_url: base_url.to_string(),
            qrserver_base_url: base_url.to_string(),
        };
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout = timeout;
        self
    }

    /// The engine's store refuses every `Complete` mutation.
    pub fn reject_completions(mut self) -> Self {
        self.reject_completions = true;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let fetcher = RetryingFetcher::new(self.policy).expect("http client");

        let engine_store: Arc<dyn JobStore> = if self.reject_completions {
            Arc::new(RejectCompletions(Arc::clone(&store)))
        } else {
            Arc::clone(&store) as Arc<dyn JobStore>
        };

        let engine = JobEngine::new(
            engine_store,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            self.transform,
            fetcher,
        )
        .with_sources(self.sources)
        .with_transform_timeout(self.transform_timeout);

        Harness {
            engine: Arc::new(engine),
            store,
            blobs,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::default().build()
}

impl Harness {
    /// Full trail of one job, oldest first.
    pub async fn trail(&self, job_id: Uuid) -> Vec<AuditView> {
        let filter = AuditFilter {
            job_id: Some(job_id),
            ..Default::default()
        };
        self.engine
            .list_audit(&Identity::admin("auditor"), &filter, SortOrder::Asc, Page::new(100, 0))
            .await
            .expect("list audit")
    }

    pub async fn actions(&self, job_id: Uuid) -> Vec<String> {
        self.trail(job_id).await.into_iter().map(|e| e.action).collect()
    }
}

pub fn upload(owner: &str, op: &str, bytes: Vec<u8>) -> Submission {
    Submission {
        owner_id: owner.to_string(),
        payload: Payload::Upload {
            bytes,
            mime_type: "image/png".to_string(),
        },
        operation: op.to_string(),
        params: Params::new(),
        deadline: None,
    }
}

/// Transform that succeeds or fails without touching pixels.
#[derive(Debug, Clone)]
pub struct StubTransform {
    pub fail_with: Option<String>,
}

impl StubTransform {
    pub fn ok() -> Self {
        Self { fail_with: None }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
        }
    }
}

impl Transform for StubTransform {
    fn apply(&self, bytes: &[u8], _mime_type: &str, _operation: &Operation) -> Result<TransformOutput, TransformError> {
        match &self.fail_with {
            Some(message) => Err(TransformError::Failed(message.clone())),
            None => Ok(TransformOutput {
                bytes: bytes.to_vec(),
                width: 1,
                height: 1,
                mime_type: "image/png".to_string(),
            }),
        }
    }
}

/// Transform that blocks its worker thread for a while before succeeding.
#[derive(Debug, Clone)]
pub struct SlowTransform(pub Duration);

impl Transform for SlowTransform {
    fn apply(&self, bytes: &[u8], mime_type: &str, operation: &Operation) -> Result<TransformOutput, TransformError> {
        std::thread::sleep(self.0);
        StubTransform::ok().apply(bytes, mime_type, operation)
    }
}

/// Memory store whose `Complete` updates fail as if the database dropped out.
pub struct RejectCompletions(pub Arc<MemoryJobStore>);

#[async_trait]
impl JobStore for RejectCompletions {
    async fn create(&self, job: NewJob, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        self.0.create(job, trail).await
    }

    async fn update(&self, job_id: Uuid, mutation: JobMutation, trail: Vec<NewAuditEntry>) -> Result<Job, StoreError> {
        if matches!(mutation, JobMutation::Complete { .. }) {
            return Err(StoreError::Corrupt("write rejected".to_string()));
        }
        self.0.update(job_id, mutation, trail).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.0.get(job_id).await
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &JobFilter,
        sort: JobSort,
        page: Page,
    ) -> Result<Vec<Job>, StoreError> {
        self.0.list_by_owner(owner_id, filter, sort, page).await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        self.0.append_audit(entry).await
    }

    async fn list_audit(&self, filter: &AuditFilter, order: SortOrder, page: Page) -> Result<Vec<AuditEntry>, StoreError> {
        self.0.list_audit(filter, order, page).await
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    role: &'a str,
    exp: i64,
}

pub fn token(subject: &str, role: &str) -> String {
    let claims = Claims {
        sub: subject,
        role,
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).expect("encode token")
}

pub fn bearer(subject: &str, role: &str) -> String {
    format!("Bearer {}", token(subject, role))
}

/// Serves the API for `harness` on an ephemeral port; returns the base URL.
pub async fn spawn_server(harness: &Harness) -> String {
    let state = AppState {
        engine: Arc::clone(&harness.engine),
        auth: Arc::new(JwtAuthenticator::new(JWT_SECRET)),
        submit_deadline: Duration::from_secs(10),
    };
    let app = routes::router(state, 10 * 1024 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    format!("http://{addr}")
}
