use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_jobs::app_state::AppState;
use image_jobs::config::AppConfig;
use image_jobs::db::{self, JobStore, MemoryJobStore, PgJobStore};
use image_jobs::routes;
use image_jobs::services::auth::JwtAuthenticator;
use image_jobs::services::engine::JobEngine;
use image_jobs::services::fetcher::RetryingFetcher;
use image_jobs::services::storage::{BlobStore, FsBlobStore, R2BlobStore, SealedBlobStore};
use image_jobs::services::transform::ImageTransform;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-jobs server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("image_jobs_submitted_total", "Image jobs accepted for processing");
    metrics::describe_counter!("image_jobs_completed_total", "Image jobs that reached done");
    metrics::describe_counter!("image_jobs_failed_total", "Image jobs that reached error");
    metrics::describe_counter!("fetch_attempts_total", "Outbound fetch attempts by outcome");
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Time from submission to a terminal state"
    );

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(url).await.expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; jobs are kept in memory");
            Arc::new(MemoryJobStore::new())
        }
    };

    let blobs: Arc<dyn BlobStore> = match config.r2() {
        Some(r2) => {
            tracing::info!(bucket = r2.bucket, "Initializing R2 blob store");
            Arc::new(
                R2BlobStore::new(r2.bucket, r2.endpoint, r2.access_key, r2.secret_key)
                    .expect("Failed to initialize R2 client"),
            )
        }
        None => {
            tracing::info!(dir = %config.data_dir, "Initializing filesystem blob store");
            Arc::new(
                FsBlobStore::new(&config.data_dir)
                    .await
                    .expect("Failed to prepare data directory"),
            )
        }
    };

    let blobs: Arc<dyn BlobStore> = match &config.encryption_key {
        Some(key) => {
            tracing::info!("Enabling AES-256-GCM encryption at rest");
            Arc::new(SealedBlobStore::new(blobs, key).expect("Failed to initialize encryption"))
        }
        None => blobs,
    };

    let fetcher = RetryingFetcher::new(config.retry_policy()).expect("Failed to build HTTP client");
    let engine = JobEngine::new(store, blobs, Arc::new(ImageTransform), fetcher)
        .with_sources(config.remote_sources())
        .with_transform_timeout(config.transform_timeout());

    let auth = Arc::new(JwtAuthenticator::new(&config.jwt_secret));
    let state = AppState::new(engine, auth, config.submit_deadline());

    let app = routes::router(state, config.max_upload_bytes)
        .route(
            "/metrics",
            get(routes::metrics::render).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes + 64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
