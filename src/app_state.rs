use std::sync::Arc;
use std::time::Duration;

use crate::services::auth::Authenticator;
use crate::services::engine::JobEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobEngine>,
    pub auth: Arc<dyn Authenticator>,
    /// Deadline applied to each submission request.
    pub submit_deadline: Duration,
}

impl AppState {
    pub fn new(engine: JobEngine, auth: Arc<dyn Authenticator>, submit_deadline: Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            auth,
            submit_deadline,
        }
    }
}
