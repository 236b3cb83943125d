use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::identity::Identity;

/// The authenticated caller, resolved from the `Authorization` header.
pub struct Caller(pub Identity);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let identity = state
            .auth
            .resolve(credential)
            .await
            .map_err(|_| ApiError::Unauthorized)?;
        Ok(Caller(identity))
    }
}
