use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::models::identity::{Identity, Role};

/// Turns a caller credential into a resolved identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    role: String,
}

/// Verifies HS256 bearer tokens carrying `sub` and `role` claims.
///
/// Token issuance lives with the identity provider; this service only
/// verifies.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            AuthError::Unauthorized
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        let role: Role = data.claims.role.parse().map_err(|_| AuthError::Unauthorized)?;

        Ok(Identity {
            subject: data.claims.sub,
            role,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or missing credentials")]
    Unauthorized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        role: &'a str,
        exp: i64,
    }

    fn token(secret: &str, sub: &str, role: &str, exp_offset: i64) -> String {
        let claims = TestClaims {
            sub,
            role,
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_valid_token() {
        let auth = JwtAuthenticator::new("secret");
        let identity = auth
            .resolve(&format!("Bearer {}", token("secret", "admin", "admin", 600)))
            .await
            .unwrap();
        assert_eq!(identity, Identity::admin("admin"));
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret_expired_and_unknown_role() {
        let auth = JwtAuthenticator::new("secret");
        assert_eq!(
            auth.resolve(&token("other", "alice", "user", 600)).await,
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            auth.resolve(&token("secret", "alice", "user", -3600)).await,
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            auth.resolve(&token("secret", "alice", "superuser", 600)).await,
            Err(AuthError::Unauthorized)
        );
    }
}
