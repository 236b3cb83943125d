use std::time::Duration;

use serde::Deserialize;

use crate::models::fetch::RemoteSources;
use crate::services::fetcher::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    pub database_url: Option<String>,

    /// Directory for the filesystem blob store, used when R2 is not configured
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// AES-256-GCM key for blobs at rest (base64-encoded, 32 bytes)
    pub encryption_key: Option<String>,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,

    #[serde(default = "default_fetch_base_delay_ms")]
    pub fetch_base_delay_ms: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Ceiling for a single transform
    #[serde(default = "default_transform_timeout_secs")]
    pub transform_timeout_secs: u64,

    /// Per-request deadline for submissions
    #[serde(default = "default_submit_deadline_secs")]
    pub submit_deadline_secs: u64,

    #[serde(default = "default_picsum_base_url")]
    pub picsum_base_url: String,

    #[serde(default = "default_qrserver_base_url")]
    pub qrserver_base_url: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// R2 credentials, present only when every field is set.
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_fetch_base_delay_ms() -> u64 {
    600
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_transform_timeout_secs() -> u64 {
    30
}

fn default_submit_deadline_secs() -> u64 {
    60
}

fn default_picsum_base_url() -> String {
    RemoteSources::default().picsum_base_url
}

fn default_qrserver_base_url() -> String {
    RemoteSources::default().qrserver_base_url
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            base_delay: Duration::from_millis(self.fetch_base_delay_ms),
            request_timeout: Duration::from_secs(self.fetch_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn remote_sources(&self) -> RemoteSources {
        RemoteSources {
            picsum_base_url: self.picsum_base_url.clone(),
            qrserver_base_url: self.qrserver_base_url.clone(),
        }
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }

    pub fn submit_deadline(&self) -> Duration {
        Duration::from_secs(self.submit_deadline_secs)
    }

    pub fn r2(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        envy::from_iter(pairs.iter().map(|(k, v)| (k.to_uppercase(), v.to_string()))).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[("jwt_secret", "s3cret")]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.database_url.is_none());
        assert!(config.r2().is_none());

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(600));
        assert_eq!(config.transform_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_r2_requires_every_field() {
        let partial = from_pairs(&[("jwt_secret", "s"), ("r2_bucket", "b"), ("r2_endpoint", "https://r2")]);
        assert!(partial.r2().is_none());

        let full = from_pairs(&[
            ("jwt_secret", "s"),
            ("r2_bucket", "b"),
            ("r2_endpoint", "https://r2"),
            ("r2_access_key", "ak"),
            ("r2_secret_key", "sk"),
        ]);
        assert_eq!(full.r2().map(|r| r.bucket), Some("b"));
    }

    #[test]
    fn test_missing_jwt_secret_is_an_error() {
        let result: Result<AppConfig, _> = envy::from_iter(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }
}
