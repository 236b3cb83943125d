//! Blob storage for original and processed artifacts.
//!
//! References are opaque `<area>/<uuid>.<ext>` strings generated without
//! any shared counter, so concurrent writers never coordinate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

pub mod fs;
pub mod memory;
pub mod r2;
pub mod sealed;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use r2::R2BlobStore;
pub use sealed::SealedBlobStore;

/// Logical partition of the blob area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlobArea {
    Originals,
    Processed,
}

/// Opaque handle to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// A fresh, collision-free reference in `area`.
    pub fn generate(area: BlobArea, content_type: &str) -> Self {
        Self(format!(
            "{}/{}.{}",
            <&'static str>::from(area),
            Uuid::new_v4().simple(),
            extension_for(content_type)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into `(area, file name)`, rejecting anything that could escape
    /// the area directory.
    pub fn parts(&self) -> Result<(BlobArea, &str), BlobError> {
        let (area, name) = self
            .0
            .split_once('/')
            .ok_or_else(|| BlobError::InvalidRef(self.0.clone()))?;
        let area: BlobArea = area
            .parse()
            .map_err(|_| BlobError::InvalidRef(self.0.clone()))?;

        let valid_name = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        if !valid_name {
            return Err(BlobError::InvalidRef(self.0.clone()));
        }
        Ok((area, name))
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "bin",
    }
}

/// Durable byte storage keyed by generated references.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, area: BlobArea, data: &[u8], content_type: &str) -> Result<BlobRef, BlobError>;

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;

    /// Connectivity probe for health checks.
    async fn health_check(&self) -> Result<(), BlobError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("blob encryption failed: {0}")]
    Crypto(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_refs_are_unique_and_parse() {
        let a = BlobRef::generate(BlobArea::Originals, "image/png");
        let b = BlobRef::generate(BlobArea::Originals, "image/png");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("originals/"));
        assert!(a.as_str().ends_with(".png"));

        let (area, _) = a.parts().unwrap();
        assert_eq!(area, BlobArea::Originals);
    }

    #[test]
    fn test_extension_ignores_parameters() {
        let blob = BlobRef::generate(BlobArea::Processed, "image/jpeg; charset=binary");
        assert!(blob.as_str().ends_with(".jpg"));
        let blob = BlobRef::generate(BlobArea::Processed, "application/octet-stream");
        assert!(blob.as_str().ends_with(".bin"));
    }

    #[test]
    fn test_traversal_refs_rejected() {
        for bad in ["originals/../secret", "originals/", "etc/passwd", "processed/a/b", "noslash"] {
            assert!(BlobRef::new(bad).parts().is_err(), "{bad} should be rejected");
        }
    }
}
