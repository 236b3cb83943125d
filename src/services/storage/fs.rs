use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::{BlobArea, BlobError, BlobRef, BlobStore};

/// Blob store rooted in a local directory, one sub-directory per area.
///
/// Writes go to a temporary sibling and are renamed into place, so a
/// reader never sees a partially written artifact.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        for area in [BlobArea::Originals, BlobArea::Processed] {
            tokio::fs::create_dir_all(root.join(<&'static str>::from(area))).await?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, blob: &BlobRef) -> Result<PathBuf, BlobError> {
        let (area, name) = blob.parts()?;
        Ok(self.root.join(<&'static str>::from(area)).join(name))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, area: BlobArea, data: &[u8], content_type: &str) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::generate(area, content_type);
        let path = self.path_of(&blob)?;
        let staging = path.with_file_name(format!(".{}.partial", Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&staging, data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        tokio::fs::rename(&staging, &path).await?;

        tracing::debug!(blob = %blob, bytes = data.len(), "Stored blob on disk");
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let path = self.path_of(blob)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(blob.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> Result<(), BlobError> {
        tokio::fs::metadata(&self.root).await?;
        Ok(())
    }
}
