use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BlobArea, BlobError, BlobRef, BlobStore};

/// In-process blob store used by tests and single-node development runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobRef, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, area: BlobArea, data: &[u8], content_type: &str) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::generate(area, content_type);
        self.blobs.write().await.insert(blob.clone(), data.to_vec());
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(blob)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(blob.to_string()))
    }
}
