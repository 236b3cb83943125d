use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use super::{BlobArea, BlobError, BlobRef, BlobStore};

/// Blob store on Cloudflare R2 (S3-compatible). Object keys are the refs.
pub struct R2BlobStore {
    bucket: Box<Bucket>,
}

impl R2BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, BlobError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| BlobError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| BlobError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for R2BlobStore {
    async fn put(&self, area: BlobArea, data: &[u8], content_type: &str) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::generate(area, content_type);
        self.bucket
            .put_object_with_content_type(blob.as_str(), data, content_type)
            .await?;
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        blob.parts()?;
        let response = self.bucket.get_object(blob.as_str()).await.map_err(|e| match e {
            s3::error::S3Error::HttpFailWithBody(404, _) => BlobError::NotFound(blob.to_string()),
            other => BlobError::S3(other),
        })?;
        Ok(response.to_vec())
    }
}
