use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;

use super::{BlobArea, BlobError, BlobRef, BlobStore};

const NONCE_LEN: usize = 12;

/// Encrypts artifacts at rest with AES-256-GCM before handing them to the
/// inner store. Stored layout is `nonce (12 bytes) || ciphertext`.
pub struct SealedBlobStore {
    inner: Arc<dyn BlobStore>,
    cipher: Aes256Gcm,
}

impl SealedBlobStore {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(inner: Arc<dyn BlobStore>, key_base64: &str) -> Result<Self, BlobError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_base64.trim())
            .map_err(|_| BlobError::Crypto("key is not valid base64"))?;
        if key.len() != 32 {
            return Err(BlobError::Crypto("key must be 32 bytes"));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| BlobError::Crypto("key rejected by cipher"))?;
        Ok(Self { inner, cipher })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, BlobError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| BlobError::Crypto("encrypt failed"))?;

        let mut sealed = nonce.to_vec();
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, BlobError> {
        if sealed.len() < NONCE_LEN {
            return Err(BlobError::Crypto("ciphertext truncated"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| BlobError::Crypto("decrypt failed"))
    }
}

#[async_trait]
impl BlobStore for SealedBlobStore {
    async fn put(&self, area: BlobArea, data: &[u8], content_type: &str) -> Result<BlobRef, BlobError> {
        let sealed = self.seal(data)?;
        self.inner.put(area, &sealed, content_type).await
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let sealed = self.inner.get(blob).await?;
        self.open(&sealed)
    }

    async fn health_check(&self) -> Result<(), BlobError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryBlobStore;

    fn key() -> String {
        base64::engine::general_purpose::STANDARD.encode([7u8; 32])
    }

    #[tokio::test]
    async fn test_stored_bytes_are_encrypted() {
        let inner = Arc::new(MemoryBlobStore::new());
        let sealed = SealedBlobStore::new(inner.clone(), &key()).unwrap();

        let blob = sealed.put(BlobArea::Originals, b"plain image", "image/png").await.unwrap();
        let raw = inner.get(&blob).await.unwrap();
        assert_ne!(raw, b"plain image");
        assert_eq!(raw.len(), NONCE_LEN + b"plain image".len() + 16);

        assert_eq!(sealed.get(&blob).await.unwrap(), b"plain image");
    }

    #[test]
    fn test_rejects_short_key() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        let result = SealedBlobStore::new(Arc::new(MemoryBlobStore::new()), &short);
        assert!(matches!(result, Err(BlobError::Crypto(_))));
    }
}
