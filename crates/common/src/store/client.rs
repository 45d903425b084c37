//! Backend client: one endpoint's storage plus the identity needed to
//! re-sign passthrough requests against it.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::S3ClientConfig;

use super::{
    BackendError, FetchedObject, Listing, MemoryBackend, ObjectBackend, ObjectInfo, PutOpts,
    S3Backend,
};

/// A shared handle to one configured backend endpoint.
///
/// The same client instance is shared by every binding that references its
/// config id; it is immutable after construction and safe to use from any
/// task.
#[derive(Debug, Clone)]
pub struct BackendClient {
    id: String,
    endpoint: String,
    region: String,
    access_key: String,
    secret_key: String,
    backend: Arc<dyn ObjectBackend>,
}

impl BackendClient {
    /// Build a client for a configured S3-compatible endpoint.
    pub fn connect(cfg: &S3ClientConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone(),
            access_key: cfg.access_key.resolve(),
            secret_key: cfg.secret_key.resolve(),
            backend: Arc::new(S3Backend::connect(cfg)),
        }
    }

    /// Wrap an arbitrary backend implementation (tests inject
    /// [`MemoryBackend`] or failure doubles here).
    pub fn from_backend(id: impl Into<String>, backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            id: id.into(),
            endpoint: "http://memory.invalid".to_string(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            backend,
        }
    }

    /// Convenience constructor for an in-memory client.
    pub fn in_memory(id: impl Into<String>) -> (Self, Arc<MemoryBackend>) {
        let store = Arc::new(MemoryBackend::new());
        (Self::from_backend(id, store.clone()), store)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOpts,
    ) -> Result<(), BackendError> {
        self.backend.put(bucket, key, body, opts).await
    }

    pub async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<FetchedObject, BackendError> {
        self.backend.get(bucket, key, range).await
    }

    pub async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BackendError> {
        self.backend.head(bucket, key).await
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        self.backend.delete(bucket, key).await
    }

    pub async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), BackendError> {
        self.backend.copy(bucket, from, to).await
    }

    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
    ) -> Result<Listing, BackendError> {
        self.backend.list(bucket, prefix, delimited).await
    }

    pub async fn list_probe(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Listing, BackendError> {
        self.backend.list_probe(bucket, prefix, max_keys).await
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<(), BackendError> {
        self.backend.bucket_exists(bucket).await
    }
}
