//! Object-storage backends.
//!
//! The gateway and the filesystem adapter both talk to storage through the
//! [`ObjectBackend`] trait. Production traffic goes through [`S3Backend`]
//! (one S3-compatible endpoint with fixed credentials); tests inject
//! [`MemoryBackend`] through [`BackendClient::from_backend`].

pub mod client;
pub mod error;
pub mod memory;
pub mod s3;

use std::collections::HashMap;
use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use client::BackendClient;
pub use error::{BackendError, BackendErrorKind};
pub use memory::MemoryBackend;
pub use s3::S3Backend;

/// Options forwarded with an upload.
#[derive(Debug, Clone, Default)]
pub struct PutOpts {
    pub content_type: Option<String>,
    /// User metadata (the `x-amz-meta-*` headers, names without the prefix).
    pub metadata: HashMap<String, String>,
}

/// Metadata for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    /// Stored (possibly ciphertext) size in bytes.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
}

/// A fetched object body plus its metadata.
///
/// For ranged reads, `info.size` is the length of the returned window.
#[derive(Debug)]
pub struct FetchedObject {
    pub bytes: Bytes,
    pub info: ObjectInfo,
}

/// One page or full result of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectInfo>,
}

/// The storage operations the gateway and filesystem need.
///
/// Implementations are shared behind `Arc` and must be safe for concurrent
/// calls. The physical bucket is a per-call parameter because several
/// bindings can share one endpoint with different buckets.
#[async_trait]
pub trait ObjectBackend: std::fmt::Debug + Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOpts,
    ) -> Result<(), BackendError>;

    /// Fetch an object, optionally restricted to a half-open byte range.
    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<FetchedObject, BackendError>;

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BackendError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError>;

    /// Server-side copy within the same bucket.
    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), BackendError>;

    /// Full listing under a prefix, paginating internally in 1000-item
    /// chunks. With `delimited`, entries below the next `/` collapse into
    /// common prefixes.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
    ) -> Result<Listing, BackendError>;

    /// Single-page probe under a prefix, capped at `max_keys` entries.
    async fn list_probe(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Listing, BackendError>;

    /// Check that a bucket exists and is accessible.
    async fn bucket_exists(&self, bucket: &str) -> Result<(), BackendError>;
}
