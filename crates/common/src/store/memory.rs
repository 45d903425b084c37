//! In-process backend for tests and local development.
//!
//! Mirrors the visible semantics of a real S3 endpoint closely enough for
//! the replication and filesystem logic: prefix/delimiter listings, ranged
//! reads, server-side copy, idempotent delete errors, and quoted ETags.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::{BackendError, FetchedObject, Listing, ObjectBackend, ObjectInfo, PutOpts};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
    e_tag: String,
}

/// In-memory object store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes (ciphertext for encrypted bindings), for assertions.
    pub fn raw(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.bytes.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Stored user metadata, for assertions on forwarded `x-amz-meta-*`.
    pub fn stored_metadata(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    fn info(&self, key: &str, obj: &StoredObject) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: obj.bytes.len() as u64,
            last_modified: obj.last_modified,
            e_tag: Some(obj.e_tag.clone()),
            content_type: obj.content_type.clone(),
        }
    }
}

fn quoted_etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", &hex::encode(digest)[..32])
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOpts,
    ) -> Result<(), BackendError> {
        let e_tag = quoted_etag(&body);
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: body,
                content_type: opts.content_type,
                metadata: opts.metadata,
                last_modified: Utc::now(),
                e_tag,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<FetchedObject, BackendError> {
        let entry = self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| BackendError::not_found(format!("get {bucket}/{key}: NoSuchKey")))?;

        let bytes = match range {
            Some(r) => {
                let len = entry.bytes.len() as u64;
                let start = r.start.min(len);
                let end = r.end.min(len);
                entry.bytes.slice(start as usize..end as usize)
            }
            None => entry.bytes.clone(),
        };

        let mut info = self.info(key, &entry);
        info.size = bytes.len() as u64;
        Ok(FetchedObject { bytes, info })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BackendError> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| self.info(key, &o))
            .ok_or_else(|| BackendError::not_found(format!("head {bucket}/{key}: NotFound")))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        // Real S3 deletes are idempotent: deleting a missing key succeeds.
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), BackendError> {
        let source = self
            .objects
            .get(&(bucket.to_string(), from.to_string()))
            .map(|o| o.clone())
            .ok_or_else(|| BackendError::not_found(format!("copy {bucket}/{from}: NoSuchKey")))?;
        self.objects.insert(
            (bucket.to_string(), to.to_string()),
            StoredObject {
                last_modified: Utc::now(),
                ..source
            },
        );
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
    ) -> Result<Listing, BackendError> {
        let mut prefixes = BTreeSet::new();
        let mut keys: Vec<(String, StoredObject)> = Vec::new();

        for entry in self.objects.iter() {
            let (b, key) = entry.key();
            if b != bucket || !key.starts_with(prefix) {
                continue;
            }
            // Anything containing a further delimiter collapses into a
            // common prefix; the prefix object itself (rest == "") stays a
            // plain entry.
            let rest = &key[prefix.len()..];
            if delimited {
                if let Some(idx) = rest.find('/') {
                    prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
                    continue;
                }
            }
            keys.push((key.clone(), entry.value().clone()));
        }

        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Listing {
            common_prefixes: prefixes.into_iter().collect(),
            objects: keys
                .iter()
                .map(|(key, obj)| self.info(key, obj))
                .collect(),
        })
    }

    async fn list_probe(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Listing, BackendError> {
        let mut listing = self.list(bucket, prefix, false).await?;
        listing.objects.truncate(max_keys.max(0) as usize);
        Ok(listing)
    }

    async fn bucket_exists(&self, _bucket: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_head_delete() {
        let store = MemoryBackend::new();
        store
            .put("b", "k", Bytes::from_static(b"hello"), PutOpts::default())
            .await
            .unwrap();

        let fetched = store.get("b", "k", None).await.unwrap();
        assert_eq!(&fetched.bytes[..], b"hello");
        assert_eq!(fetched.info.size, 5);

        let info = store.head("b", "k").await.unwrap();
        assert_eq!(info.size, 5);
        assert!(info.e_tag.unwrap().starts_with('"'));

        store.delete("b", "k").await.unwrap();
        assert!(store.get("b", "k", None).await.unwrap_err().is_not_found());
        // Idempotent.
        store.delete("b", "k").await.unwrap();
    }

    #[tokio::test]
    async fn ranged_get() {
        let store = MemoryBackend::new();
        store
            .put("b", "k", Bytes::from_static(b"0123456789"), PutOpts::default())
            .await
            .unwrap();

        let window = store.get("b", "k", Some(2..5)).await.unwrap();
        assert_eq!(&window.bytes[..], b"234");

        let past_end = store.get("b", "k", Some(8..20)).await.unwrap();
        assert_eq!(&past_end.bytes[..], b"89");
    }

    #[tokio::test]
    async fn delimited_listing_groups_prefixes() {
        let store = MemoryBackend::new();
        for key in ["a.txt", "dir/", "dir/one.txt", "dir/sub/two.txt", "zeta"] {
            store
                .put("b", key, Bytes::new(), PutOpts::default())
                .await
                .unwrap();
        }

        let root = store.list("b", "", true).await.unwrap();
        assert_eq!(root.common_prefixes, vec!["dir/".to_string()]);
        let keys: Vec<_> = root.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "zeta"]);

        let dir = store.list("b", "dir/", true).await.unwrap();
        assert_eq!(dir.common_prefixes, vec!["dir/sub/".to_string()]);
        let keys: Vec<_> = dir.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["dir/", "dir/one.txt"]);
    }

    #[tokio::test]
    async fn copy_then_delete_is_rename() {
        let store = MemoryBackend::new();
        store
            .put("b", "old", Bytes::from_static(b"data"), PutOpts::default())
            .await
            .unwrap();
        store.copy("b", "old", "new").await.unwrap();
        store.delete("b", "old").await.unwrap();

        assert!(!store.contains("b", "old"));
        assert_eq!(&store.get("b", "new", None).await.unwrap().bytes[..], b"data");
    }
}
