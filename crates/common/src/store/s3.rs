//! S3-compatible backend over the AWS SDK.

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::S3ClientConfig;

use super::{BackendError, FetchedObject, Listing, ObjectBackend, ObjectInfo, PutOpts};

/// One S3-compatible endpoint with fixed credentials.
///
/// Addressing is forced to path style so MinIO-style endpoints work without
/// wildcard DNS. Plain-HTTP endpoints additionally relax request/response
/// checksum handling, which several non-AWS providers reject.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn connect(cfg: &S3ClientConfig) -> Self {
        let credentials = Credentials::new(
            cfg.access_key.resolve(),
            cfg.secret_key.resolve(),
            None,
            None,
            "strata-config",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true);

        if cfg.endpoint.starts_with("http://") {
            builder = builder
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .response_checksum_validation(ResponseChecksumValidation::WhenRequired);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn sdk_err<E, R>(context: String, err: SdkError<E, R>) -> BackendError
where
    SdkError<E, R>: std::error::Error + ProvideErrorMetadata,
{
    let code = err.code().map(str::to_string);
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    BackendError::classify(code.as_deref(), message)
}

fn to_utc(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    dt.and_then(|d| Utc.timestamp_opt(d.secs(), d.subsec_nanos()).single())
        .unwrap_or_else(Utc::now)
}

fn object_info(obj: &aws_sdk_s3::types::Object) -> ObjectInfo {
    ObjectInfo {
        key: obj.key().unwrap_or_default().to_string(),
        size: obj.size().unwrap_or_default().max(0) as u64,
        last_modified: to_utc(obj.last_modified()),
        e_tag: obj.e_tag().map(str::to_string),
        content_type: None,
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOpts,
    ) -> Result<(), BackendError> {
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(content_type) = opts.content_type {
            req = req.content_type(content_type);
        }
        if !opts.metadata.is_empty() {
            req = req.set_metadata(Some(opts.metadata));
        }
        req.send()
            .await
            .map_err(|err| sdk_err(format!("put {bucket}/{key}"), err))?;
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<FetchedObject, BackendError> {
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if let Some(r) = &range {
            if r.end > r.start {
                req = req.range(format!("bytes={}-{}", r.start, r.end - 1));
            }
        }
        let resp = req.send().await.map_err(|err| {
            if matches!(&err, SdkError::ServiceError(svc) if svc.err().is_no_such_key()) {
                BackendError::not_found(format!("get {bucket}/{key}: NoSuchKey"))
            } else {
                sdk_err(format!("get {bucket}/{key}"), err)
            }
        })?;

        let last_modified = to_utc(resp.last_modified());
        let e_tag = resp.e_tag().map(str::to_string);
        let content_type = resp.content_type().map(str::to_string);

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| BackendError::other(format!("read body {bucket}/{key}: {e}")))?
            .into_bytes();

        Ok(FetchedObject {
            info: ObjectInfo {
                key: key.to_string(),
                size: bytes.len() as u64,
                last_modified,
                e_tag,
                content_type,
            },
            bytes,
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BackendError> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if matches!(&err, SdkError::ServiceError(svc) if svc.err().is_not_found()) {
                    BackendError::not_found(format!("head {bucket}/{key}: NotFound"))
                } else {
                    sdk_err(format!("head {bucket}/{key}"), err)
                }
            })?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: resp.content_length().unwrap_or_default().max(0) as u64,
            last_modified: to_utc(resp.last_modified()),
            e_tag: resp.e_tag().map(str::to_string),
            content_type: resp.content_type().map(str::to_string),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| sdk_err(format!("delete {bucket}/{key}"), err))?;
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), BackendError> {
        self.client
            .copy_object()
            .bucket(bucket)
            .key(to)
            .copy_source(format!("{bucket}/{from}"))
            .send()
            .await
            .map_err(|err| sdk_err(format!("copy {bucket}/{from} -> {to}"), err))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
    ) -> Result<Listing, BackendError> {
        let mut listing = Listing::default();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .max_keys(1000);
            if delimited {
                req = req.delimiter("/");
            }
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|err| sdk_err(format!("list {bucket}/{prefix}"), err))?;

            for cp in resp.common_prefixes() {
                if let Some(p) = cp.prefix() {
                    listing.common_prefixes.push(p.to_string());
                }
            }
            for obj in resp.contents() {
                listing.objects.push(object_info(obj));
            }

            if resp.is_truncated() == Some(true) {
                continuation = resp.next_continuation_token().map(ToOwned::to_owned);
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(listing)
    }

    async fn list_probe(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Listing, BackendError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| sdk_err(format!("list {bucket}/{prefix}"), err))?;

        Ok(Listing {
            common_prefixes: Vec::new(),
            objects: resp.contents().iter().map(object_info).collect(),
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<(), BackendError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                if matches!(&err, SdkError::ServiceError(svc) if svc.err().is_not_found()) {
                    BackendError::not_found(format!("bucket {bucket}: NotFound"))
                } else {
                    sdk_err(format!("head bucket {bucket}"), err)
                }
            })?;
        Ok(())
    }
}
