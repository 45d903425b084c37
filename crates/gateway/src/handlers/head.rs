//! HEAD: metadata probe reporting decrypted sizes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
};

use common::LogicalBucket;

use super::{content_type_for_key, normalize_etag};

/// Walk the bindings in order and answer from the first that has the object.
///
/// Ciphertext and plaintext sizes differ, so for encrypted bindings the
/// object is fetched and decrypted just to measure it. That cost is paid on
/// every metadata probe; callers are expected to lean on the
/// `Cache-Control` answer.
pub async fn handle(bucket: &Arc<LogicalBucket>, key: &str) -> Response {
    let mut errors: Vec<String> = Vec::new();
    let mut not_found = 0usize;

    for binding in &bucket.bindings {
        let info = match binding.client.head(&binding.bucket, key).await {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!(backend = %binding.bucket, key, error = %err, "HEAD attempt failed");
                if err.is_not_found() {
                    not_found += 1;
                }
                errors.push(format!("backend {}: {err}", binding.bucket));
                continue;
            }
        };

        // Decrypted length: plaintext bindings report the stored size,
        // encrypted bindings must fetch and decrypt to measure.
        let (length, backend_content_type) = match &binding.pipeline {
            None => (info.size, info.content_type.clone()),
            Some(pipeline) => {
                let fetched = match binding.client.get(&binding.bucket, key, None).await {
                    Ok(fetched) => fetched,
                    Err(err) => {
                        if err.is_not_found() {
                            not_found += 1;
                        }
                        errors.push(format!("backend {}: {err}", binding.bucket));
                        continue;
                    }
                };
                match pipeline.decrypt(&fetched.bytes) {
                    Ok(plaintext) => (plaintext.len() as u64, fetched.info.content_type),
                    Err(err) => {
                        tracing::warn!(backend = %binding.bucket, key, error = %err, "decryption failed");
                        errors.push(format!(
                            "backend {}: decryption error: {err}",
                            binding.bucket
                        ));
                        continue;
                    }
                }
            }
        };

        let content_type = backend_content_type
            .unwrap_or_else(|| content_type_for_key(key).to_string());
        let last_modified = info
            .last_modified
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, length.to_string())
            .header(LAST_MODIFIED, last_modified)
            .header(ACCEPT_RANGES, "bytes")
            .header(CACHE_CONTROL, "max-age=3600");
        if let Some(tag) = &info.e_tag {
            builder = builder.header(ETAG, normalize_etag(tag));
        }

        match builder.body(Body::empty()) {
            Ok(response) => return response,
            Err(err) => {
                errors.push(format!("backend {}: response build: {err}", binding.bucket));
                continue;
            }
        }
    }

    let summary = format!(
        "failed to head object on all backends: {}\n",
        errors.join("; ")
    );
    let status = if not_found == bucket.bindings.len() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_GATEWAY
    };
    tracing::warn!(bucket = %bucket.name, key, %status, "HEAD failed on every backend");
    (status, summary).into_response()
}
