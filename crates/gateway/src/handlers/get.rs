//! GET: first-success read through the bindings in config order.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};

use common::LogicalBucket;

/// Try each binding in order; serve the first object that fetches and
/// decrypts cleanly.
///
/// When every binding fails, the status is `404` only if every failure was
/// a not-found; decrypt failures and transport errors make it `502`.
pub async fn handle(bucket: &Arc<LogicalBucket>, key: &str) -> Response {
    let mut errors: Vec<String> = Vec::new();
    let mut not_found = 0usize;

    for binding in &bucket.bindings {
        let fetched = match binding.client.get(&binding.bucket, key, None).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::debug!(backend = %binding.bucket, key, error = %err, "GET attempt failed");
                if err.is_not_found() {
                    not_found += 1;
                }
                errors.push(format!("backend {}: {err}", binding.bucket));
                continue;
            }
        };

        let data = match &binding.pipeline {
            Some(pipeline) => match pipeline.decrypt(&fetched.bytes) {
                Ok(plaintext) => Bytes::from(plaintext),
                Err(err) => {
                    tracing::warn!(backend = %binding.bucket, key, error = %err, "decryption failed");
                    errors.push(format!(
                        "backend {}: decryption error: {err}",
                        binding.bucket
                    ));
                    continue;
                }
            },
            None => fetched.bytes,
        };

        tracing::debug!(backend = %binding.bucket, key, bytes = data.len(), "GET served");
        return (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "application/octet-stream".to_string()),
                (CONTENT_LENGTH, data.len().to_string()),
            ],
            data,
        )
            .into_response();
    }

    let summary = format!(
        "failed to get object from all backends: {}\n",
        errors.join("; ")
    );
    let status = if not_found == bucket.bindings.len() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_GATEWAY
    };
    tracing::warn!(bucket = %bucket.name, key, %status, "GET failed on every backend");
    (status, summary).into_response()
}
