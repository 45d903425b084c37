//! PUT: replicate one object to every binding.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::join_all;
use http::header::CONTENT_TYPE;

use common::store::PutOpts;
use common::LogicalBucket;

use super::metadata_headers;

enum Outcome {
    Success(String),
    Error(String),
}

/// Read the whole body, then upload (encrypting per binding) to every
/// backend concurrently.
///
/// Replies `200` as soon as at least one binding holds the object, even on
/// partial failure: s3fs treats any non-200 (including `206`) as an
/// incomplete upload and spirals into retry loops with zero-size files.
/// Only a full miss is an error (`502`).
pub async fn handle(bucket: &Arc<LogicalBucket>, key: &str, req: Request<Body>) -> Response {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let metadata = metadata_headers(req.headers());

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, key, "failed to read request body");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error reading request body: {err}\n"),
            )
                .into_response();
        }
    };

    tracing::debug!(bucket = %bucket.name, key, bytes = body.len(), "starting PUT fan-out");

    let tasks = bucket.bindings.iter().map(|binding| {
        let body = body.clone();
        let content_type = content_type.clone();
        let metadata = metadata.clone();
        async move {
            let payload = match &binding.pipeline {
                Some(pipeline) => match pipeline.encrypt(&body) {
                    Ok(sealed) => Bytes::from(sealed),
                    Err(err) => {
                        tracing::warn!(backend = %binding.bucket, error = %err, "encryption failed");
                        return Outcome::Error(format!(
                            "backend {}: encryption error: {err}",
                            binding.bucket
                        ));
                    }
                },
                None => body,
            };

            let opts = PutOpts {
                content_type,
                metadata,
            };
            match binding.client.put(&binding.bucket, key, payload, opts).await {
                Ok(()) => {
                    tracing::debug!(backend = %binding.bucket, key, "upload succeeded");
                    Outcome::Success(binding.describe())
                }
                Err(err) => {
                    tracing::warn!(backend = %binding.bucket, key, error = %err, "upload failed");
                    Outcome::Error(format!("backend {}: {err}", binding.bucket))
                }
            }
        }
    });

    let outcomes = join_all(tasks).await;

    let successful: Vec<&String> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Outcome::Success(target) => Some(target),
            Outcome::Error(_) => None,
        })
        .collect();

    if successful.is_empty() {
        tracing::error!(bucket = %bucket.name, key, "PUT failed on every backend");
        return (StatusCode::BAD_GATEWAY, "all backends failed\n").into_response();
    }

    if successful.len() < bucket.bindings.len() {
        tracing::warn!(
            bucket = %bucket.name,
            key,
            succeeded = successful.len(),
            total = bucket.bindings.len(),
            backends = ?successful,
            "PUT partially successful"
        );
    } else {
        tracing::info!(bucket = %bucket.name, key, backends = ?successful, "PUT replicated to all backends");
    }

    StatusCode::OK.into_response()
}
