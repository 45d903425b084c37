//! DELETE: idempotent fan-out removal.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::future::join_all;

use common::LogicalBucket;

enum Outcome {
    Removed,
    AlreadyGone,
    Error(String),
}

/// Delete the object from every binding concurrently.
///
/// A not-found answer counts as success: the object is already absent from
/// that binding, and a repeated DELETE must stay `204`.
pub async fn handle(bucket: &Arc<LogicalBucket>, key: &str) -> Response {
    let tasks = bucket.bindings.iter().map(|binding| async move {
        match binding.client.delete(&binding.bucket, key).await {
            Ok(()) => {
                tracing::debug!(backend = %binding.bucket, key, "delete succeeded");
                Outcome::Removed
            }
            Err(err) if err.is_not_found() => {
                tracing::debug!(backend = %binding.bucket, key, "object already absent");
                Outcome::AlreadyGone
            }
            Err(err) => {
                tracing::warn!(backend = %binding.bucket, key, error = %err, "delete failed");
                Outcome::Error(format!("backend {}: {err}", binding.bucket))
            }
        }
    });

    let outcomes = join_all(tasks).await;

    let mut successes = 0usize;
    let mut real_errors: Vec<String> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Removed | Outcome::AlreadyGone => successes += 1,
            Outcome::Error(message) => real_errors.push(message),
        }
    }

    if successes >= 1 || real_errors.is_empty() {
        tracing::info!(bucket = %bucket.name, key, "DELETE completed");
        return StatusCode::NO_CONTENT.into_response();
    }

    let first = real_errors.remove(0);
    tracing::error!(bucket = %bucket.name, key, error = %first, "DELETE failed on every backend");
    (StatusCode::BAD_GATEWAY, format!("{first}\n")).into_response()
}
