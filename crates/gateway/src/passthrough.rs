//! Passthrough proxy for bucket-level and unmatched requests.
//!
//! The request is rewritten to the primary binding's endpoint and physical
//! bucket name, stripped of proxy-injected headers, re-signed with the
//! binding's credentials, and forwarded as-is. Only object-level PUT/GET/
//! HEAD/DELETE go through the replication engine; everything else (bucket
//! listings, location probes, unknown buckets) lands here.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use url::Url;

use common::LogicalBucket;

use crate::sign::{payload_hash, RequestSigner};
use crate::state::GatewayState;

/// Headers injected by fronting proxies that must not reach the upstream
/// signature computation.
const STRIP_HEADERS: &[&str] = &[
    "x-real-ip",
    "x-forwarded-scheme",
    "x-forwarded-proto",
    "x-scheme",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-for",
];

pub async fn handle(
    state: &GatewayState,
    bucket: Option<Arc<LogicalBucket>>,
    req: Request<Body>,
) -> Response {
    let bucket = match bucket.or_else(|| state.registry.any()) {
        Some(bucket) => bucket,
        None => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "no backend configured\n")
                .into_response()
        }
    };
    let binding = bucket.primary();

    let mut url = match Url::parse(binding.client.endpoint()) {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(endpoint = %binding.client.endpoint(), error = %err, "bad endpoint URL");
            return (StatusCode::BAD_GATEWAY, format!("bad endpoint: {err}\n")).into_response();
        }
    };
    url.set_path(&req.uri().path().replacen(&bucket.name, &binding.bucket, 1));
    url.set_query(req.uri().query());

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => {
            return (StatusCode::BAD_GATEWAY, "endpoint has no host\n").into_response();
        }
    };

    tracing::debug!(method = %req.method(), upstream = %url, "proxying request");

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    for name in STRIP_HEADERS {
        headers.remove(*name);
    }
    // Replaced below with freshly signed values.
    headers.remove(AUTHORIZATION);
    headers.remove(HOST);
    headers.remove("x-amz-date");
    let incoming_hash = headers
        .get("x-amz-content-sha256")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    headers.remove("x-amz-content-sha256");
    headers.remove(http::header::CONTENT_LENGTH);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error reading request body: {err}\n"),
            )
                .into_response()
        }
    };

    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let content_hash = incoming_hash.unwrap_or_else(|| payload_hash(&body));

    let signer = RequestSigner::new(
        binding.client.access_key(),
        binding.client.secret_key(),
        binding.client.region(),
    );
    let signed_headers = vec![
        ("host".to_string(), host),
        ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    let authorization =
        signer.authorization(method.as_str(), &url, &signed_headers, &content_hash, now);

    let upstream = state
        .http
        .request(method, url)
        .headers(headers)
        .header("x-amz-date", amz_date)
        .header("x-amz-content-sha256", content_hash)
        .header(AUTHORIZATION, authorization)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(error = %err, "proxy request failed");
            return (StatusCode::BAD_GATEWAY, format!("proxy error: {err}\n")).into_response();
        }
    };

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::BAD_GATEWAY,
                format!("error reading upstream response: {err}\n"),
            )
                .into_response()
        }
    };

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|err| {
            (
                StatusCode::BAD_GATEWAY,
                format!("error building response: {err}\n"),
            )
                .into_response()
        })
}
