//! HTTP listener and request dispatch.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use percent_encoding::percent_decode_str;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;
use crate::{handlers, passthrough};

/// Build the gateway router.
///
/// `/healthz` answers without authentication; every other path goes through
/// the fallback dispatcher.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the shutdown channel fires.
pub async fn serve(
    listen_addr: &str,
    state: SharedState,
    mut shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Authenticate, split `/bucket/key`, and route by method.
///
/// Object-level requests on known buckets go to the replication engine;
/// everything else (unknown buckets, bucket-level listings, uncovered
/// methods) is proxied upstream.
async fn dispatch(State(state): State<SharedState>, req: Request<Body>) -> Response {
    tracing::debug!(method = %req.method(), uri = %req.uri(), "received request");

    if let Err(err) = state.auth.authenticate(req.headers()) {
        tracing::warn!(error = %err, uri = %req.uri(), "authentication failed");
        return (StatusCode::UNAUTHORIZED, format!("{err}\n")).into_response();
    }

    let path = percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let trimmed = path.trim_start_matches('/');
    let (bucket_name, key) = match trimmed.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (trimmed, ""),
    };

    let bucket = state.registry.get(bucket_name);

    if let Some(bucket) = &bucket {
        if !key.is_empty() {
            let method = req.method();
            if method == Method::PUT || method == Method::POST {
                return handlers::put::handle(bucket, key, req).await;
            } else if method == Method::GET {
                return handlers::get::handle(bucket, key).await;
            } else if method == Method::HEAD {
                return handlers::head::handle(bucket, key).await;
            } else if method == Method::DELETE {
                return handlers::delete::handle(bucket, key).await;
            }
        }
    }

    passthrough::handle(&state, bucket, req).await
}
