//! The replication engine: per-method fan-out/collect over a logical
//! bucket's backend bindings.
//!
//! PUT and DELETE fan out one concurrent task per binding and reduce the
//! joined outcomes; GET and HEAD walk the bindings sequentially in config
//! order so the primary serves the common case. Tasks never panic across
//! the join: every outcome is collected and fed to the method's reducer.

pub mod delete;
pub mod get;
pub mod head;
pub mod put;

use std::collections::HashMap;

use http::HeaderMap;

/// Derive a content type from the key suffix when the backend has none.
pub(crate) fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

/// Normalise an ETag to the quoted form clients expect.
pub(crate) fn normalize_etag(tag: &str) -> String {
    format!("\"{}\"", tag.trim_matches('"'))
}

/// Collect `x-amz-meta-*` headers into a user-metadata map (names without
/// the prefix, multiple values joined with commas).
pub(crate) fn metadata_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        if let Some(meta_key) = name.strip_prefix("x-amz-meta-") {
            if let Ok(value) = value.to_str() {
                metadata
                    .entry(meta_key.to_string())
                    .and_modify(|existing| {
                        existing.push(',');
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }
    }
    metadata
}
