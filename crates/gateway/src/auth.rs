//! Access-key authentication for incoming requests.
//!
//! Only the access-key identity inside the `Credential=` parameter is
//! checked against the configured allow-list; the v4 signature itself is not
//! verified here. Upstream requests are re-signed with per-backend
//! credentials, so client signatures never travel further than this check.

use std::collections::HashSet;

use http::header::AUTHORIZATION;
use http::HeaderMap;

use common::config::AuthConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("no authorization header format configured")]
    NoSchemeConfigured,
    #[error("invalid Authorization header format, expected {0}")]
    SchemeMismatch(String),
    #[error("invalid credential format")]
    MalformedCredential,
    #[error("invalid access key")]
    UnknownAccessKey,
}

/// Validates `Authorization: <scheme> Credential=<ACCESSKEY>/...` headers.
#[derive(Debug)]
pub struct Authenticator {
    scheme: String,
    keys: HashSet<String>,
}

impl Authenticator {
    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self {
            scheme: cfg.header_format.resolve(),
            keys: cfg
                .users
                .iter()
                .map(|user| user.access_key.resolve())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }

    /// Check the request headers, returning the validated access key.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingHeader)?;

        if self.scheme.is_empty() {
            return Err(AuthError::NoSchemeConfigured);
        }

        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();
        if scheme != self.scheme || rest.is_empty() {
            return Err(AuthError::SchemeMismatch(self.scheme.clone()));
        }

        // rest looks like `Credential=<KEY>/<date>/<region>/<service>/..., ...`
        let credential = rest
            .split(',')
            .map(str::trim)
            .find_map(|param| param.strip_prefix("Credential="))
            .ok_or(AuthError::MalformedCredential)?;

        let access_key = credential
            .split('/')
            .next()
            .filter(|key| !key.is_empty())
            .ok_or(AuthError::MalformedCredential)?;

        if !self.keys.contains(access_key) {
            return Err(AuthError::UnknownAccessKey);
        }

        Ok(access_key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{MultiSourceString, UserConfig};
    use http::HeaderValue;

    fn authenticator() -> Authenticator {
        Authenticator::from_config(&AuthConfig {
            header_format: MultiSourceString::inline("AWS4-HMAC-SHA256"),
            users: vec![
                UserConfig {
                    access_key: MultiSourceString::inline("K1"),
                },
                UserConfig {
                    access_key: MultiSourceString::inline("K2"),
                },
            ],
        })
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_known_access_key() {
        let auth = authenticator();
        let headers = headers_with(
            "AWS4-HMAC-SHA256 Credential=K1/20260101/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-date, Signature=deadbeef",
        );
        assert_eq!(auth.authenticate(&headers).unwrap(), "K1");
    }

    #[test]
    fn rejects_missing_header() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn rejects_wrong_scheme() {
        let auth = authenticator();
        let headers = headers_with("Bearer sometoken");
        assert!(matches!(
            auth.authenticate(&headers),
            Err(AuthError::SchemeMismatch(_))
        ));
    }

    #[test]
    fn rejects_malformed_credential() {
        let auth = authenticator();
        let headers = headers_with("AWS4-HMAC-SHA256 SignedHeaders=host");
        assert_eq!(
            auth.authenticate(&headers),
            Err(AuthError::MalformedCredential)
        );
    }

    #[test]
    fn rejects_unknown_access_key() {
        let auth = authenticator();
        let headers =
            headers_with("AWS4-HMAC-SHA256 Credential=KX/20260101/us-east-1/s3/aws4_request");
        assert_eq!(auth.authenticate(&headers), Err(AuthError::UnknownAccessKey));
    }

    #[test]
    fn rejects_when_no_scheme_configured() {
        let auth = Authenticator::from_config(&AuthConfig::default());
        let headers = headers_with("AWS4-HMAC-SHA256 Credential=K1/x");
        assert_eq!(auth.authenticate(&headers), Err(AuthError::NoSchemeConfigured));
    }
}
