//! Backend error categorisation.
//!
//! Storage providers disagree on error shapes, so errors are reduced to the
//! four categories the replication policy and the filesystem errno mapping
//! care about. Categorisation uses the typed error code when the SDK exposes
//! one and falls back to matching the rendered message.

/// The categories the rest of the system dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Missing key or bucket (`NoSuchKey`, `NoSuchBucket`, 404).
    NotFound,
    /// Credential or signature rejection.
    Auth,
    /// Bucket-exists conflicts.
    Exists,
    /// Everything else, including transport failures.
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

const NOT_FOUND_PATTERNS: &[&str] = &["NoSuchKey", "NoSuchBucket", "NotFound", "404"];
const AUTH_PATTERNS: &[&str] = &[
    "AccessDenied",
    "Forbidden",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];
const EXISTS_PATTERNS: &[&str] = &["BucketAlreadyExists", "BucketAlreadyOwnedByYou"];

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }

    /// Categorise from an optional provider error code plus the rendered
    /// message.
    pub fn classify(code: Option<&str>, message: String) -> Self {
        let kind = Self::kind_of(code, &message);
        Self { kind, message }
    }

    fn kind_of(code: Option<&str>, message: &str) -> BackendErrorKind {
        let matches = |patterns: &[&str]| {
            patterns.iter().any(|p| {
                code.is_some_and(|c| c.contains(p)) || message.contains(p)
            })
        };
        if matches(NOT_FOUND_PATTERNS) {
            BackendErrorKind::NotFound
        } else if matches(AUTH_PATTERNS) {
            BackendErrorKind::Auth
        } else if matches(EXISTS_PATTERNS) {
            BackendErrorKind::Exists
        } else {
            BackendErrorKind::Other
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }
}
