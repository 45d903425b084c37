//! Backend error to errno mapping.

use common::{BackendError, BackendErrorKind};

/// Map a categorised backend error onto the errno the kernel expects.
pub fn errno_for(err: &BackendError) -> libc::c_int {
    match err.kind {
        BackendErrorKind::NotFound => libc::ENOENT,
        BackendErrorKind::Auth => libc::EACCES,
        BackendErrorKind::Exists => libc::EEXIST,
        BackendErrorKind::Other => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_the_error_table() {
        let cases = [
            (BackendError::classify(None, "NoSuchKey".into()), libc::ENOENT),
            (BackendError::classify(None, "NoSuchBucket".into()), libc::ENOENT),
            (BackendError::classify(None, "AccessDenied".into()), libc::EACCES),
            (BackendError::classify(None, "Forbidden".into()), libc::EACCES),
            (
                BackendError::classify(None, "InvalidAccessKeyId".into()),
                libc::EACCES,
            ),
            (
                BackendError::classify(None, "SignatureDoesNotMatch".into()),
                libc::EACCES,
            ),
            (
                BackendError::classify(None, "BucketAlreadyExists".into()),
                libc::EEXIST,
            ),
            (
                BackendError::classify(None, "connection refused".into()),
                libc::EIO,
            ),
        ];
        for (err, errno) in cases {
            assert_eq!(errno_for(&err), errno, "{}", err.message);
        }
    }
}
