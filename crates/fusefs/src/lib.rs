//! FUSE adapter: mounts the primary binding of a logical bucket as a local
//! filesystem.
//!
//! Object-storage semantics are mapped onto POSIX: trailing-`/` marker
//! objects and common prefixes become directories, whole-object encryption
//! forces full-object reads, and writes accumulate in per-handle buffers
//! that upload on flush.

pub mod attr_cache;
pub mod errno;
pub mod inode_table;
pub mod s3fs;

pub use attr_cache::{AttrCache, CachedAttr};
pub use s3fs::S3Fs;
