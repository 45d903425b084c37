//! Shared building blocks for the strata gateway and filesystem adapter.
//!
//! This crate owns everything both surfaces need: the YAML configuration
//! schema, the layered AEAD crypto pipeline, the object-storage backend
//! client, and the logical bucket registry that wires them together.

pub mod config;
pub mod crypto;
pub mod registry;
pub mod store;

pub use config::Config;
pub use crypto::{CryptoError, Pipeline};
pub use registry::{Binding, LogicalBucket, Registry};
pub use store::{BackendClient, BackendError, BackendErrorKind};
