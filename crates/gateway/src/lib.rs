//! The strata gateway: an S3-compatible HTTP proxy that encrypts object
//! payloads through a layered AEAD pipeline and replicates them across every
//! backend binding of a logical bucket.
//!
//! Object-level requests (`/{bucket}/{key}`) are handled by the replication
//! engine in [`handlers`]; bucket-level and unknown requests are re-signed
//! and forwarded upstream by [`passthrough`].

pub mod auth;
pub mod handlers;
pub mod passthrough;
pub mod server;
pub mod sign;
pub mod state;

pub use server::{router, serve};
pub use state::GatewayState;
