//! Shared gateway state, built once at startup.

use std::sync::Arc;

use common::{Config, Registry};

use crate::auth::Authenticator;

/// Everything a request handler needs, immutable after startup.
#[derive(Debug)]
pub struct GatewayState {
    pub registry: Registry,
    pub auth: Authenticator,
    /// Client used by the passthrough proxy to reach upstream endpoints.
    pub http: reqwest::Client,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(registry: Registry, auth: Authenticator) -> SharedState {
        Arc::new(Self {
            registry,
            auth,
            http: reqwest::Client::new(),
        })
    }

    /// Build the full state from a loaded configuration.
    pub fn from_config(cfg: &Config) -> Result<SharedState, common::registry::RegistryError> {
        let registry = Registry::from_config(cfg)?;
        let auth = Authenticator::from_config(&cfg.auth);
        Ok(Self::new(registry, auth))
    }
}
