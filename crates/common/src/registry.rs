//! Logical bucket registry.
//!
//! Built once at startup from the configuration and shared read-only for the
//! process lifetime. Backend clients and crypto pipelines are deduplicated by
//! config id, so two bindings referencing the same `s3_client_id` share one
//! connection pool.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::crypto::{CryptoError, Pipeline};
use crate::store::BackendClient;

/// One backend binding of a logical bucket: where the bytes go and how they
/// are wrapped on the way.
#[derive(Debug, Clone)]
pub struct Binding {
    pub client: Arc<BackendClient>,
    /// Physical bucket name at the backend.
    pub bucket: String,
    /// Crypto pipeline, or `None` for plaintext storage.
    pub pipeline: Option<Arc<Pipeline>>,
}

impl Binding {
    /// Short human-readable identity for logs and error summaries.
    pub fn describe(&self) -> String {
        format!("{} (endpoint: {})", self.bucket, self.client.endpoint())
    }
}

/// A logical bucket and its ordered backend fan-out.
///
/// Order is significant: index 0 is the primary, used for GET/HEAD
/// first-attempt, passthrough proxying, and the filesystem mount.
#[derive(Debug)]
pub struct LogicalBucket {
    pub name: String,
    pub bindings: Vec<Binding>,
}

impl LogicalBucket {
    pub fn primary(&self) -> &Binding {
        &self.bindings[0]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("bucket '{bucket}' references unknown S3 client id '{client_id}'")]
    UnknownClient { bucket: String, client_id: String },
    #[error("bucket '{bucket}' references unknown crypto id '{crypto_id}'")]
    UnknownCrypto { bucket: String, crypto_id: String },
    #[error("bucket '{0}' has no backends configured")]
    NoBackends(String),
    #[error("crypto pipeline '{id}': {source}")]
    Pipeline {
        id: String,
        #[source]
        source: CryptoError,
    },
}

/// Map from logical bucket name to its bindings.
#[derive(Debug, Default)]
pub struct Registry {
    buckets: HashMap<String, Arc<LogicalBucket>>,
}

impl Registry {
    /// Assemble clients, pipelines, and buckets from the configuration.
    ///
    /// Fails fast: a single bad key, dangling reference, or empty backend
    /// list aborts startup.
    pub fn from_config(cfg: &Config) -> Result<Self, RegistryError> {
        let mut pipelines: HashMap<String, Arc<Pipeline>> = HashMap::new();
        for crypto_cfg in &cfg.crypto {
            let pipeline = Pipeline::from_config(crypto_cfg).map_err(|source| {
                RegistryError::Pipeline {
                    id: crypto_cfg.id.clone(),
                    source,
                }
            })?;
            pipelines.insert(crypto_cfg.id.clone(), Arc::new(pipeline));
        }

        let mut clients: HashMap<String, Arc<BackendClient>> = HashMap::new();
        for client_cfg in &cfg.s3_clients {
            clients.insert(
                client_cfg.id.clone(),
                Arc::new(BackendClient::connect(client_cfg)),
            );
        }

        let mut buckets = HashMap::new();
        for bucket_cfg in &cfg.s3_buckets {
            if bucket_cfg.backends.is_empty() {
                return Err(RegistryError::NoBackends(bucket_cfg.bucket_name.clone()));
            }

            let mut bindings = Vec::with_capacity(bucket_cfg.backends.len());
            for backend_cfg in &bucket_cfg.backends {
                let client = clients
                    .get(&backend_cfg.s3_client_id)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownClient {
                        bucket: bucket_cfg.bucket_name.clone(),
                        client_id: backend_cfg.s3_client_id.clone(),
                    })?;

                let pipeline = match &backend_cfg.crypto_id {
                    Some(crypto_id) => Some(
                        pipelines
                            .get(crypto_id)
                            .cloned()
                            .ok_or_else(|| RegistryError::UnknownCrypto {
                                bucket: bucket_cfg.bucket_name.clone(),
                                crypto_id: crypto_id.clone(),
                            })?,
                    ),
                    None => None,
                };

                bindings.push(Binding {
                    client,
                    bucket: backend_cfg.s3_bucket_name.clone(),
                    pipeline,
                });
            }

            tracing::info!(
                bucket = %bucket_cfg.bucket_name,
                bindings = bindings.len(),
                "registered logical bucket"
            );
            buckets.insert(
                bucket_cfg.bucket_name.clone(),
                Arc::new(LogicalBucket {
                    name: bucket_cfg.bucket_name.clone(),
                    bindings,
                }),
            );
        }

        Ok(Self { buckets })
    }

    /// Assemble a registry directly (tests).
    pub fn new(buckets: Vec<LogicalBucket>) -> Self {
        Self {
            buckets: buckets
                .into_iter()
                .map(|b| (b.name.clone(), Arc::new(b)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<LogicalBucket>> {
        self.buckets.get(name).cloned()
    }

    /// Any bucket at all, for passthrough requests that name no known bucket.
    pub fn any(&self) -> Option<Arc<LogicalBucket>> {
        self.buckets.values().next().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
