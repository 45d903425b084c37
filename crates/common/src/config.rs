//! YAML configuration for the gateway and the filesystem mount.
//!
//! Every string value in the file may be given inline (`{data: "..."}`) or
//! pulled from the environment (`{env_var: NAME}`), so secrets never have to
//! live in the config file itself.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind address for the HTTP listener, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,
    /// Crypto pipeline definitions, referenced by id from bucket backends.
    #[serde(default)]
    pub crypto: Vec<CryptoConfig>,
    /// Backend endpoint definitions, referenced by id from bucket backends.
    #[serde(default)]
    pub s3_clients: Vec<S3ClientConfig>,
    /// Logical buckets and their ordered backend bindings.
    #[serde(default)]
    pub s3_buckets: Vec<S3BucketConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// A string that resolves from inline data or an environment variable.
///
/// Inline data wins when both are present; an unset source resolves to the
/// empty string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultiSourceString {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
}

impl MultiSourceString {
    /// Create an inline value (mostly useful in tests).
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            data: Some(value.into()),
            env_var: None,
        }
    }

    /// Resolve the value, preferring inline data over the environment.
    pub fn resolve(&self) -> String {
        if let Some(data) = &self.data {
            if !data.is_empty() {
                return data.clone();
            }
        }
        if let Some(name) = &self.env_var {
            if let Ok(value) = std::env::var(name) {
                return value;
            }
        }
        String::new()
    }
}

/// One named crypto pipeline: an ordered list of AEAD layers.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    pub id: String,
    pub layers: Vec<CryptoLayerConfig>,
}

/// One AEAD layer inside a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoLayerConfig {
    /// `aes` (with `params.mode: gcm`), `chacha20poly1305`, or `keyset`.
    pub algorithm: String,
    /// Base64 key material, or a JSON keyset document for `keyset`.
    #[serde(default)]
    pub keyset: MultiSourceString,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// One S3-compatible endpoint with fixed credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct S3ClientConfig {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    #[serde(default)]
    pub access_key: MultiSourceString,
    #[serde(default)]
    pub secret_key: MultiSourceString,
}

/// One logical bucket: the name clients see plus its backend fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct S3BucketConfig {
    pub bucket_name: String,
    /// Order is significant: index 0 is the primary binding.
    pub backends: Vec<BackendBindingConfig>,
}

/// One backend binding of a logical bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendBindingConfig {
    pub s3_client_id: String,
    pub s3_bucket_name: String,
    #[serde(default)]
    pub crypto_id: Option<String>,
}

/// Gateway authentication settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Expected `Authorization` scheme literal, e.g. `AWS4-HMAC-SHA256`.
    #[serde(default)]
    pub header_format: MultiSourceString,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub access_key: MultiSourceString,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Config {
    /// Load and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Check an access key against the configured user list.
    ///
    /// Keys are compared as exact strings.
    pub fn is_valid_access_key(&self, key: &str) -> bool {
        self.auth
            .users
            .iter()
            .any(|user| user.access_key.resolve() == key)
    }

    /// Find a logical bucket definition by name.
    pub fn bucket(&self, name: &str) -> Option<&S3BucketConfig> {
        self.s3_buckets.iter().find(|b| b.bucket_name == name)
    }
}
