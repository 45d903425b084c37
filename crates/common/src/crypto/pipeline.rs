//! Ordered composition of AEAD layers.

use crate::config::CryptoConfig;

use super::layer::{AesGcmLayer, ChaChaLayer, CryptoError, KeysetLayer, Layer};

/// An ordered, non-empty sequence of AEAD layers identified by a pipeline id.
///
/// Encryption applies layers left to right: the ciphertext of layer `i` is
/// the plaintext input of layer `i + 1`. Decryption walks the layers in
/// reverse. Pipelines are built once at startup and shared read-only.
pub struct Pipeline {
    id: String,
    layers: Vec<Box<dyn Layer>>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, layers: Vec<Box<dyn Layer>>) -> Result<Self, CryptoError> {
        let id = id.into();
        if layers.is_empty() {
            return Err(CryptoError::InvalidKey(format!(
                "crypto pipeline '{id}' has no layers"
            )));
        }
        Ok(Self { id, layers })
    }

    /// Build a pipeline from its configuration block, failing fast on bad
    /// key material, unknown algorithms, or a non-GCM AES mode.
    pub fn from_config(cfg: &CryptoConfig) -> Result<Self, CryptoError> {
        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(cfg.layers.len());
        for layer_cfg in &cfg.layers {
            let keyset = layer_cfg.keyset.resolve();
            let layer: Box<dyn Layer> = match layer_cfg.algorithm.as_str() {
                "aes" => {
                    match layer_cfg.params.get("mode").map(String::as_str) {
                        Some("gcm") => {}
                        other => {
                            return Err(CryptoError::UnsupportedMode(
                                other.map(str::to_string),
                            ))
                        }
                    }
                    Box::new(AesGcmLayer::new(&keyset)?)
                }
                "chacha20poly1305" => Box::new(ChaChaLayer::new(&keyset)?),
                "keyset" => Box::new(KeysetLayer::new(&keyset)?),
                other => return Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
            };
            layers.push(layer);
        }
        Self::new(cfg.id.clone(), layers)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encrypt through every layer, left to right.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = data.to_vec();
        for layer in &self.layers {
            buf = layer.encrypt(&buf)?;
        }
        Ok(buf)
    }

    /// Decrypt through every layer, right to left.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = data.to_vec();
        for layer in self.layers.iter().rev() {
            buf = layer.decrypt(&buf)?;
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CryptoLayerConfig, MultiSourceString};
    use std::collections::HashMap;

    const KEY_A: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
    const KEY_B: &str = "ZmVkY2JhOTg3NjU0MzIxMGZlZGNiYTk4NzY1NDMyMTA=";

    fn layer_cfg(algorithm: &str, key: &str, mode: Option<&str>) -> CryptoLayerConfig {
        let mut params = HashMap::new();
        if let Some(mode) = mode {
            params.insert("mode".to_string(), mode.to_string());
        }
        CryptoLayerConfig {
            algorithm: algorithm.to_string(),
            keyset: MultiSourceString::inline(key),
            params,
        }
    }

    fn triple_layer() -> Pipeline {
        Pipeline::from_config(&CryptoConfig {
            id: "triple".into(),
            layers: vec![
                layer_cfg("aes", KEY_A, Some("gcm")),
                layer_cfg("chacha20poly1305", KEY_B, None),
                layer_cfg("aes", KEY_B, Some("gcm")),
            ],
        })
        .unwrap()
    }

    #[test]
    fn round_trip_through_three_layers() {
        let pipeline = triple_layer();
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let sealed = pipeline.encrypt(plaintext).unwrap();
        assert_ne!(sealed, plaintext.to_vec());
        assert_eq!(pipeline.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn round_trip_empty_input() {
        let pipeline = triple_layer();
        let sealed = pipeline.encrypt(b"").unwrap();
        assert!(!sealed.is_empty());
        assert_eq!(pipeline.decrypt(&sealed).unwrap(), b"");
    }

    #[test]
    fn ciphertext_is_opaque() {
        // Sanity property: no 8-byte window of the plaintext survives into
        // the stored ciphertext.
        let pipeline = triple_layer();
        let plaintext: Vec<u8> = (0..256u16).map(|i| (i % 251) as u8).collect();
        let sealed = pipeline.encrypt(&plaintext).unwrap();
        for window in plaintext.windows(8) {
            assert!(
                !sealed.windows(8).any(|w| w == window),
                "plaintext window leaked into ciphertext"
            );
        }
    }

    #[test]
    fn layer_order_matters() {
        let forward = triple_layer();
        let reversed = Pipeline::from_config(&CryptoConfig {
            id: "reversed".into(),
            layers: vec![
                layer_cfg("aes", KEY_B, Some("gcm")),
                layer_cfg("chacha20poly1305", KEY_B, None),
                layer_cfg("aes", KEY_A, Some("gcm")),
            ],
        })
        .unwrap();

        let sealed = forward.encrypt(b"ordered").unwrap();
        assert!(reversed.decrypt(&sealed).is_err());
    }

    #[test]
    fn aes_requires_gcm_mode() {
        let result = Pipeline::from_config(&CryptoConfig {
            id: "bad-mode".into(),
            layers: vec![layer_cfg("aes", KEY_A, Some("cbc"))],
        });
        assert!(matches!(result, Err(CryptoError::UnsupportedMode(_))));

        let result = Pipeline::from_config(&CryptoConfig {
            id: "no-mode".into(),
            layers: vec![layer_cfg("aes", KEY_A, None)],
        });
        assert!(matches!(result, Err(CryptoError::UnsupportedMode(None))));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let result = Pipeline::from_config(&CryptoConfig {
            id: "bad-algo".into(),
            layers: vec![layer_cfg("rot13", KEY_A, None)],
        });
        assert!(matches!(
            result,
            Err(CryptoError::UnsupportedAlgorithm(ref a)) if a == "rot13"
        ));
    }

    #[test]
    fn empty_pipeline_rejected() {
        let result = Pipeline::from_config(&CryptoConfig {
            id: "empty".into(),
            layers: vec![],
        });
        assert!(result.is_err());
    }

    #[test]
    fn same_input_encrypts_differently() {
        let pipeline = triple_layer();
        let a = pipeline.encrypt(b"dup").unwrap();
        let b = pipeline.encrypt(b"dup").unwrap();
        assert_ne!(a, b);
    }
}
