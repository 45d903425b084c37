//! Individual AEAD layers.
//!
//! Each layer seals a byte buffer as `nonce || ciphertext || tag`, with a
//! fresh random nonce per call. Both supported ciphers use 12-byte nonces and
//! 16-byte tags, so a layer adds a fixed 28 bytes of framing.

use std::collections::HashMap;

use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use serde::Deserialize;

/// AEAD nonce length in bytes (96 bits, shared by both ciphers).
pub const NONCE_SIZE: usize = 12;
/// Raw key length in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Length of the big-endian key-id prefix a [`KeysetLayer`] adds.
const KEY_ID_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext shorter than the framing it must carry.
    #[error("ciphertext too short")]
    Truncated,
    /// AEAD tag verification failed: wrong key or tampered data.
    #[error("authentication failed")]
    AuthFailed,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("unsupported crypto algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported AES mode: {0:?}")]
    UnsupportedMode(Option<String>),
    #[error("keyset has no key with id {0}")]
    UnknownKeyId(u32),
    #[error("failed to generate nonce: {0}")]
    Rng(String),
    /// Encryption itself failed (only on cipher-internal errors).
    #[error("encrypt error")]
    Encrypt,
}

/// One AEAD layer of a pipeline.
///
/// Implementations are immutable after construction and safe to share across
/// tasks; every call generates its own nonce.
pub trait Layer: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

fn random_nonce() -> Result<[u8; NONCE_SIZE], CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;
    Ok(nonce)
}

/// Decode a base64 value into exactly [`KEY_SIZE`] raw key bytes.
pub fn decode_key(base64_key: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let raw = BASE64
        .decode(base64_key.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("base64: {e}")))?;
    if raw.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "expected {KEY_SIZE} key bytes, got {}",
            raw.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&raw);
    Ok(key)
}

fn seal<C>(cipher: &C, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    let nonce = random_nonce()?;
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open<C>(cipher: &C, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    if ciphertext.len() < NONCE_SIZE {
        return Err(CryptoError::Truncated);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::AuthFailed)
}

/// AES-256-GCM layer.
pub struct AesGcmLayer {
    cipher: Aes256Gcm,
}

impl AesGcmLayer {
    pub fn new(base64_key: &str) -> Result<Self, CryptoError> {
        let key = decode_key(base64_key)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }
}

impl Layer for AesGcmLayer {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.cipher, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.cipher, ciphertext)
    }
}

/// ChaCha20-Poly1305 layer.
pub struct ChaChaLayer {
    cipher: ChaCha20Poly1305,
}

impl ChaChaLayer {
    pub fn new(base64_key: &str) -> Result<Self, CryptoError> {
        let key = decode_key(base64_key)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }
}

impl Layer for ChaChaLayer {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.cipher, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.cipher, ciphertext)
    }
}

#[derive(Debug, Deserialize)]
struct KeysetDoc {
    primary_key_id: u32,
    keys: Vec<KeysetKey>,
}

#[derive(Debug, Deserialize)]
struct KeysetKey {
    key_id: u32,
    /// Base64 raw AES-256 key.
    key: String,
}

/// Keyset layer: a rotating set of AES-256-GCM keys behind one handle.
///
/// Encrypts under the primary key and prefixes the output with the 4-byte
/// big-endian key id, so older objects sealed under retired keys stay
/// readable after a rotation. The keyset document is JSON, optionally
/// base64-wrapped:
///
/// ```json
/// {"primary_key_id": 2, "keys": [
///   {"key_id": 1, "key": "<base64 32 bytes>"},
///   {"key_id": 2, "key": "<base64 32 bytes>"}
/// ]}
/// ```
pub struct KeysetLayer {
    primary_id: u32,
    keys: HashMap<u32, Aes256Gcm>,
}

impl KeysetLayer {
    pub fn new(keyset: &str) -> Result<Self, CryptoError> {
        let doc = Self::parse(keyset)?;
        let mut keys = HashMap::with_capacity(doc.keys.len());
        for entry in &doc.keys {
            let key = decode_key(&entry.key)?;
            let cipher = Aes256Gcm::new_from_slice(&key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            keys.insert(entry.key_id, cipher);
        }
        if !keys.contains_key(&doc.primary_key_id) {
            return Err(CryptoError::UnknownKeyId(doc.primary_key_id));
        }
        Ok(Self {
            primary_id: doc.primary_key_id,
            keys,
        })
    }

    fn parse(keyset: &str) -> Result<KeysetDoc, CryptoError> {
        if let Ok(doc) = serde_json::from_str::<KeysetDoc>(keyset) {
            return Ok(doc);
        }
        // Generated keysets ship base64-wrapped so they can sit in env vars.
        let raw = BASE64
            .decode(keyset.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("keyset is neither JSON nor base64: {e}")))?;
        serde_json::from_slice(&raw).map_err(|e| CryptoError::InvalidKey(format!("keyset JSON: {e}")))
    }
}

impl Layer for KeysetLayer {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self
            .keys
            .get(&self.primary_id)
            .ok_or(CryptoError::UnknownKeyId(self.primary_id))?;
        let sealed = seal(cipher, plaintext)?;
        let mut out = Vec::with_capacity(KEY_ID_SIZE + sealed.len());
        out.extend_from_slice(&self.primary_id.to_be_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < KEY_ID_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (id_bytes, sealed) = ciphertext.split_at(KEY_ID_SIZE);
        let key_id = u32::from_be_bytes(id_bytes.try_into().expect("split at 4"));
        let cipher = self
            .keys
            .get(&key_id)
            .ok_or(CryptoError::UnknownKeyId(key_id))?;
        open(cipher, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AES_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
    const CHACHA_KEY: &str = "ZmVkY2JhOTg3NjU0MzIxMGZlZGNiYTk4NzY1NDMyMTA=";

    fn keyset_json() -> String {
        format!(
            r#"{{"primary_key_id": 2, "keys": [
                {{"key_id": 1, "key": "{AES_KEY}"}},
                {{"key_id": 2, "key": "{CHACHA_KEY}"}}
            ]}}"#
        )
    }

    #[test]
    fn aes_round_trip() {
        let layer = AesGcmLayer::new(AES_KEY).unwrap();
        let plaintext = b"attack at dawn";
        let sealed = layer.encrypt(plaintext).unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + plaintext.len() + 16);
        assert_eq!(layer.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn chacha_round_trip() {
        let layer = ChaChaLayer::new(CHACHA_KEY).unwrap();
        let plaintext = b"attack at dawn";
        let sealed = layer.encrypt(plaintext).unwrap();
        assert_eq!(layer.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let layer = AesGcmLayer::new(AES_KEY).unwrap();
        let mut sealed = layer.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            layer.decrypt(&sealed),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn short_input_is_truncated_not_auth_failed() {
        let layer = ChaChaLayer::new(CHACHA_KEY).unwrap();
        assert!(matches!(
            layer.decrypt(&[0u8; NONCE_SIZE - 1]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let sealer = AesGcmLayer::new(AES_KEY).unwrap();
        let opener = AesGcmLayer::new(CHACHA_KEY).unwrap();
        let sealed = sealer.encrypt(b"payload").unwrap();
        assert!(matches!(
            opener.decrypt(&sealed),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn bad_key_material_rejected() {
        assert!(AesGcmLayer::new("not base64!!").is_err());
        assert!(AesGcmLayer::new("c2hvcnQ=").is_err()); // 5 bytes
        assert!(ChaChaLayer::new("").is_err());
    }

    #[test]
    fn nonces_do_not_repeat() {
        let layer = ChaChaLayer::new(CHACHA_KEY).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let sealed = layer.encrypt(b"same input").unwrap();
            assert!(seen.insert(sealed[..NONCE_SIZE].to_vec()), "nonce repeated");
        }
    }

    #[test]
    fn keyset_round_trip_and_prefix() {
        let layer = KeysetLayer::new(&keyset_json()).unwrap();
        let sealed = layer.encrypt(b"rotated").unwrap();
        assert_eq!(&sealed[..4], &2u32.to_be_bytes());
        assert_eq!(layer.decrypt(&sealed).unwrap(), b"rotated");
    }

    #[test]
    fn keyset_decrypts_under_retired_key() {
        // Seal under a keyset whose primary is key 1, then rotate to key 2.
        let old = KeysetLayer::new(&format!(
            r#"{{"primary_key_id": 1, "keys": [{{"key_id": 1, "key": "{AES_KEY}"}}]}}"#
        ))
        .unwrap();
        let sealed = old.encrypt(b"old object").unwrap();

        let rotated = KeysetLayer::new(&keyset_json()).unwrap();
        assert_eq!(rotated.decrypt(&sealed).unwrap(), b"old object");
    }

    #[test]
    fn keyset_unknown_key_id() {
        let layer = KeysetLayer::new(&format!(
            r#"{{"primary_key_id": 1, "keys": [{{"key_id": 1, "key": "{AES_KEY}"}}]}}"#
        ))
        .unwrap();
        let mut sealed = layer.encrypt(b"x").unwrap();
        sealed[3] = 9;
        assert!(matches!(
            layer.decrypt(&sealed),
            Err(CryptoError::UnknownKeyId(9))
        ));
    }

    #[test]
    fn keyset_accepts_base64_wrapping() {
        let wrapped = BASE64.encode(keyset_json());
        let layer = KeysetLayer::new(&wrapped).unwrap();
        let sealed = layer.encrypt(b"wrapped").unwrap();
        assert_eq!(layer.decrypt(&sealed).unwrap(), b"wrapped");
    }

    #[test]
    fn keyset_missing_primary_rejected() {
        let result = KeysetLayer::new(&format!(
            r#"{{"primary_key_id": 7, "keys": [{{"key_id": 1, "key": "{AES_KEY}"}}]}}"#
        ));
        assert!(matches!(result, Err(CryptoError::UnknownKeyId(7))));
    }
}
