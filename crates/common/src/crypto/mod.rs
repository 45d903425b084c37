//! Layered authenticated encryption for object payloads.
//!
//! Every object stored through the gateway passes through a [`Pipeline`]: an
//! ordered, non-empty sequence of AEAD layers. Encryption applies the layers
//! left to right, decryption right to left, so `decrypt(encrypt(x)) == x`
//! for any byte slice. Stored ciphertext reveals nothing about the payload
//! beyond its total length.

pub mod layer;
pub mod pipeline;

pub use layer::{AesGcmLayer, ChaChaLayer, CryptoError, KeysetLayer, Layer, KEY_SIZE, NONCE_SIZE};
pub use pipeline::Pipeline;
