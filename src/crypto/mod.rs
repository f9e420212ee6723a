//! Cryptographic layer of the tunnel.
//!
//! This module provides:
//! - AEAD ciphers (ChaCha20-Poly1305, AES-256-GCM, AES-128-GCM)
//! - Password and session key derivation
//! - Secure random salts
//! - [`CipherStream`], which frames a byte stream into sealed chunks
//!
//! All secret material is zeroized on drop to prevent memory leakage.

mod aead;
mod kdf;
mod random;
mod stream;

pub use aead::{ciphertext_len, AeadCipher, Cipher, CipherKind, Nonce};
pub use kdf::{derive_subkey, evp_bytes_to_key, Hkdf, MasterKey};
pub use random::SecureRandom;
pub use stream::CipherStream;

/// Size of AEAD nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the sealed big-endian length prefix, before its tag
pub const LENGTH_SIZE: usize = 2;

/// Largest payload carried by one tunnel chunk
pub const MAX_PAYLOAD_SIZE: usize = 0x3FFF;

/// HKDF info string for session subkeys
pub const SUBKEY_INFO: &[u8] = b"ss-subkey";
