//! Key Derivation Functions.
//!
//! Two stages:
//! 1. password → master key with OpenSSL's `EVP_BytesToKey` (MD5, one round,
//!    no salt), so any agent given the same password gets the same key;
//! 2. master key + per-connection salt → session subkey with HKDF-SHA1.

use std::fmt;

use hkdf::Hkdf as HkdfImpl;
use md5::{Digest, Md5};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::SUBKEY_INFO;
use crate::error::{Error, Result};

/// The long-lived tunnel key.
///
/// Automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Get the raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for MasterKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey(<{} bytes>)", self.0.len())
    }
}

/// HKDF key derivation using SHA-1.
pub struct Hkdf {
    prk: HkdfImpl<Sha1>,
}

impl Hkdf {
    /// Create a new HKDF instance from input keying material.
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            prk: HkdfImpl::new(salt, ikm),
        }
    }

    /// Expand the PRK to `len` bytes of output keying material.
    pub fn expand(&self, info: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut okm = Zeroizing::new(vec![0u8; len]);
        self.prk
            .expand(info, &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;
        Ok(okm)
    }
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
///
/// `D_i = MD5(D_{i-1} || password)`, concatenated until `key_len` bytes.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> MasterKey {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    prev.zeroize();
    key.truncate(key_len);
    MasterKey(key)
}

/// Derive the session subkey for one tunnel direction.
pub fn derive_subkey(master_key: &[u8], salt: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    Hkdf::new(Some(salt), master_key).expand(SUBKEY_INFO, key_len)
}
