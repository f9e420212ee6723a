//! Authenticated Encryption with Associated Data (AEAD).
//!
//! Three ciphers are supported on the tunnel:
//! - ChaCha20-Poly1305 (default, fast without AES hardware)
//! - AES-256-GCM
//! - AES-128-GCM
//!
//! Each direction of a tunnel connection owns one [`AeadCipher`] keyed with a
//! per-connection subkey and a counter nonce starting at zero.

use std::fmt;
use std::str::FromStr;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305,
};

use crate::crypto::kdf::{derive_subkey, evp_bytes_to_key, MasterKey};
use crate::crypto::{NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// Cipher algorithms understood by both agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// `AEAD_CHACHA20_POLY1305`
    ChaCha20Poly1305,
    /// `AEAD_AES_256_GCM`
    Aes256Gcm,
    /// `AEAD_AES_128_GCM`
    Aes128Gcm,
}

impl CipherKind {
    /// Length of the master key and of every session subkey.
    pub const fn key_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305 | CipherKind::Aes256Gcm => 32,
            CipherKind::Aes128Gcm => 16,
        }
    }

    /// Length of the random salt that prefixes each tunnel direction.
    pub const fn salt_len(&self) -> usize {
        self.key_len()
    }

    /// Canonical name, as accepted on the command line.
    pub const fn name(&self) -> &'static str {
        match self {
            CipherKind::ChaCha20Poly1305 => "AEAD_CHACHA20_POLY1305",
            CipherKind::Aes256Gcm => "AEAD_AES_256_GCM",
            CipherKind::Aes128Gcm => "AEAD_AES_128_GCM",
        }
    }
}

impl Default for CipherKind {
    fn default() -> Self {
        CipherKind::ChaCha20Poly1305
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aead_chacha20_poly1305" | "chacha20-ietf-poly1305" | "chacha20-poly1305" => {
                Ok(CipherKind::ChaCha20Poly1305)
            }
            "aead_aes_256_gcm" | "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "aead_aes_128_gcm" | "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            _ => Err(Error::config(format!("unsupported cipher: {s}"))),
        }
    }
}

/// A nonce (number used once) for AEAD operations.
///
/// The whole 96-bit value is a little-endian counter. It must never repeat
/// under one subkey; subkeys are unique per connection direction, so starting
/// every direction at zero is sound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from a 64-bit counter value.
    pub fn new(counter: u64) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&counter.to_le_bytes());
        Self(nonce)
    }

    /// Get the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Increment the counter, carrying across all 12 bytes.
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                return;
            }
        }
    }
}

#[allow(clippy::large_enum_variant)]
enum AeadImpl {
    ChaCha20Poly1305(ChaCha20Poly1305),
    Aes256Gcm(Aes256Gcm),
    Aes128Gcm(Aes128Gcm),
}

/// One direction's AEAD state: a keyed cipher plus its nonce counter.
pub struct AeadCipher {
    inner: AeadImpl,
    nonce: Nonce,
}

impl AeadCipher {
    /// Create a cipher for `kind` keyed with a session subkey.
    pub fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self> {
        let invalid = |_| Error::crypto(format!("{kind} needs a {}-byte key", kind.key_len()));
        let inner = match kind {
            CipherKind::ChaCha20Poly1305 => {
                AeadImpl::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(subkey).map_err(invalid)?)
            }
            CipherKind::Aes256Gcm => {
                AeadImpl::Aes256Gcm(Aes256Gcm::new_from_slice(subkey).map_err(invalid)?)
            }
            CipherKind::Aes128Gcm => {
                AeadImpl::Aes128Gcm(Aes128Gcm::new_from_slice(subkey).map_err(invalid)?)
            }
        };

        Ok(Self {
            inner,
            nonce: Nonce::default(),
        })
    }

    /// The nonce that the next seal/open will use.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Encrypt `buffer` in place and append the tag; advances the nonce.
    pub fn seal_in_place(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let nonce = self.nonce.as_bytes().into();
        let sealed = match &self.inner {
            AeadImpl::ChaCha20Poly1305(c) => c.encrypt_in_place(nonce, b"", buffer),
            AeadImpl::Aes256Gcm(c) => c.encrypt_in_place(nonce, b"", buffer),
            AeadImpl::Aes128Gcm(c) => c.encrypt_in_place(nonce, b"", buffer),
        };
        sealed.map_err(|_| Error::crypto("encryption failed"))?;
        self.nonce.increment();
        Ok(())
    }

    /// Verify and decrypt `buffer` in place, stripping the tag.
    ///
    /// # Errors
    ///
    /// [`Error::TunnelCorrupted`] if the tag does not authenticate.
    pub fn open_in_place(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        if buffer.len() < TAG_SIZE {
            return Err(Error::TunnelCorrupted);
        }

        let nonce = self.nonce.as_bytes().into();
        let opened = match &self.inner {
            AeadImpl::ChaCha20Poly1305(c) => c.decrypt_in_place(nonce, b"", buffer),
            AeadImpl::Aes256Gcm(c) => c.decrypt_in_place(nonce, b"", buffer),
            AeadImpl::Aes128Gcm(c) => c.decrypt_in_place(nonce, b"", buffer),
        };
        opened.map_err(|_| Error::TunnelCorrupted)?;
        self.nonce.increment();
        Ok(())
    }

    /// Encrypt a copy of `plaintext`. Returns ciphertext || tag.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(ciphertext_len(plaintext.len()));
        buffer.extend_from_slice(plaintext);
        self.seal_in_place(&mut buffer)?;
        Ok(buffer)
    }

    /// Decrypt a copy of `ciphertext`.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        self.open_in_place(&mut buffer)?;
        Ok(buffer)
    }
}

/// Tunnel cipher parameters: the algorithm and the master key.
///
/// Shared read-only by every connection of an agent; each connection turns
/// it into its own [`AeadCipher`] pair via [`Cipher::session`].
#[derive(Clone)]
pub struct Cipher {
    kind: CipherKind,
    key: MasterKey,
}

impl Cipher {
    /// Create cipher parameters from an explicit master key.
    pub fn new(kind: CipherKind, key: MasterKey) -> Result<Self> {
        if key.len() != kind.key_len() {
            return Err(Error::config(format!(
                "{kind} needs a {}-byte key, got {} bytes",
                kind.key_len(),
                key.len()
            )));
        }
        Ok(Self { kind, key })
    }

    /// Derive the master key from a password.
    ///
    /// Deterministic: both agents compute the same key from the same password.
    pub fn from_password(kind: CipherKind, password: &str) -> Self {
        Self {
            kind,
            key: evp_bytes_to_key(password.as_bytes(), kind.key_len()),
        }
    }

    /// The negotiated algorithm.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// The master key.
    pub fn key(&self) -> &MasterKey {
        &self.key
    }

    /// Build the AEAD state for one tunnel direction from its salt.
    pub fn session(&self, salt: &[u8]) -> Result<AeadCipher> {
        let subkey = derive_subkey(self.key.as_bytes(), salt, self.kind.key_len())?;
        AeadCipher::new(self.kind, &subkey)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("kind", &self.kind)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Calculate the ciphertext length for a given plaintext length.
pub const fn ciphertext_len(plaintext_len: usize) -> usize {
    plaintext_len + TAG_SIZE
}
