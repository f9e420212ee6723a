//! Secure random number generation.
//!
//! Provides cryptographically secure random bytes using the operating
//! system's entropy source.

use rand::RngCore;
use rand_core::OsRng;

/// Cryptographically secure random number generator.
///
/// Wraps the OS-provided entropy source (e.g., /dev/urandom on Unix,
/// BCryptGenRandom on Windows).
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fresh connection salt of `len` bytes.
    pub fn salt(len: usize) -> Vec<u8> {
        let mut salt = vec![0u8; len];
        Self::fill(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_random_fill() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];

        SecureRandom::fill(&mut buf1);
        SecureRandom::fill(&mut buf2);

        assert!(!buf1.iter().all(|&b| b == 0));
        assert_ne!(buf1, buf2);
    }

    #[test]
    fn test_salts_are_unique() {
        let a = SecureRandom::salt(32);
        let b = SecureRandom::salt(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
