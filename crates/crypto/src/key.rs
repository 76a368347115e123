use std::fmt;

use aes_gcm::aead::KeyInit;
use aes_gcm::{Aes256Gcm, Key};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::CryptoError;

/// Salt length in bytes (128 bits).
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count for session keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Symmetric key for shard encryption.
///
/// Lives only in memory: it has no serde impls, no `Clone`, and its bytes
/// are wiped when dropped. Share it across tasks behind an `Arc`.
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl EncryptionKey {
    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.bytes.as_slice()))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([redacted])")
    }
}

/// Derives the session key from `password` and the persisted `salt`.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<EncryptionKey, CryptoError> {
    derive_key_with_iterations(password, salt, PBKDF2_ITERATIONS)
}

/// Like [`derive_key`] with an explicit iteration count.
pub fn derive_key_with_iterations(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<EncryptionKey, CryptoError> {
    if salt.len() != SALT_LEN {
        return Err(CryptoError::InvalidSalt(salt.len()));
    }
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, bytes.as_mut_slice());
    Ok(EncryptionKey { bytes })
}

/// Generates a fresh random salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
pub(crate) fn test_key(password: &str, salt: &[u8; SALT_LEN]) -> EncryptionKey {
    derive_key_with_iterations(password, salt, 10).unwrap()
}
