use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use rand::RngCore;
use rand::rngs::OsRng;
use relaydrive_protocol::{NONCE_LEN, TAG_LEN};

use crate::{CryptoError, EncryptionKey};

/// Size of the encrypted frame for a plaintext of `plain_len` bytes.
pub const fn encrypted_len(plain_len: usize) -> usize {
    NONCE_LEN + plain_len + TAG_LEN
}

/// Seals one shard: `[nonce][ciphertext][tag]`.
///
/// Every call draws a new nonce, so re-encrypting the same shard for a retry
/// never repeats a (key, nonce) pair.
pub fn encrypt_shard(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut frame = Vec::with_capacity(NONCE_LEN + sealed.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

/// Opens a frame produced by [`encrypt_shard`].
///
/// Frames too short to hold a nonce and a tag are treated the same as a tag
/// mismatch.
pub fn decrypt_shard(frame: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }
    let (nonce, sealed) = frame.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
