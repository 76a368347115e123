//! Client-side encryption for RelayDrive shards.
//!
//! Keys are derived from a password with PBKDF2-HMAC-SHA256 and never leave
//! process memory. Each shard is sealed with AES-256-GCM under a fresh random
//! nonce and framed as `[nonce (12)][ciphertext][tag (16)]`.

mod key;
mod settings;
mod shard;

pub use key::{
    EncryptionKey, KEY_LEN, PBKDF2_ITERATIONS, SALT_LEN, derive_key, derive_key_with_iterations,
    generate_salt,
};
pub use settings::{EncryptionSettings, KeyMode, generate_password};
pub use shard::{decrypt_shard, encrypt_shard, encrypted_len};

/// Errors produced by the crypto crate.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Tag mismatch: the frame was corrupted, truncated, or sealed under
    /// another key.
    #[error("authentication failed: shard is corrupted or the key is wrong")]
    AuthenticationFailure,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid salt: expected {SALT_LEN} bytes, got {0}")]
    InvalidSalt(usize),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
