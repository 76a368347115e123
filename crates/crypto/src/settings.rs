use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, EncryptionKey, SALT_LEN, derive_key, generate_salt};

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Default length of generated passwords.
const GENERATED_PASSWORD_LEN: usize = 32;

/// How the session password is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// The user types the password each session; nothing secret is stored.
    #[default]
    Manual,
    /// A generated password is stored next to the salt. Convenient, but
    /// anyone holding the settings file can decrypt.
    Automatic,
}

/// Persisted encryption settings: the salt and, in automatic mode only,
/// the generated password. The derived key is never part of this.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: KeyMode,
    /// Base64-encoded salt.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("enabled", &self.enabled)
            .field("mode", &self.mode)
            .field("salt", &self.salt)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl EncryptionSettings {
    /// Enabled settings with a fresh salt; the password is supplied per session.
    pub fn manual() -> Self {
        Self {
            enabled: true,
            mode: KeyMode::Manual,
            salt: STANDARD.encode(generate_salt()),
            password: None,
        }
    }

    /// Enabled settings with a fresh salt and a stored generated password.
    pub fn automatic() -> Self {
        Self {
            enabled: true,
            mode: KeyMode::Automatic,
            salt: STANDARD.encode(generate_salt()),
            password: Some(generate_password(GENERATED_PASSWORD_LEN)),
        }
    }

    /// Decodes the stored salt.
    pub fn salt_bytes(&self) -> Result<[u8; SALT_LEN], CryptoError> {
        let raw = STANDARD
            .decode(&self.salt)
            .map_err(|e| CryptoError::InvalidSettings(format!("salt is not base64: {e}")))?;
        raw.as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSalt(raw.len()))
    }

    /// Derives the session key.
    ///
    /// Automatic mode uses the stored password; manual mode requires
    /// `password`.
    pub fn unlock(&self, password: Option<&str>) -> Result<EncryptionKey, CryptoError> {
        if !self.enabled {
            return Err(CryptoError::InvalidSettings("encryption is disabled".into()));
        }
        let salt = self.salt_bytes()?;
        let password = match self.mode {
            KeyMode::Automatic => self.password.as_deref().ok_or_else(|| {
                CryptoError::InvalidSettings("automatic mode without stored password".into())
            })?,
            KeyMode::Manual => password.ok_or_else(|| {
                CryptoError::InvalidSettings("manual mode requires a password".into())
            })?,
        };
        derive_key(password, &salt)
    }
}

/// Generates a random password of `len` characters from the OS CSPRNG.
pub fn generate_password(len: usize) -> String {
    (0..len)
        .map(|_| PASSWORD_CHARSET[OsRng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}
