//! Connection credential encryption
//!
//! Passwords are stored as `base64(nonce || AES-256-GCM ciphertext)` with a
//! 96-bit random nonce. The 32-byte key comes from `SOLIDAFY_SECRET_KEY`.

use super::types::ConnectionSecrets;
use crate::error::{Error, Result};
use crate::model::Connection;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Environment variable holding the base64 encryption key
pub const SECRET_KEY_ENV: &str = "SOLIDAFY_SECRET_KEY";

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for catalog credentials
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher(****)")
    }
}

impl CredentialCipher {
    /// Create from raw key bytes (must be 32 bytes)
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::config("Encryption key must be 32 bytes"))?;
        Ok(Self { cipher })
    }

    /// Create from a base64-encoded key
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| Error::config(format!("Encryption key is not valid base64: {e}")))?;
        Self::new(&bytes)
    }

    /// Create from `SOLIDAFY_SECRET_KEY`, `None` when unset
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(SECRET_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Self::from_base64_key(&key).map(Some),
            _ => Ok(None),
        }
    }

    /// Generate a fresh base64 key
    pub fn generate_key() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }

    /// Encrypt a plaintext password
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::config("Failed to encrypt credential"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt a stored password
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(token.trim())
            .map_err(|_| Error::connection("Stored credential is not valid base64"))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::connection("Stored credential is truncated"));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::connection("Failed to decrypt stored credential"))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::connection("Decrypted credential is not UTF-8"))
    }
}

/// Resolve the credentials of a connection.
///
/// An encrypted password needs the cipher; a plain `password` is used as-is.
pub fn resolve_secrets(
    connection: &Connection,
    cipher: Option<&CredentialCipher>,
) -> Result<ConnectionSecrets> {
    let password = match (&connection.encrypted_password, &connection.password) {
        (Some(encrypted), _) => {
            let cipher = cipher.ok_or_else(|| {
                Error::config(format!(
                    "Connection '{}' has an encrypted password but {SECRET_KEY_ENV} is not set",
                    connection.name
                ))
            })?;
            Some(cipher.decrypt(encrypted)?)
        }
        (None, Some(plain)) => Some(plain.clone()),
        (None, None) => None,
    };

    Ok(ConnectionSecrets {
        username: connection.username.clone(),
        password,
    })
}
