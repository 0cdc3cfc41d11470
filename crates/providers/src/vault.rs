//! Credential vault.
//!
//! Stateless authenticated encryption for provider API keys. The key is
//! SHA-256 of a process-wide secret; every call draws a fresh 96-bit nonce
//! and the output is `base64(nonce ‖ ciphertext ‖ tag)` under AES-256-GCM.
//!
//! Error messages never include plaintext, ciphertext or key material.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use mg_domain::error::{Error, Result};
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

fn cipher(secret: &str) -> Result<Aes256Gcm> {
    if secret.is_empty() {
        return Err(Error::Configuration("vault secret is not set".into()));
    }
    let key = Sha256::digest(secret.as_bytes());
    Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|_| Error::Configuration("derived vault key has an invalid length".into()))
}

/// Encrypt `plaintext` under `secret`.
pub fn encrypt(secret: &str, plaintext: &str) -> Result<String> {
    let cipher = cipher(secret)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| Error::Credential("encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(STANDARD.encode(out))
}

/// Decrypt a value produced by [`encrypt`] with the same `secret`.
pub fn decrypt(secret: &str, ciphertext: &str) -> Result<String> {
    let cipher = cipher(secret)?;
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| Error::Credential("ciphertext is not valid base64".into()))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Credential("ciphertext is too short".into()));
    }

    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Credential("ciphertext failed authentication".into()))?;

    String::from_utf8(plain).map_err(|_| Error::Credential("decrypted value is not UTF-8".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The process-wide secret bound to the encrypt/decrypt helpers.
///
/// An unconfigured vault is valid to construct; every operation on it
/// fails with [`Error::Configuration`].
#[derive(Clone)]
pub struct Vault {
    secret: Option<Arc<str>>,
}

impl Vault {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        Self {
            secret: (!secret.is_empty()).then(|| Arc::from(secret)),
        }
    }

    /// A vault with no secret.
    pub fn unconfigured() -> Self {
        Self { secret: None }
    }

    /// Read the secret from the environment variable `var`.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(secret) if !secret.is_empty() => Self::new(secret),
            _ => {
                tracing::warn!(
                    env_var = %var,
                    "vault secret not set; credential encryption and decryption will fail"
                );
                Self::unconfigured()
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn secret(&self) -> Result<&str> {
        self.secret
            .as_deref()
            .ok_or_else(|| Error::Configuration("vault secret is not set".into()))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt(self.secret()?, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        decrypt(self.secret()?, ciphertext)
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("configured", &self.is_configured())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        for plaintext in ["sk-test-123", "", "ключ-🔑", &"x".repeat(4096)] {
            let sealed = encrypt("platform-secret", plaintext).unwrap();
            assert_eq!(decrypt("platform-secret", &sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn encryption_is_not_deterministic() {
        let a = encrypt("s", "same").unwrap();
        let b = encrypt("s", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_is_a_credential_error() {
        let sealed = encrypt("secret-one", "sk-live").unwrap();
        let err = decrypt("secret-two", &sealed).unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
        assert!(!err.to_string().contains("sk-live"));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sealed = encrypt("s", "sk-live").unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = decrypt("s", &STANDARD.encode(raw)).unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }

    #[test]
    fn malformed_and_short_inputs() {
        assert!(matches!(
            decrypt("s", "not base64 !!").unwrap_err(),
            Error::Credential(_)
        ));
        let short = STANDARD.encode([0u8; NONCE_LEN]);
        assert!(matches!(decrypt("s", &short).unwrap_err(), Error::Credential(_)));
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(matches!(
            encrypt("", "x").unwrap_err(),
            Error::Configuration(_)
        ));
        assert!(matches!(
            decrypt("", "AAAA").unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn unconfigured_vault_fails_every_call() {
        let vault = Vault::unconfigured();
        assert!(!vault.is_configured());
        assert!(matches!(
            vault.encrypt("x").unwrap_err(),
            Error::Configuration(_)
        ));
        assert!(matches!(
            Vault::new("").decrypt("x").unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let vault = Vault::new("super-secret-value");
        let dbg = format!("{vault:?}");
        assert!(!dbg.contains("super-secret-value"));
    }
}
