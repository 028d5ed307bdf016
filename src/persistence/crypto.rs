// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Symmetric encryption for `ConfigValue::Password` at rest (§6).
//!
//! The key is derived from a host-stable seed plus a random salt via
//! PBKDF2-HMAC-SHA256, then used with AES-256-GCM. The salt lives in a
//! owner-only-permissions key file next to the encrypted credentials —
//! losing it means the encrypted values can never be recovered, which is
//! the intended fail-closed behavior rather than a silent downgrade.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{CoreError, Result};

const PBKDF2_ROUNDS: u32 = 100_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Derives and caches the data-at-rest encryption key for a given data
/// root. Construction fails closed: if the salt file cannot be created
/// or read, no key is produced and callers must refuse to persist
/// sensitive values.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn open(data_root: &Path) -> Result<Self> {
        let salt_path = data_root.join("config").join(".credential_salt");
        let salt = load_or_create_salt(&salt_path)?;
        let seed = host_seed();

        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(seed.as_bytes(), &salt, PBKDF2_ROUNDS, &mut key_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypts `plaintext`, returning a base64 string encoding `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::Config(format!("failed to encrypt credential: {e}")))?;

        let mut payload = Vec::with_capacity(nonce.len() + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Config(format!("malformed encrypted credential: {e}")))?;
        if payload.len() < 12 {
            return Err(CoreError::Config("encrypted credential too short".into()));
        }
        let (nonce, ciphertext) = payload.split_at(12);
        let nonce = Nonce::from_slice(nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CoreError::Config(format!("failed to decrypt credential: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| CoreError::Config(format!("decrypted credential was not utf-8: {e}")))
    }
}

fn load_or_create_salt(path: &Path) -> Result<Vec<u8>> {
    if let Ok(existing) = std::fs::read(path) {
        if existing.len() == SALT_LEN {
            return Ok(existing);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    use rand::RngCore;
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    std::fs::write(path, &salt)?;
    set_owner_only_permissions(path)?;
    Ok(salt)
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Best-effort machine identity used as KDF input; not secret on its
/// own, only a diversifier alongside the random salt file.
fn host_seed() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "camorch-default-seed".to_string())
}

pub fn default_credential_path(data_root: &Path) -> PathBuf {
    data_root.join("config").join("credentials.enc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext_through_encrypt_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = CredentialCipher::open(dir.path()).unwrap();
        let encrypted = cipher.encrypt("hunter2").unwrap();
        assert_ne!(encrypted, "hunter2");
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "hunter2");
    }

    #[test]
    fn reopening_with_same_salt_reuses_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = CredentialCipher::open(dir.path()).unwrap();
        let encrypted = first.encrypt("swordfish").unwrap();

        let second = CredentialCipher::open(dir.path()).unwrap();
        assert_eq!(second.decrypt(&encrypted).unwrap(), "swordfish");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = CredentialCipher::open(dir.path()).unwrap();
        let mut encrypted = cipher.encrypt("hunter2").unwrap();
        encrypted.push('A');
        assert!(cipher.decrypt(&encrypted).is_err());
    }
}
