// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Credential encryption at rest.
//!
//! Session credentials are sealed with AES-256-GCM under a daemon-wide key.
//! Every seal uses a fresh random 12-byte nonce stored next to the
//! ciphertext.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};

use crate::error::{Error, Result};

/// Key length for AES-256 (32 bytes).
pub const KEY_LENGTH: usize = 32;

/// Nonce length for AES-GCM (12 bytes).
pub const NONCE_LENGTH: usize = 12;

/// The daemon-wide credential key.
#[derive(Clone)]
pub struct VaultKey([u8; KEY_LENGTH]);

impl VaultKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        VaultKey(bytes)
    }

    /// Decode a key from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Vault(format!("invalid key encoding: {e}")))?;
        let bytes: [u8; KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Vault(format!(
                "invalid key length: expected {KEY_LENGTH}, got {}",
                b.len()
            ))
        })?;
        Ok(VaultKey(bytes))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LENGTH];
        bytes.copy_from_slice(key.as_slice());
        VaultKey(bytes)
    }

    /// Hex encoding suitable for a key file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// An encrypted credential blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Encrypt `plaintext` under `key`.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::Vault(format!("failed to create cipher: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Vault(format!("encryption failed: {e}")))?;
    Ok(Sealed {
        ciphertext,
        nonce: nonce.to_vec(),
    })
}

/// Decrypt a sealed blob.
///
/// Fails if the key is wrong or the blob was tampered with; callers treat
/// that as credential corruption.
pub fn open(key: &VaultKey, sealed: &Sealed) -> Result<Vec<u8>> {
    if sealed.nonce.len() != NONCE_LENGTH {
        return Err(Error::Vault(format!(
            "invalid nonce length: expected {NONCE_LENGTH}, got {}",
            sealed.nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::Vault(format!("failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&sealed.nonce);
    cipher
        .decrypt(nonce, sealed.ciphertext.as_ref())
        .map_err(|e| Error::Vault(format!("decryption failed: {e}")))
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
