//! Descriptor sealing: AES-256-GCM keyed from a local secret file.
//!
//! Sealed layout is a 12-byte random nonce followed by ciphertext and
//! tag. Only descriptor vectors are sealed; attendance rows and
//! reference images are stored plain.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::StoreError;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const SECRET_SIZE: usize = 32;

/// AES-256-GCM cipher for descriptor vectors at rest.
#[derive(Clone)]
pub struct DescriptorCipher {
    cipher: Aes256Gcm,
}

impl DescriptorCipher {
    /// Derive the key from arbitrary secret bytes. The secret is hashed
    /// with SHA-256, so any secret length works.
    pub fn from_secret(secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Load the secret file, creating it with fresh random bytes and
    /// 0600 permissions on first use.
    pub fn from_key_file(path: &Path) -> Result<Self, StoreError> {
        let key_err = |source| StoreError::KeyFile {
            path: path.to_path_buf(),
            source,
        };
        let secret = match fs::read(path) {
            Ok(secret) => secret,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(key_err)?;
                }
                let mut secret = vec![0u8; SECRET_SIZE];
                OsRng.fill_bytes(&mut secret);
                let mut file = fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(path)
                    .map_err(key_err)?;
                file.write_all(&secret).map_err(key_err)?;
                tracing::info!(path = %path.display(), "created descriptor key file");
                secret
            }
            Err(source) => return Err(key_err(source)),
        };
        Ok(Self::from_secret(&secret))
    }

    /// Seal plaintext under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| StoreError::Cipher)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed blob. Fails on truncation, tampering, or a wrong key.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StoreError::Cipher);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::Cipher)
    }
}
