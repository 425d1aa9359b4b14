//! Provider-token encryption at rest.
//!
//! ChaCha20-Poly1305 with a random 96-bit nonce prepended to the
//! ciphertext; the whole blob is base64-encoded for TEXT columns. The key
//! is derived from the process-wide `ENCRYPTION_KEY` via SHA-256, so any
//! passphrase length works. Plaintext never appears in logs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

const NONCE_LEN: usize = 12;

pub struct TokenCipher {
    cipher: ChaCha20Poly1305,
}

impl TokenCipher {
    pub fn new(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let cipher = ChaCha20Poly1305::new_from_slice(&digest)
            .expect("SHA-256 digest is always a valid 32-byte key");
        Self { cipher }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Crypto(format!("encrypt failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| StoreError::Crypto(format!("bad base64: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(StoreError::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| StoreError::Crypto(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| StoreError::Crypto(format!("bad utf-8: {e}")))
    }
}
