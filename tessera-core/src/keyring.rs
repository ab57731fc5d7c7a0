//! Signing keys
//!
//! A `KeyRing` wraps one Ed25519 keypair:
//! - Private key: stored locally in a key file, never crosses the API
//! - Public key: leaves the ring only in armored form
//!
//! Signing fails only on malformed key state; verification is the
//! infallible free function `tessera_model::crypto::verify`.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tessera_model::crypto::{self, ArmoredKey};
use tessera_model::types::{PubKey, SigBytes};
use thiserror::Error;

/// Errors from key management.
#[derive(Error, Debug)]
pub enum KeyRingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// An Ed25519 keypair producing armored public keys and detached signatures.
#[derive(Clone)]
pub struct KeyRing {
    signing_key: SigningKey,
}

impl KeyRing {
    /// Generate a new ring with a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Load a ring from a key file, or generate and save one if absent.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, KeyRingError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let ring = Self::generate();
            ring.save(path)?;
            Ok(ring)
        }
    }

    /// Load a ring from a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyRingError> {
        use zeroize::Zeroizing;

        // Wipe both the heap buffer and the stack copy once dropped.
        let bytes = Zeroizing::new(fs::read(path)?);
        if bytes.len() != 32 {
            return Err(KeyRingError::InvalidKeyLength(bytes.len()));
        }
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    /// Save the private key to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyRingError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(self.signing_key.as_bytes())?;
        Ok(())
    }

    /// The armored public key.
    pub fn public(&self) -> ArmoredKey {
        ArmoredKey::from_public(&self.public_key())
    }

    /// The raw 32-byte public key.
    pub fn public_key(&self) -> PubKey {
        PubKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> SigBytes {
        crypto::sign(&self.signing_key, message)
    }
}
