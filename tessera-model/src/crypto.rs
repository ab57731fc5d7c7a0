//! Centralized cryptographic operations for Tessera.
//!
//! **All** Ed25519 signing and verification, BLAKE3 block addressing and
//! SHA-256 tree hashing go through this module, giving a single audit
//! surface for cryptographic correctness.
//!
//! # Primitives
//!
//! | Primitive | Algorithm       | Purpose                                  |
//! |-----------|-----------------|------------------------------------------|
//! | Block id  | BLAKE3 (32 B)   | Content addressing of chain blocks       |
//! | Tree hash | SHA-256 (32 B)  | Timestamp Merkle tree nodes              |
//! | Signature | Ed25519 (64 B)  | Policy signatures, committee signatures  |

use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::{Hash, PubKey, SigBytes};

/// Prefix of the textual public-key form.
const ARMOR_PREFIX: &str = "ed25519:";

/// Compute the BLAKE3 content hash of arbitrary bytes.
///
/// Used for chain block ids; the chain is self-authenticating because every
/// block is addressed by the hash of its canonical encoding.
#[inline]
pub fn content_hash(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Compute the SHA-256 digest of arbitrary bytes.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    Hash(digest.into())
}

/// Textual ("armored") form of an Ed25519 public key: `ed25519:<hex>`.
///
/// This is the only key representation that crosses module boundaries; raw
/// `VerifyingKey`s stay inside the crypto layer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArmoredKey(String);

impl ArmoredKey {
    /// Armor a raw 32-byte public key.
    pub fn from_public(pubkey: &PubKey) -> Self {
        Self(format!("{ARMOR_PREFIX}{}", hex::encode(pubkey.as_bytes())))
    }

    /// Parse from its textual form. Checks the armor syntax (prefix and a
    /// 32-byte hex body) but not curve-point validity; `verify` treats a
    /// non-point key as a failed verification rather than an error.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let key = Self(s.to_string());
        key.public_bytes()?;
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw 32 public-key bytes.
    pub fn public_bytes(&self) -> Result<PubKey, CryptoError> {
        let hex_part = self
            .0
            .strip_prefix(ARMOR_PREFIX)
            .ok_or(CryptoError::InvalidArmor)?;
        let bytes = hex::decode(hex_part).map_err(|_| CryptoError::InvalidArmor)?;
        PubKey::try_from(bytes.as_slice()).map_err(|_| CryptoError::InvalidArmor)
    }

    /// Dearmor into a dalek `VerifyingKey`.
    ///
    /// Fails if the armored bytes are not a valid curve point.
    pub fn verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
        let pubkey = self.public_bytes()?;
        ed25519_dalek::VerifyingKey::from_bytes(pubkey.as_bytes())
            .map_err(|_| CryptoError::InvalidPublicKey)
    }
}

impl fmt::Display for ArmoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ArmoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArmoredKey({})", self.0)
    }
}

/// Sign a message with an Ed25519 signing key, producing a detached signature.
pub fn sign(signing_key: &ed25519_dalek::SigningKey, message: &[u8]) -> SigBytes {
    use ed25519_dalek::Signer;
    SigBytes(signing_key.sign(message).to_bytes())
}

/// Verify a detached Ed25519 signature against an armored public key.
///
/// Returns `false` on any mismatch or malformed input; never panics and
/// never returns an error.
pub fn verify(key: &ArmoredKey, message: &[u8], signature: &SigBytes) -> bool {
    use ed25519_dalek::Verifier;
    let Ok(vk) = key.verifying_key() else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    vk.verify(message, &sig).is_ok()
}

/// Cryptographic operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed armored key")]
    InvalidArmor,

    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
}
