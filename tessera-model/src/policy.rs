//! Policy and Release: the signed unit of the update chain.
//!
//! A `Policy` names a package version, its source hash, and the signer set
//! authorized to endorse it. A `Release` is a policy together with the
//! detached signatures over the policy's canonical encoding.

use crate::crypto::ArmoredKey;
use crate::types::SigBytes;
use std::collections::HashSet;
use thiserror::Error;

/// Structural problems with a policy, found before any signature check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("package name is empty")]
    EmptyName,

    #[error("version is empty")]
    EmptyVersion,

    #[error("threshold {threshold} out of range for {keys} keys")]
    BadThreshold { threshold: u32, keys: usize },

    #[error("duplicate signer key in policy")]
    DuplicateKey,
}

/// The (package, version, source-hash, threshold, key-list) tuple that
/// authorizes a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub version: String,
    pub source_hash: String,
    /// Minimum number of valid key signatures for acceptance. At least 1.
    pub threshold: u32,
    /// Ordered signer keys; `signatures[i]` must verify under `keys[i]`.
    pub keys: Vec<ArmoredKey>,
}

impl Policy {
    /// Check the structural invariants: non-empty name and version,
    /// `1 <= threshold <= keys.len()`, no duplicate keys.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if self.version.is_empty() {
            return Err(PolicyError::EmptyVersion);
        }
        if self.threshold == 0 || self.threshold as usize > self.keys.len() {
            return Err(PolicyError::BadThreshold {
                threshold: self.threshold,
                keys: self.keys.len(),
            });
        }
        let mut seen = HashSet::new();
        if !self.keys.iter().all(|k| seen.insert(k)) {
            return Err(PolicyError::DuplicateKey);
        }
        Ok(())
    }

    /// How many of this policy's keys appear in `other`'s key set.
    pub fn keys_in_common(&self, other: &Policy) -> usize {
        let theirs: HashSet<&ArmoredKey> = other.keys.iter().collect();
        self.keys.iter().filter(|k| theirs.contains(k)).count()
    }
}

/// A policy together with threshold signatures over its canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub policy: Policy,
    /// Ordered signatures; position `i` corresponds to `policy.keys[i]`.
    /// Entries beyond `threshold - 1` are carried but never checked.
    pub signatures: Vec<SigBytes>,
    /// Request a reproducible-build run for this release. Recorded and
    /// logged only; the acceptance predicate ignores it.
    pub verify_build: bool,
}
