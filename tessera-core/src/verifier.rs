//! Release acceptance predicate.
//!
//! A pure function: no I/O, no side effects, no clock. Given a release and
//! the chain context it is destined for, decide accept or reject.

use tessera_model::codec;
use tessera_model::crypto;
use tessera_model::policy::{Policy, PolicyError, Release};
use thiserror::Error;

/// Why a release was rejected. Leaves the chain untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseRejected {
    #[error("malformed policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("release carries {got} signatures, policy threshold is {threshold}")]
    SignaturesShort { got: usize, threshold: u32 },

    #[error("signature {index} does not verify under its policy key")]
    BadSignature { index: usize },

    #[error("package name changed from {prev:?} to {new:?}")]
    NameMismatch { prev: String, new: String },

    #[error("version {new:?} does not follow {prev:?}")]
    VersionNotIncreasing { prev: String, new: String },

    #[error("signer set rotation is not authorized by the previous policy")]
    PolicyRotationUnauthorized,
}

/// Where in a chain the candidate release will land.
#[derive(Debug, Clone, Copy)]
pub enum ChainContext<'a> {
    /// First block of a new chain.
    Genesis,
    /// Successor of the block carrying `prev`.
    Update { prev: &'a Policy },
}

/// Accept iff:
/// 1. the policy is structurally valid (threshold, key list);
/// 2. for each `i < threshold`, `signatures[i]` verifies under `keys[i]`
///    over the canonical policy encoding (extra signatures are ignored);
/// 3. for an update: the name is unchanged, the version strictly increases
///    lexicographically, and the signer set rotation is authorized.
///
/// Rotation is authorized when the key set is identical to the previous
/// one, or keeps the previous threshold and retains at least `threshold`
/// of the previous keys.
pub fn verify_release(release: &Release, context: ChainContext<'_>) -> Result<(), ReleaseRejected> {
    let policy = &release.policy;
    policy.validate()?;

    let threshold = policy.threshold as usize;
    if release.signatures.len() < threshold {
        return Err(ReleaseRejected::SignaturesShort {
            got: release.signatures.len(),
            threshold: policy.threshold,
        });
    }

    let signed_bytes = codec::encode_policy(policy);
    for index in 0..threshold {
        if !crypto::verify(&policy.keys[index], &signed_bytes, &release.signatures[index]) {
            return Err(ReleaseRejected::BadSignature { index });
        }
    }

    if let ChainContext::Update { prev } = context {
        if policy.name != prev.name {
            return Err(ReleaseRejected::NameMismatch {
                prev: prev.name.clone(),
                new: policy.name.clone(),
            });
        }
        if policy.version <= prev.version {
            return Err(ReleaseRejected::VersionNotIncreasing {
                prev: prev.version.clone(),
                new: policy.version.clone(),
            });
        }
        if !rotation_authorized(prev, policy) {
            return Err(ReleaseRejected::PolicyRotationUnauthorized);
        }
    }

    Ok(())
}

/// Identical key set, or same threshold with at least `threshold` of the
/// previous keys retained.
fn rotation_authorized(prev: &Policy, new: &Policy) -> bool {
    if prev.keys == new.keys {
        return true;
    }
    new.threshold == prev.threshold && prev.keys_in_common(new) >= prev.threshold as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::KeyRing;

    fn rings(n: usize) -> Vec<KeyRing> {
        (0..n).map(|_| KeyRing::generate()).collect()
    }

    fn signed_release(name: &str, version: &str, threshold: u32, rings: &[KeyRing]) -> Release {
        let policy = Policy {
            name: name.into(),
            version: version.into(),
            source_hash: "cafe".into(),
            threshold,
            keys: rings.iter().map(|r| r.public()).collect(),
        };
        let bytes = codec::encode_policy(&policy);
        let signatures = rings.iter().map(|r| r.sign(&bytes)).collect();
        Release {
            policy,
            signatures,
            verify_build: false,
        }
    }

    #[test]
    fn genesis_with_full_threshold_accepted() {
        let rings = rings(3);
        let release = signed_release("libc", "1.0", 3, &rings);
        assert!(verify_release(&release, ChainContext::Genesis).is_ok());
    }

    #[test]
    fn too_few_signatures_rejected() {
        let rings = rings(3);
        let mut release = signed_release("libc", "1.0", 3, &rings);
        release.signatures.truncate(2);
        assert!(matches!(
            verify_release(&release, ChainContext::Genesis),
            Err(ReleaseRejected::SignaturesShort { got: 2, .. })
        ));
    }

    #[test]
    fn signature_by_wrong_key_rejected() {
        let rings = rings(3);
        let outsider = KeyRing::generate();
        let mut release = signed_release("libc", "1.0", 3, &rings);
        let bytes = codec::encode_policy(&release.policy);
        release.signatures[1] = outsider.sign(&bytes);
        assert_eq!(
            verify_release(&release, ChainContext::Genesis),
            Err(ReleaseRejected::BadSignature { index: 1 })
        );
    }

    #[test]
    fn extra_signatures_beyond_threshold_ignored() {
        let rings = rings(3);
        let mut release = signed_release("libc", "1.0", 2, &rings);
        // Third slot is garbage but sits beyond threshold - 1.
        release.signatures[2] = tessera_model::types::SigBytes([0u8; 64]);
        assert!(verify_release(&release, ChainContext::Genesis).is_ok());
    }

    #[test]
    fn update_same_keys_accepted() {
        let rings = rings(3);
        let genesis = signed_release("libc", "1.0", 3, &rings);
        let update = signed_release("libc", "1.1", 3, &rings);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert!(verify_release(&update, ctx).is_ok());
    }

    #[test]
    fn update_version_must_increase() {
        let rings = rings(2);
        let genesis = signed_release("libc", "1.1", 2, &rings);
        let update = signed_release("libc", "1.1", 2, &rings);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert!(matches!(
            verify_release(&update, ctx),
            Err(ReleaseRejected::VersionNotIncreasing { .. })
        ));
    }

    #[test]
    fn update_name_must_match() {
        let rings = rings(2);
        let genesis = signed_release("libc", "1.0", 2, &rings);
        let update = signed_release("zlib", "1.1", 2, &rings);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert!(matches!(
            verify_release(&update, ctx),
            Err(ReleaseRejected::NameMismatch { .. })
        ));
    }

    #[test]
    fn disjoint_rotation_rejected() {
        let old = rings(3);
        let new = rings(3);
        let genesis = signed_release("libc", "1.0", 3, &old);
        let update = signed_release("libc", "1.1", 3, &new);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert_eq!(
            verify_release(&update, ctx),
            Err(ReleaseRejected::PolicyRotationUnauthorized)
        );
    }

    #[test]
    fn superset_rotation_with_quorum_accepted() {
        let old = rings(3);
        let extra = KeyRing::generate();
        let genesis = signed_release("libc", "1.0", 3, &old);

        let mut grown: Vec<KeyRing> = old.clone();
        grown.push(extra);
        let update = signed_release("libc", "1.1", 3, &grown);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert!(verify_release(&update, ctx).is_ok());
    }

    #[test]
    fn rotation_below_quorum_rejected() {
        let old = rings(3);
        let genesis = signed_release("libc", "1.0", 3, &old);

        // Keep only two of the previous three signers.
        let mut partial: Vec<KeyRing> = old[..2].to_vec();
        partial.push(KeyRing::generate());
        let update = signed_release("libc", "1.1", 3, &partial);
        let ctx = ChainContext::Update {
            prev: &genesis.policy,
        };
        assert_eq!(
            verify_release(&update, ctx),
            Err(ReleaseRejected::PolicyRotationUnauthorized)
        );
    }
}
