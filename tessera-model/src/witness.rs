//! Witness and committee roster.
//!
//! A `Witness` binds the Merkle root over every package head to a wall-clock
//! instant, under one aggregate committee signature. Only the latest witness
//! is served; a new epoch's witness supersedes the previous one.

use crate::crypto::{self, ArmoredKey};
use crate::merkle::InclusionProof;
use crate::types::{Hash, SigBytes};
use uuid::Uuid;

/// Ordered committee of co-signing members. Immutable after initialization;
/// the aggregate signature is defined with respect to this ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub id: Uuid,
    pub members: Vec<ArmoredKey>,
}

impl Roster {
    pub fn new(members: Vec<ArmoredKey>) -> Self {
        Self {
            id: Uuid::new_v4(),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Verify an aggregate signature over `message` against this roster.
    ///
    /// The aggregate carries one share per member, in roster order; any
    /// missing or invalid share fails the whole aggregate.
    pub fn verify_aggregate(&self, message: &[u8], aggregate: &AggregateSignature) -> bool {
        if aggregate.shares().len() != self.members.len() {
            return false;
        }
        self.members
            .iter()
            .zip(aggregate.shares())
            .all(|(member, share)| crypto::verify(member, message, share))
    }
}

/// Aggregate committee signature: the ordered signature shares of one
/// collective-signing round.
///
/// Stands in for the external co-signing primitive, which compresses the
/// round into a single signature verifiable against the roster's collective
/// key. The engine and clients treat the value as opaque either way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateSignature(Vec<SigBytes>);

impl AggregateSignature {
    pub fn new(shares: Vec<SigBytes>) -> Self {
        Self(shares)
    }

    pub fn shares(&self) -> &[SigBytes] {
        &self.0
    }
}

/// A signed (timestamp, Merkle root) pair attesting to the head of every
/// package at one instant, with a per-package inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    /// Unix seconds at the moment of signing.
    pub timestamp: i64,
    /// Root of the SHA-256 tree over all package heads in canonical order.
    pub root: Hash,
    pub signature: AggregateSignature,
    /// One proof per package present at signing time, sorted by name.
    pub proofs: Vec<(String, InclusionProof)>,
}

impl Witness {
    /// Look up the inclusion proof for one package.
    pub fn proof_for(&self, name: &str) -> Option<&InclusionProof> {
        self.proofs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }
}
