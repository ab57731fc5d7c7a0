//! Canonical deterministic encoding.
//!
//! The byte form produced here is the *signed* form: two field-for-field
//! equal values encode to identical bytes on any machine and across runs.
//! Field order is fixed, integers are big-endian, and textual fields are
//! UTF-8 with a u32 length prefix. The same encoding doubles as the wire
//! and persistence format, so a decode of every structure is provided too.
//!
//! The collective-signing message for a witness is exactly
//! `big-endian int64(timestamp) ‖ root_bytes`; nothing else is prepended.

use crate::merkle::{InclusionProof, ProofStep, Side};
use crate::policy::{Policy, Release};
use crate::types::{Hash, SigBytes};
use crate::witness::{AggregateSignature, Witness};
use thiserror::Error;

/// Canonical encoding failure. Indicates malformed input bytes on decode;
/// encoding itself cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated input while reading {field}")]
    Truncated { field: &'static str },

    #[error("trailing bytes after decode: {remaining}")]
    TrailingBytes { remaining: usize },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid tag 0x{tag:02x} for {field}")]
    InvalidTag { field: &'static str, tag: u8 },

    #[error("malformed armored key in {field}")]
    InvalidKey { field: &'static str },
}

/// Append-only canonical byte writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    pub fn put_hash(&mut self, h: &Hash) {
        self.buf.extend_from_slice(h.as_bytes());
    }

    pub fn put_sig(&mut self, s: &SigBytes) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Length-prefixed raw bytes.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over canonical bytes; every read names the field it was after so
/// truncation errors are diagnosable.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated { field });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes(b.try_into().expect("4-byte slice")))
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        let b = self.take(8, field)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        let b = self.take(8, field)?;
        Ok(i64::from_be_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn bool(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidTag { field, tag }),
        }
    }

    pub fn hash(&mut self, field: &'static str) -> Result<Hash, CodecError> {
        let b = self.take(Hash::LEN, field)?;
        Ok(Hash::try_from(b).expect("32-byte slice"))
    }

    pub fn sig(&mut self, field: &'static str) -> Result<SigBytes, CodecError> {
        let b = self.take(SigBytes::LEN, field)?;
        Ok(SigBytes::try_from(b).expect("64-byte slice"))
    }

    pub fn bytes(&mut self, field: &'static str) -> Result<&'a [u8], CodecError> {
        let len = self.u32(field)? as usize;
        self.take(len, field)
    }

    pub fn str(&mut self, field: &'static str) -> Result<String, CodecError> {
        let b = self.bytes(field)?;
        String::from_utf8(b.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Reject trailing garbage.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.buf.len(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Policy / Release
// ---------------------------------------------------------------------------

/// Canonical policy bytes, the sole input to release signing and
/// verification.
pub fn encode_policy(policy: &Policy) -> Vec<u8> {
    let mut w = Writer::new();
    write_policy(&mut w, policy);
    w.into_bytes()
}

pub(crate) fn write_policy(w: &mut Writer, policy: &Policy) {
    w.put_str(&policy.name);
    w.put_str(&policy.version);
    w.put_str(&policy.source_hash);
    w.put_u32(policy.threshold);
    w.put_u32(policy.keys.len() as u32);
    for key in &policy.keys {
        w.put_str(key.as_str());
    }
}

pub(crate) fn read_policy(r: &mut Reader<'_>) -> Result<Policy, CodecError> {
    let name = r.str("policy.name")?;
    let version = r.str("policy.version")?;
    let source_hash = r.str("policy.source_hash")?;
    let threshold = r.u32("policy.threshold")?;
    let key_count = r.u32("policy.keys.len")?;
    let mut keys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        let armored = r.str("policy.keys[]")?;
        keys.push(
            crate::crypto::ArmoredKey::parse(&armored)
                .map_err(|_| CodecError::InvalidKey {
                    field: "policy.keys[]",
                })?,
        );
    }
    Ok(Policy {
        name,
        version,
        source_hash,
        threshold,
        keys,
    })
}

pub fn decode_policy(bytes: &[u8]) -> Result<Policy, CodecError> {
    let mut r = Reader::new(bytes);
    let policy = read_policy(&mut r)?;
    r.finish()?;
    Ok(policy)
}

/// Wire/storage form of a release. NOT the signed form: signatures cover
/// `encode_policy` only.
pub fn encode_release(release: &Release) -> Vec<u8> {
    let mut w = Writer::new();
    write_release(&mut w, release);
    w.into_bytes()
}

pub fn write_release(w: &mut Writer, release: &Release) {
    write_policy(w, &release.policy);
    w.put_u32(release.signatures.len() as u32);
    for sig in &release.signatures {
        w.put_sig(sig);
    }
    w.put_bool(release.verify_build);
}

pub fn read_release(r: &mut Reader<'_>) -> Result<Release, CodecError> {
    let policy = read_policy(r)?;
    let sig_count = r.u32("release.signatures.len")?;
    let mut signatures = Vec::with_capacity(sig_count as usize);
    for _ in 0..sig_count {
        signatures.push(r.sig("release.signatures[]")?);
    }
    let verify_build = r.bool("release.verify_build")?;
    Ok(Release {
        policy,
        signatures,
        verify_build,
    })
}

pub fn decode_release(bytes: &[u8]) -> Result<Release, CodecError> {
    let mut r = Reader::new(bytes);
    let release = read_release(&mut r)?;
    r.finish()?;
    Ok(release)
}

// ---------------------------------------------------------------------------
// Witness
// ---------------------------------------------------------------------------

pub fn encode_witness(witness: &Witness) -> Vec<u8> {
    let mut w = Writer::new();
    write_witness(&mut w, witness);
    w.into_bytes()
}

pub(crate) fn write_witness(w: &mut Writer, witness: &Witness) {
    w.put_i64(witness.timestamp);
    w.put_hash(&witness.root);
    w.put_u32(witness.signature.shares().len() as u32);
    for sig in witness.signature.shares() {
        w.put_sig(sig);
    }
    w.put_u32(witness.proofs.len() as u32);
    for (name, proof) in &witness.proofs {
        w.put_str(name);
        write_proof(w, proof);
    }
}

pub(crate) fn read_witness(r: &mut Reader<'_>) -> Result<Witness, CodecError> {
    let timestamp = r.i64("witness.timestamp")?;
    let root = r.hash("witness.root")?;
    let share_count = r.u32("witness.signature.len")?;
    let mut shares = Vec::with_capacity(share_count as usize);
    for _ in 0..share_count {
        shares.push(r.sig("witness.signature[]")?);
    }
    let proof_count = r.u32("witness.proofs.len")?;
    let mut proofs = Vec::with_capacity(proof_count as usize);
    for _ in 0..proof_count {
        let name = r.str("witness.proofs[].name")?;
        let proof = read_proof(r)?;
        proofs.push((name, proof));
    }
    Ok(Witness {
        timestamp,
        root,
        signature: AggregateSignature::new(shares),
        proofs,
    })
}

pub fn decode_witness(bytes: &[u8]) -> Result<Witness, CodecError> {
    let mut r = Reader::new(bytes);
    let witness = read_witness(&mut r)?;
    r.finish()?;
    Ok(witness)
}

fn write_proof(w: &mut Writer, proof: &InclusionProof) {
    w.put_u32(proof.leaf_index);
    w.put_u32(proof.path.len() as u32);
    for step in &proof.path {
        w.put_u8(match step.side {
            Side::Left => 0,
            Side::Right => 1,
        });
        w.put_hash(&step.sibling);
    }
}

fn read_proof(r: &mut Reader<'_>) -> Result<InclusionProof, CodecError> {
    let leaf_index = r.u32("proof.leaf_index")?;
    let step_count = r.u32("proof.path.len")?;
    let mut path = Vec::with_capacity(step_count as usize);
    for _ in 0..step_count {
        let side = match r.u8("proof.path[].side")? {
            0 => Side::Left,
            1 => Side::Right,
            tag => {
                return Err(CodecError::InvalidTag {
                    field: "proof.path[].side",
                    tag,
                })
            }
        };
        let sibling = r.hash("proof.path[].sibling")?;
        path.push(ProofStep { side, sibling });
    }
    Ok(InclusionProof { leaf_index, path })
}

// ---------------------------------------------------------------------------
// Collective-signing message
// ---------------------------------------------------------------------------

/// The message the committee collectively signs for one epoch:
/// `BE int64(timestamp) ‖ root_bytes`, 40 bytes total.
pub fn encode_signed_pair(root: &Hash, timestamp: i64) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_i64(timestamp);
    w.put_hash(root);
    w.into_bytes()
}

/// Split a collectively signed message back into `(root, timestamp)`.
pub fn decode_signed_pair(bytes: &[u8]) -> Result<(Hash, i64), CodecError> {
    let mut r = Reader::new(bytes);
    let timestamp = r.i64("pair.timestamp")?;
    let root = r.hash("pair.root")?;
    r.finish()?;
    Ok((root, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ArmoredKey;
    use crate::types::PubKey;

    fn sample_policy() -> Policy {
        Policy {
            name: "zlib".into(),
            version: "1.2.8".into(),
            source_hash: "feed".into(),
            threshold: 2,
            keys: vec![
                ArmoredKey::from_public(&PubKey([1; 32])),
                ArmoredKey::from_public(&PubKey([2; 32])),
            ],
        }
    }

    #[test]
    fn policy_encoding_is_deterministic() {
        let a = sample_policy();
        let b = sample_policy();
        assert_eq!(encode_policy(&a), encode_policy(&b));
    }

    #[test]
    fn policy_encoding_distinguishes_fields() {
        let a = sample_policy();
        let mut b = sample_policy();
        b.version = "1.2.9".into();
        assert_ne!(encode_policy(&a), encode_policy(&b));
    }

    #[test]
    fn policy_roundtrip() {
        let policy = sample_policy();
        let decoded = decode_policy(&encode_policy(&policy)).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn release_roundtrip() {
        let release = Release {
            policy: sample_policy(),
            signatures: vec![SigBytes([9; 64]), SigBytes([8; 64])],
            verify_build: true,
        };
        let decoded = decode_release(&encode_release(&release)).unwrap();
        assert_eq!(decoded, release);
    }

    #[test]
    fn truncated_policy_fails() {
        let bytes = encode_policy(&sample_policy());
        let err = decode_policy(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut bytes = encode_policy(&sample_policy());
        bytes.push(0xff);
        let err = decode_policy(&bytes).unwrap_err();
        assert_eq!(err, CodecError::TrailingBytes { remaining: 1 });
    }

    #[test]
    fn signed_pair_layout() {
        let root = Hash([0xaa; 32]);
        let bytes = encode_signed_pair(&root, 0x0102_0304);
        assert_eq!(bytes.len(), 40);
        // Big-endian timestamp first, then the raw root.
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(&bytes[8..], root.as_bytes());
        let (r, t) = decode_signed_pair(&bytes).unwrap();
        assert_eq!(r, root);
        assert_eq!(t, 0x0102_0304);
    }

    #[test]
    fn signed_pair_rejects_short_input() {
        assert!(decode_signed_pair(&[0u8; 39]).is_err());
    }
}
