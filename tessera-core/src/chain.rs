//! Content-addressed chain blocks.
//!
//! Each block holds one release and the id of its parent; the block id is
//! the BLAKE3 hash of the canonical block encoding, so a chain head
//! authenticates the whole history behind it.

use tessera_model::codec::{self, CodecError, Reader, Writer};
use tessera_model::crypto;
use tessera_model::policy::Release;
use tessera_model::types::Hash;
use thiserror::Error;

use crate::verifier::ReleaseRejected;

/// One block of a package's update chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    /// Position in the chain; 0 for genesis, strictly increasing.
    pub index: u64,
    /// Parent block id; `None` only for genesis.
    pub parent: Option<Hash>,
    pub release: Release,
}

impl ChainBlock {
    /// Content address of this block.
    pub fn id(&self) -> Hash {
        crypto::content_hash(&self.encode())
    }

    /// Canonical block bytes (wire and persistence form).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.into_bytes()
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.put_u64(self.index);
        match &self.parent {
            Some(parent) => {
                w.put_u8(1);
                w.put_hash(parent);
            }
            None => w.put_u8(0),
        }
        codec::write_release(w, &self.release);
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let index = r.u64("block.index")?;
        let parent = match r.u8("block.parent.tag")? {
            0 => None,
            1 => Some(r.hash("block.parent")?),
            tag => {
                return Err(CodecError::InvalidTag {
                    field: "block.parent.tag",
                    tag,
                })
            }
        };
        let release = codec::read_release(r)?;
        Ok(Self {
            index,
            parent,
            release,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let block = Self::read(&mut r)?;
        r.finish()?;
        Ok(block)
    }
}

/// Chain operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error(transparent)]
    Rejected(#[from] ReleaseRejected),

    /// Lost an append race; retry against the returned head.
    #[error("previous block is no longer the head (current head {head})")]
    StalePrev { head: Hash },

    #[error("package {0:?} already has a chain")]
    PackageExists(String),

    #[error("unknown package {0:?}")]
    UnknownPackage(String),

    #[error("unknown block {0}")]
    UnknownBlock(Hash),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::crypto::ArmoredKey;
    use tessera_model::policy::Policy;
    use tessera_model::types::{PubKey, SigBytes};

    fn block(index: u64, parent: Option<Hash>) -> ChainBlock {
        ChainBlock {
            index,
            parent,
            release: Release {
                policy: Policy {
                    name: "bash".into(),
                    version: "5.0".into(),
                    source_hash: "00ff".into(),
                    threshold: 1,
                    keys: vec![ArmoredKey::from_public(&PubKey([3; 32]))],
                },
                signatures: vec![SigBytes([7; 64])],
                verify_build: false,
            },
        }
    }

    #[test]
    fn block_roundtrip() {
        let b = block(4, Some(Hash([9; 32])));
        assert_eq!(ChainBlock::decode(&b.encode()).unwrap(), b);
    }

    #[test]
    fn id_is_stable_and_content_sensitive() {
        let a = block(0, None);
        assert_eq!(a.id(), block(0, None).id());
        assert_ne!(a.id(), block(1, None).id());
        assert_ne!(a.id(), block(0, Some(Hash::ZERO)).id());
    }
}
