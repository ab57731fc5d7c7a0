//! ChainStore: package name to update chain.
//!
//! Owns every chain head and every block body. Names are kept in a
//! `BTreeMap`, so `names_sorted` is the total lexicographic order: the
//! canonical package ordering the timestamp engine aggregates over, which
//! is what keeps per-package Merkle proofs stable across nodes.
//!
//! The store itself is not thread-safe; the service facade serializes
//! access.

use std::collections::{BTreeMap, HashMap};
use tessera_model::codec::{CodecError, Reader, Writer};
use tessera_model::types::Hash;
use tracing::debug;

use crate::chain::{ChainBlock, ChainError};
use crate::net::HeadAnnounce;
use crate::verifier::{verify_release, ChainContext};

/// Genesis and current head of one package chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub genesis: Hash,
    pub head: Hash,
}

/// All update chains known to this node.
#[derive(Debug, Default)]
pub struct ChainStore {
    chains: BTreeMap<String, ChainEntry>,
    blocks: HashMap<Hash, ChainBlock>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `release` as a genesis block and start a new chain for its
    /// package. Returns the genesis block id.
    pub fn create(&mut self, release: tessera_model::policy::Release) -> Result<Hash, ChainError> {
        let name = release.policy.name.clone();
        if self.chains.contains_key(&name) {
            return Err(ChainError::PackageExists(name));
        }
        verify_release(&release, ChainContext::Genesis)?;

        let block = ChainBlock {
            index: 0,
            parent: None,
            release,
        };
        let id = block.id();
        self.blocks.insert(id, block);
        self.chains.insert(name, ChainEntry { genesis: id, head: id });
        Ok(id)
    }

    /// Verify `release` as the successor of `prev` and advance the head.
    /// Returns the new head block id.
    ///
    /// Appends to one chain are serialized by the caller; a racer that read
    /// an outdated head observes `StalePrev` and must retry with the head
    /// carried in the error.
    pub fn append(
        &mut self,
        prev: Hash,
        release: tessera_model::policy::Release,
    ) -> Result<Hash, ChainError> {
        let name = release.policy.name.clone();
        let entry = *self
            .chains
            .get(&name)
            .ok_or_else(|| ChainError::UnknownPackage(name.clone()))?;
        if entry.head != prev {
            return Err(ChainError::StalePrev { head: entry.head });
        }

        let prev_block = self
            .blocks
            .get(&prev)
            .ok_or(ChainError::UnknownBlock(prev))?;
        verify_release(
            &release,
            ChainContext::Update {
                prev: &prev_block.release.policy,
            },
        )?;

        let block = ChainBlock {
            index: prev_block.index + 1,
            parent: Some(prev),
            release,
        };
        let id = block.id();
        self.blocks.insert(id, block);
        if let Some(entry) = self.chains.get_mut(&name) {
            entry.head = id;
        }
        Ok(id)
    }

    /// Adopt a head announced by a peer. The genesis mapping is kept from
    /// the first announcement; the head always moves to the announced block.
    pub fn apply_announce(&mut self, announce: HeadAnnounce) {
        let id = announce.block.id();
        debug!(package = %announce.name, head = %id, "adopting announced head");
        self.blocks.insert(id, announce.block);
        self.chains
            .entry(announce.name)
            .and_modify(|e| e.head = id)
            .or_insert(ChainEntry {
                genesis: announce.genesis,
                head: id,
            });
    }

    /// Genesis and current head for one package.
    pub fn get(&self, name: &str) -> Option<ChainEntry> {
        self.chains.get(name).copied()
    }

    pub fn block(&self, id: &Hash) -> Option<&ChainBlock> {
        self.blocks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// All package names in the canonical (lexicographic) order.
    pub fn names_sorted(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    /// `(name, head id)` pairs in canonical order, i.e. the Merkle leaves of
    /// the next witness.
    pub fn head_hashes(&self) -> Vec<(String, Hash)> {
        self.chains
            .iter()
            .map(|(name, entry)| (name.clone(), entry.head))
            .collect()
    }

    /// The blocks from `known` to the current head of its chain, inclusive,
    /// oldest first. Fails if `known` is not on the path behind the head.
    pub fn chain_to_head(&self, known: Hash) -> Result<Vec<ChainBlock>, ChainError> {
        let start = self
            .blocks
            .get(&known)
            .ok_or(ChainError::UnknownBlock(known))?;
        let entry = self
            .chains
            .get(&start.release.policy.name)
            .ok_or(ChainError::UnknownBlock(known))?;

        let mut chain = Vec::new();
        let mut cursor = Some(entry.head);
        while let Some(id) = cursor {
            let block = self.blocks.get(&id).ok_or(ChainError::UnknownBlock(id))?;
            chain.push(block.clone());
            if id == known {
                chain.reverse();
                return Ok(chain);
            }
            cursor = block.parent;
        }
        Err(ChainError::UnknownBlock(known))
    }

    // -----------------------------------------------------------------------
    // Persistence form
    // -----------------------------------------------------------------------

    /// Canonical store bytes. Chains come out in name order and blocks in
    /// id order, so equal stores encode to equal bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.chains.len() as u32);
        for (name, entry) in &self.chains {
            w.put_str(name);
            w.put_hash(&entry.genesis);
            w.put_hash(&entry.head);
        }
        let mut ids: Vec<&Hash> = self.blocks.keys().collect();
        ids.sort();
        w.put_u32(ids.len() as u32);
        for id in ids {
            self.blocks[id].write(&mut w);
        }
        w.into_bytes()
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let chain_count = r.u32("store.chains.len")?;
        let mut chains = BTreeMap::new();
        for _ in 0..chain_count {
            let name = r.str("store.chains[].name")?;
            let genesis = r.hash("store.chains[].genesis")?;
            let head = r.hash("store.chains[].head")?;
            chains.insert(name, ChainEntry { genesis, head });
        }
        let block_count = r.u32("store.blocks.len")?;
        let mut blocks = HashMap::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let block = ChainBlock::read(r)?;
            blocks.insert(block.id(), block);
        }
        Ok(Self { chains, blocks })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let store = Self::read(&mut r)?;
        r.finish()?;
        Ok(store)
    }
}
