//! Service facade.
//!
//! Exposes the client operations and serializes access to the chain store
//! and the witness slot behind one lock. Lookups take a read share; writes
//! take the lock exclusively. The lock is never held across propagation,
//! signing, or the disk flush; mutations snapshot what they need, release,
//! then do their I/O.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use tessera_core::chain::{ChainBlock, ChainError};
use tessera_core::net::{CollectiveSigner, HeadAnnounce, NetError, Propagator};
use tessera_core::store::ChainStore;
use tessera_core::verifier::ReleaseRejected;
use tessera_model::clock::Clock;
use tessera_model::codec::CodecError;
use tessera_model::merkle::InclusionProof;
use tessera_model::policy::Release;
use tessera_model::types::Hash;
use tessera_model::witness::{Roster, Witness};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::engine::EngineHandle;
use crate::persist::{self, PersistError};

/// The mutable node state: every chain plus the current witness. Guarded by
/// the facade's lock; the engine shares the same view.
#[derive(Debug, Default)]
pub struct ServiceState {
    pub store: ChainStore,
    pub witness: Option<Witness>,
}

/// Operation failure surfaced to clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(#[from] ReleaseRejected),

    /// Lost an append race; retry against the head carried here.
    #[error("previous block is no longer the head (current head {head})")]
    StalePrev { head: Hash },

    #[error("package {0:?} already exists")]
    PackageExists(String),

    #[error("unknown package {0:?}")]
    UnknownPackage(String),

    #[error("unknown block {0}")]
    UnknownBlock(Hash),

    #[error("no witness produced yet")]
    WitnessMissing,

    #[error("propagation failed: {0}")]
    Propagation(#[from] NetError),

    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),

    #[error("no roster configured")]
    RosterMissing,

    #[error("state lock poisoned")]
    LockPoisoned,
}

impl From<ChainError> for ServiceError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Rejected(r) => Self::Rejected(r),
            ChainError::StalePrev { head } => Self::StalePrev { head },
            ChainError::PackageExists(name) => Self::PackageExists(name),
            ChainError::UnknownPackage(name) => Self::UnknownPackage(name),
            ChainError::UnknownBlock(id) => Self::UnknownBlock(id),
        }
    }
}

/// Start a new package chain. The first call on a node also installs the
/// committee roster and brings the timestamp engine up.
#[derive(Debug, Clone)]
pub struct CreatePackage {
    pub roster: Roster,
    /// Skip-list base requested by the submitter. Recorded only; the chain
    /// layer decides its own link structure.
    pub base: u32,
    /// Skip-list height requested by the submitter. Recorded only.
    pub height: u32,
    pub release: Release,
}

/// Append a release to an existing chain.
#[derive(Debug, Clone)]
pub struct UpdatePackage {
    /// The head the submitter believes is current.
    pub prev: Hash,
    pub release: Release,
}

/// Genesis and current head of a package chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageChain {
    pub first: Hash,
    pub last: Hash,
}

/// The current witness plus the blocks from a known block to the head.
#[derive(Debug, Clone)]
pub struct ChainUpdate {
    pub witness: Witness,
    pub blocks: Vec<ChainBlock>,
}

/// Batched form of [`ChainUpdate`]: chains are concatenated, with the
/// per-chain block count alongside.
#[derive(Debug, Clone)]
pub struct ChainUpdates {
    pub witness: Witness,
    pub blocks: Vec<ChainBlock>,
    pub lengths: Vec<u64>,
}

/// One Tessera service node.
pub struct Service {
    state: Arc<RwLock<ServiceState>>,
    roster: OnceLock<Roster>,
    propagator: Arc<dyn Propagator>,
    engine: EngineHandle,
    config: ServiceConfig,
    data_dir: Option<PathBuf>,
}

impl Service {
    /// Build a node, loading persisted state when a data directory is given.
    /// A state file that fails to decode aborts startup.
    pub fn new(
        propagator: Arc<dyn Propagator>,
        signer: Arc<dyn CollectiveSigner>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, ServiceError> {
        let state = match &data_dir {
            Some(dir) => persist::load(dir)?.unwrap_or_default(),
            None => ServiceState::default(),
        };
        let state = Arc::new(RwLock::new(state));
        let engine = EngineHandle::new(
            state.clone(),
            signer,
            clock,
            config.clone(),
            data_dir.clone(),
        );
        Ok(Self {
            state,
            roster: OnceLock::new(),
            propagator,
            engine,
            config,
            data_dir,
        })
    }

    /// Shared view of the node state, for committee hooks and tests.
    pub fn state(&self) -> Arc<RwLock<ServiceState>> {
        self.state.clone()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn roster(&self) -> Option<&Roster> {
        self.roster.get()
    }

    /// Stop the timestamp engine, letting any in-flight epoch finish.
    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    /// Create the chain for a new package from its genesis release.
    pub async fn create_package(&self, req: CreatePackage) -> Result<PackageChain, ServiceError> {
        if self.roster.get().is_none() && self.roster.set(req.roster.clone()).is_ok() {
            self.engine.start(req.roster.clone());
        }
        debug!(
            package = %req.release.policy.name,
            version = %req.release.policy.version,
            base = req.base,
            height = req.height,
            "creating package"
        );

        let (genesis, announce, saved) = {
            let mut state = self.state.write().map_err(|_| ServiceError::LockPoisoned)?;
            let genesis = state.store.create(req.release)?;
            let block = state
                .store
                .block(&genesis)
                .cloned()
                .expect("genesis block just inserted");
            let announce = HeadAnnounce {
                name: block.release.policy.name.clone(),
                genesis,
                block,
            };
            (genesis, announce, persist::encode_state(&state))
        };

        self.finish_mutation(announce, saved).await?;
        Ok(PackageChain {
            first: genesis,
            last: genesis,
        })
    }

    /// Append a release to its package chain; returns the new head id.
    pub async fn update_package(&self, req: UpdatePackage) -> Result<Hash, ServiceError> {
        let (head, announce, saved) = {
            let mut state = self.state.write().map_err(|_| ServiceError::LockPoisoned)?;
            let head = state.store.append(req.prev, req.release)?;
            let block = state
                .store
                .block(&head)
                .cloned()
                .expect("head block just inserted");
            let genesis = state
                .store
                .get(&block.release.policy.name)
                .expect("appended chain has an entry")
                .genesis;
            let announce = HeadAnnounce {
                name: block.release.policy.name.clone(),
                genesis,
                block,
            };
            (head, announce, persist::encode_state(&state))
        };

        self.finish_mutation(announce, saved).await?;
        Ok(head)
    }

    /// Save, propagate and nudge the engine, all outside the state lock.
    async fn finish_mutation(
        &self,
        announce: HeadAnnounce,
        saved: Vec<u8>,
    ) -> Result<(), ServiceError> {
        if announce.block.release.verify_build {
            debug!(
                package = %announce.name,
                "reproducible build requested; timings are recorded out of band"
            );
        }
        if let Some(dir) = &self.data_dir {
            // A failed save is reported but never fails the operation.
            if let Err(e) = persist::save(dir, &saved) {
                warn!("failed to persist state: {e}");
            }
        }

        let roster = self.roster.get().ok_or(ServiceError::RosterMissing)?;
        let acks = self.propagator.propagate(roster, announce).await?;
        if acks < roster.len() {
            warn!(acks, members = roster.len(), "partial propagation");
        }

        self.engine.kick();
        Ok(())
    }

    /// Genesis and current head for one package.
    pub fn package_sc(&self, name: &str) -> Result<PackageChain, ServiceError> {
        let state = self.state.read().map_err(|_| ServiceError::LockPoisoned)?;
        let entry = state
            .store
            .get(name)
            .ok_or_else(|| ServiceError::UnknownPackage(name.to_string()))?;
        Ok(PackageChain {
            first: entry.genesis,
            last: entry.head,
        })
    }

    /// The blocks from `known` up to the current head of its chain,
    /// together with the current witness.
    pub fn latest_block(&self, known: Hash) -> Result<ChainUpdate, ServiceError> {
        let state = self.state.read().map_err(|_| ServiceError::LockPoisoned)?;
        let blocks = state.store.chain_to_head(known)?;
        let witness = state.witness.clone().ok_or(ServiceError::WitnessMissing)?;
        Ok(ChainUpdate { witness, blocks })
    }

    /// Batched [`Self::latest_block`]. Chains that have not moved past
    /// their known block are omitted.
    pub fn latest_blocks(&self, known: &[Hash]) -> Result<ChainUpdates, ServiceError> {
        let state = self.state.read().map_err(|_| ServiceError::LockPoisoned)?;
        let witness = state.witness.clone().ok_or(ServiceError::WitnessMissing)?;
        let mut blocks = Vec::new();
        let mut lengths = Vec::new();
        for id in known {
            let chain = state.store.chain_to_head(*id)?;
            if chain.len() > 1 {
                lengths.push(chain.len() as u64);
                blocks.extend(chain);
            }
        }
        Ok(ChainUpdates {
            witness,
            blocks,
            lengths,
        })
    }

    /// The current witness.
    pub fn witness(&self) -> Result<Witness, ServiceError> {
        let state = self.state.read().map_err(|_| ServiceError::LockPoisoned)?;
        state.witness.clone().ok_or(ServiceError::WitnessMissing)
    }

    /// Inclusion proof of one package's head in the current witness.
    pub fn timestamp_proof(&self, name: &str) -> Result<InclusionProof, ServiceError> {
        let state = self.state.read().map_err(|_| ServiceError::LockPoisoned)?;
        if state.store.get(name).is_none() {
            return Err(ServiceError::UnknownPackage(name.to_string()));
        }
        let witness = state.witness.as_ref().ok_or(ServiceError::WitnessMissing)?;
        witness
            .proof_for(name)
            .cloned()
            // The package exists but postdates the witness.
            .ok_or(ServiceError::WitnessMissing)
    }

    /// Inclusion proofs for several packages at once.
    pub fn timestamp_proofs(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, InclusionProof>, ServiceError> {
        let mut proofs = BTreeMap::new();
        for name in names {
            proofs.insert(name.clone(), self.timestamp_proof(name)?);
        }
        Ok(proofs)
    }
}
