//! Timestamp engine.
//!
//! One background task per node. While a roster is configured the engine
//! ticks every epoch: snapshot every chain head under a single lock, build
//! the SHA-256 Merkle tree, drive one collective signing round over
//! `BE int64(timestamp) ‖ root`, and atomically publish the resulting
//! witness. A failed round is logged and skipped; the previous witness
//! keeps being served.
//!
//! Until a roster arrives the engine is idle: witness requests queue in its
//! command channel and are answered by the first epoch after startup.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tessera_core::net::{CollectiveSigner, NetError};
use tessera_model::clock::Clock;
use tessera_model::codec;
use tessera_model::merkle::MerkleTree;
use tessera_model::types::Hash;
use tessera_model::witness::{Roster, Witness};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::facade::ServiceState;
use crate::persist;

/// Depth of the queued-request channel.
const REQUEST_DEPTH: usize = 64;

/// Why an epoch produced no witness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no packages to witness")]
    NoPackages,

    #[error("collective signing failed: {0}")]
    Signing(#[from] NetError),

    #[error("engine stopped")]
    Stopped,

    #[error("state lock poisoned")]
    StatePoisoned,
}

enum EngineCmd {
    /// Run an epoch as soon as possible; reply with its witness if a slot
    /// is attached. A dropped slot reads as failure on the caller side.
    RequestWitness {
        reply: Option<oneshot::Sender<Result<Witness, EngineError>>>,
    },
}

/// Handle owned by the service facade. Created idle; `start` brings the
/// epoch loop up once the roster is known.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCmd>,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
    state: Arc<RwLock<ServiceState>>,
    signer: Arc<dyn CollectiveSigner>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    data_dir: Option<PathBuf>,
}

struct Inner {
    cmd_rx: Option<mpsc::Receiver<EngineCmd>>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(
        state: Arc<RwLock<ServiceState>>,
        signer: Arc<dyn CollectiveSigner>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(REQUEST_DEPTH);
        Self {
            cmd_tx,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner {
                cmd_rx: Some(cmd_rx),
                task: None,
            }),
            state,
            signer,
            clock,
            config,
            data_dir,
        }
    }

    /// Transition idle → running. Later calls are no-ops; the roster is
    /// immutable once signing has started.
    pub fn start(&self, roster: Roster) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(cmd_rx) = inner.cmd_rx.take() else {
            debug!("engine already running");
            return;
        };
        let engine = TimestampEngine {
            state: self.state.clone(),
            signer: self.signer.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            data_dir: self.data_dir.clone(),
            roster,
            cmd_rx,
            cancel: self.cancel.clone(),
        };
        info!(
            epoch = ?self.config.epoch_duration,
            "starting timestamp engine"
        );
        inner.task = Some(tokio::spawn(engine.run()));
    }

    /// Ask for an epoch without waiting for its outcome. Used after every
    /// create/update so a fresh head is witnessed promptly.
    pub fn kick(&self) {
        let _ = self
            .cmd_tx
            .try_send(EngineCmd::RequestWitness { reply: None });
    }

    /// Run an epoch and wait for its witness.
    pub async fn force_epoch(&self) -> Result<Witness, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::RequestWitness { reply: Some(tx) })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Signal the engine to finish any in-flight epoch and exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = match self.inner.lock() {
            Ok(mut inner) => inner.task.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct TimestampEngine {
    state: Arc<RwLock<ServiceState>>,
    signer: Arc<dyn CollectiveSigner>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    data_dir: Option<PathBuf>,
    roster: Roster,
    cmd_rx: mpsc::Receiver<EngineCmd>,
    cancel: CancellationToken,
}

impl TimestampEngine {
    async fn run(mut self) {
        let epoch = self.config.epoch_duration;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + epoch, epoch);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut epochs = 0u32;

        loop {
            let mut replies = Vec::new();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCmd::RequestWitness { reply }) => {
                        replies.extend(reply);
                    }
                    None => break,
                }
            }
            // Coalesce whatever queued up behind the wakeup into one epoch.
            while let Ok(EngineCmd::RequestWitness { reply }) = self.cmd_rx.try_recv() {
                replies.extend(reply);
            }

            let outcome = self.run_epoch().await;
            match &outcome {
                Ok(witness) => {
                    debug!(root = %witness.root, timestamp = witness.timestamp, "witness published")
                }
                Err(EngineError::NoPackages) => debug!("no packages at epoch"),
                Err(e) => warn!("epoch skipped: {e}"),
            }
            for reply in replies {
                let _ = reply.send(outcome.clone());
            }

            epochs += 1;
            if self.config.max_iterations > 0 && epochs >= self.config.max_iterations {
                info!(epochs, "max iterations reached, leaving epoch loop");
                break;
            }
        }
        info!("timestamp engine stopped");
    }

    async fn run_epoch(&self) -> Result<Witness, EngineError> {
        // Snapshot names and heads under a single read lock, then release
        // before any signing I/O.
        let heads = {
            let state = self.state.read().map_err(|_| EngineError::StatePoisoned)?;
            state.store.head_hashes()
        };
        let leaves: Vec<Hash> = heads.iter().map(|(_, head)| *head).collect();
        let Some(tree) = MerkleTree::build(&leaves) else {
            return Err(EngineError::NoPackages);
        };

        let timestamp = self.clock.now_secs();
        let message = codec::encode_signed_pair(&tree.root, timestamp);

        let aggregate = tokio::time::timeout(
            self.config.cosign_timeout,
            self.signer.sign(&self.roster, message),
        )
        .await
        .map_err(|_| EngineError::Signing(NetError::Timeout))??;

        let witness = Witness {
            timestamp,
            root: tree.root,
            signature: aggregate,
            proofs: heads
                .into_iter()
                .map(|(name, _)| name)
                .zip(tree.proofs)
                .collect(),
        };

        let saved = {
            let mut state = self.state.write().map_err(|_| EngineError::StatePoisoned)?;
            state.witness = Some(witness.clone());
            persist::encode_state(&state)
        };
        if let Some(dir) = &self.data_dir {
            if let Err(e) = persist::save(dir, &saved) {
                warn!("failed to persist witness: {e}");
            }
        }
        Ok(witness)
    }
}

/// The predicate each committee member (and any client) runs against a
/// collectively signed message: the timestamp must be fresh and the root
/// must match the tree recomputed from the locally known heads.
pub fn check_signed_pair(
    state: &ServiceState,
    clock: &dyn Clock,
    reasonable_time: Duration,
    message: &[u8],
) -> bool {
    let Ok((signed_root, signed_time)) = codec::decode_signed_pair(message) else {
        warn!("malformed signing message");
        return false;
    };
    let age = clock.now_secs().saturating_sub(signed_time);
    if age > reasonable_time.as_secs() as i64 {
        debug!(age, "signed timestamp is too far in the past");
        return false;
    }
    let leaves: Vec<Hash> = state
        .store
        .head_hashes()
        .into_iter()
        .map(|(_, head)| head)
        .collect();
    let Some(tree) = MerkleTree::build(&leaves) else {
        debug!("no local packages to check the root against");
        return false;
    };
    if tree.root != signed_root {
        debug!(local = %tree.root, signed = %signed_root, "merkle root mismatch");
        return false;
    }
    true
}
