//! Channel-based committee simulation.
//!
//! A shared `CommitteeNetwork` broker connects member mailboxes; the
//! propagator and co-signer fan out over those mailboxes. Each member task
//! is parameterized by hooks so the network layer stays ignorant of chain
//! and witness semantics.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::keyring::KeyRing;
use tessera_core::net::{CollectiveSigner, HeadAnnounce, NetError, Propagator};
use tessera_model::types::{PubKey, SigBytes};
use tessera_model::witness::{AggregateSignature, Roster};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Mailbox capacity per member.
const MAILBOX_DEPTH: usize = 64;

/// Messages delivered to a committee member.
pub enum PeerMsg {
    /// A package gained a new head; acknowledge once adopted.
    Announce {
        announce: HeadAnnounce,
        ack: oneshot::Sender<()>,
    },
    /// A collective-signing round wants this member's share. Reply `None`
    /// to refuse. Dropping the reply slot counts as a refusal.
    Cosign {
        message: Vec<u8>,
        reply: oneshot::Sender<Option<SigBytes>>,
    },
}

/// Shared broker routing messages between committee members by public key.
#[derive(Clone, Default)]
pub struct CommitteeNetwork {
    mailboxes: Arc<RwLock<HashMap<PubKey, mpsc::Sender<PeerMsg>>>>,
}

impl CommitteeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member and hand back its mailbox receiver. A second
    /// registration under the same key replaces the first.
    pub async fn register(&self, member: PubKey) -> mpsc::Receiver<PeerMsg> {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        self.mailboxes.write().await.insert(member, tx);
        rx
    }

    async fn mailbox(&self, member: &PubKey) -> Option<mpsc::Sender<PeerMsg>> {
        self.mailboxes.read().await.get(member).cloned()
    }
}

/// Caller-supplied behavior of one committee member.
pub struct MemberHooks {
    /// Applied to every announced head.
    pub on_announce: Box<dyn FnMut(HeadAnnounce) + Send>,
    /// Predicate run on every collective-signing message before this member
    /// contributes its share.
    pub accept: Box<dyn Fn(&[u8]) -> bool + Send>,
}

/// A running committee member.
pub struct MemberHandle {
    pub pubkey: PubKey,
    task: JoinHandle<()>,
}

impl MemberHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn a member task: adopt announced heads, vet and sign co-signing
/// requests. The task exits when the broker drops its mailbox.
pub async fn spawn_member(
    keyring: KeyRing,
    network: &CommitteeNetwork,
    mut hooks: MemberHooks,
) -> MemberHandle {
    let pubkey = keyring.public_key();
    let mut rx = network.register(pubkey).await;

    let task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PeerMsg::Announce { announce, ack } => {
                    (hooks.on_announce)(announce);
                    let _ = ack.send(());
                }
                PeerMsg::Cosign { message, reply } => {
                    let share = if (hooks.accept)(&message) {
                        Some(keyring.sign(&message))
                    } else {
                        debug!(member = %keyring.public(), "refusing to co-sign");
                        None
                    };
                    let _ = reply.send(share);
                }
            }
        }
    });

    MemberHandle { pubkey, task }
}

/// Best-effort head broadcast over the broker.
pub struct SimPropagator {
    network: CommitteeNetwork,
    deadline: Duration,
}

impl SimPropagator {
    pub fn new(network: CommitteeNetwork, deadline: Duration) -> Self {
        Self { network, deadline }
    }
}

#[async_trait]
impl Propagator for SimPropagator {
    async fn propagate(
        &self,
        roster: &Roster,
        announce: HeadAnnounce,
    ) -> Result<usize, NetError> {
        let mut pending = Vec::with_capacity(roster.len());
        for member in &roster.members {
            let Ok(pubkey) = member.public_bytes() else {
                warn!(member = %member, "unparseable roster key, skipping");
                continue;
            };
            let Some(mailbox) = self.network.mailbox(&pubkey).await else {
                debug!(member = %member, "member not reachable");
                continue;
            };
            let (ack_tx, ack_rx) = oneshot::channel();
            let msg = PeerMsg::Announce {
                announce: announce.clone(),
                ack: ack_tx,
            };
            if mailbox.send(msg).await.is_ok() {
                pending.push(ack_rx);
            }
        }

        let deadline = tokio::time::Instant::now() + self.deadline;
        let mut acks = 0;
        for rx in pending {
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(())) => acks += 1,
                // Member dropped the ack slot; count nothing.
                Ok(Err(_)) => {}
                // Deadline elapsed; return what we have.
                Err(_) => break,
            }
        }
        Ok(acks)
    }
}

/// One collective signing round over the broker.
///
/// Every member vets the message before contributing; a single refusal or
/// an unreachable member fails the round, because the aggregate must carry
/// one share per roster slot.
pub struct SimCosigner {
    network: CommitteeNetwork,
    round_timeout: Duration,
}

impl SimCosigner {
    pub fn new(network: CommitteeNetwork, round_timeout: Duration) -> Self {
        Self {
            network,
            round_timeout,
        }
    }
}

#[async_trait]
impl CollectiveSigner for SimCosigner {
    async fn sign(
        &self,
        roster: &Roster,
        message: Vec<u8>,
    ) -> Result<AggregateSignature, NetError> {
        let mut pending = Vec::with_capacity(roster.len());
        for member in &roster.members {
            let pubkey = member
                .public_bytes()
                .map_err(|_| NetError::Refused(format!("unparseable roster key {member}")))?;
            let mailbox = self
                .network
                .mailbox(&pubkey)
                .await
                .ok_or(NetError::Closed)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            mailbox
                .send(PeerMsg::Cosign {
                    message: message.clone(),
                    reply: reply_tx,
                })
                .await
                .map_err(|_| NetError::Closed)?;
            pending.push((member.clone(), reply_rx));
        }

        let deadline = tokio::time::Instant::now() + self.round_timeout;
        let mut shares = Vec::with_capacity(pending.len());
        for (member, rx) in pending {
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(Some(share))) => shares.push(share),
                Ok(Ok(None)) | Ok(Err(_)) => {
                    return Err(NetError::Refused(member.to_string()));
                }
                Err(_) => return Err(NetError::Timeout),
            }
        }
        Ok(AggregateSignature::new(shares))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::chain::ChainBlock;
    use tessera_model::crypto::ArmoredKey;
    use tessera_model::policy::{Policy, Release};

    fn announce() -> HeadAnnounce {
        let policy = Policy {
            name: "sed".into(),
            version: "4.4".into(),
            source_hash: "0123".into(),
            threshold: 1,
            keys: vec![ArmoredKey::from_public(&PubKey([1; 32]))],
        };
        let block = ChainBlock {
            index: 0,
            parent: None,
            release: Release {
                policy,
                signatures: vec![SigBytes([0; 64])],
                verify_build: false,
            },
        };
        HeadAnnounce {
            name: "sed".into(),
            genesis: block.id(),
            block,
        }
    }

    async fn committee(n: usize, accept: bool) -> (Vec<KeyRing>, Roster, CommitteeNetwork, Arc<AtomicUsize>) {
        let network = CommitteeNetwork::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let mut rings = Vec::new();
        for _ in 0..n {
            let ring = KeyRing::generate();
            let counter = seen.clone();
            spawn_member(
                ring.clone(),
                &network,
                MemberHooks {
                    on_announce: Box::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                    accept: Box::new(move |_| accept),
                },
            )
            .await;
            rings.push(ring);
        }
        let roster = Roster::new(rings.iter().map(|r| r.public()).collect());
        (rings, roster, network, seen)
    }

    #[tokio::test]
    async fn propagate_reaches_all_members() {
        let (_, roster, network, seen) = committee(4, true).await;
        let propagator = SimPropagator::new(network, Duration::from_secs(5));
        let acks = propagator.propagate(&roster, announce()).await.unwrap();
        assert_eq!(acks, 4);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn propagate_counts_only_reachable_members() {
        let (mut rings, _, network, _) = committee(3, true).await;
        // A member that never registered.
        rings.push(KeyRing::generate());
        let roster = Roster::new(rings.iter().map(|r| r.public()).collect());
        let propagator = SimPropagator::new(network, Duration::from_secs(5));
        let acks = propagator.propagate(&roster, announce()).await.unwrap();
        assert_eq!(acks, 3);
    }

    #[tokio::test]
    async fn cosign_round_aggregates_in_roster_order() {
        let (_, roster, network, _) = committee(3, true).await;
        let signer = SimCosigner::new(network, Duration::from_secs(5));
        let msg = b"root and timestamp".to_vec();
        let aggregate = signer.sign(&roster, msg.clone()).await.unwrap();
        assert!(roster.verify_aggregate(&msg, &aggregate));
    }

    #[tokio::test]
    async fn cosign_round_fails_on_refusal() {
        let (_, roster, network, _) = committee(3, false).await;
        let signer = SimCosigner::new(network, Duration::from_secs(5));
        let err = signer.sign(&roster, b"msg".to_vec()).await.unwrap_err();
        assert!(matches!(err, NetError::Refused(_)));
    }

    #[tokio::test]
    async fn cosign_round_fails_when_member_missing() {
        let (mut rings, _, network, _) = committee(2, true).await;
        rings.push(KeyRing::generate());
        let roster = Roster::new(rings.iter().map(|r| r.public()).collect());
        let signer = SimCosigner::new(network, Duration::from_secs(1));
        let err = signer.sign(&roster, b"msg".to_vec()).await.unwrap_err();
        assert_eq!(err, NetError::Closed);
    }
}
