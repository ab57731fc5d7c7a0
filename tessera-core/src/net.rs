//! Committee network interfaces.
//!
//! The service depends only on these traits; the transport behind them is
//! swappable (the in-memory committee in `tessera-net-sim`, or a real
//! network stack).

use async_trait::async_trait;
use tessera_model::types::Hash;
use tessera_model::witness::{AggregateSignature, Roster};
use thiserror::Error;

use crate::chain::ChainBlock;

/// Payload broadcast to the committee when a chain gains a head.
#[derive(Debug, Clone)]
pub struct HeadAnnounce {
    pub name: String,
    pub genesis: Hash,
    pub block: ChainBlock,
}

/// Network-layer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("deadline elapsed before the round completed")]
    Timeout,

    #[error("a committee member refused to sign: {0}")]
    Refused(String),

    #[error("transport closed")]
    Closed,
}

/// Best-effort broadcast of new heads to every committee member.
///
/// Delivery to all members is NOT guaranteed. `propagate` returns the
/// number of acknowledgements collected before its deadline; the caller
/// decides whether a shortfall is worth a warning. Witness correctness
/// never depends on propagation having reached everyone.
#[async_trait]
pub trait Propagator: Send + Sync {
    async fn propagate(&self, roster: &Roster, announce: HeadAnnounce)
        -> Result<usize, NetError>;
}

/// One collective signing round: given a message and a roster, produce a
/// single aggregate signature verifiable against the roster.
///
/// The protocol behind the round is a black box; the call blocks for the
/// duration of the round.
#[async_trait]
pub trait CollectiveSigner: Send + Sync {
    async fn sign(&self, roster: &Roster, message: Vec<u8>)
        -> Result<AggregateSignature, NetError>;
}
