//! In-memory committee network for Tessera
//!
//! Provides:
//! - `CommitteeNetwork` — a broker routing messages to per-member mailboxes
//! - `spawn_member` — a committee member task driven by caller hooks
//! - `SimPropagator` — best-effort head broadcast with ack counting
//! - `SimCosigner` — a collective signing round over tokio channels
//!
//! Enables multi-node propagation and witness testing without real
//! networking.

mod committee;

pub use committee::{
    spawn_member, CommitteeNetwork, MemberHandle, MemberHooks, PeerMsg, SimCosigner,
    SimPropagator,
};
