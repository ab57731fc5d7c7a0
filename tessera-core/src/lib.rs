//! Tessera Core
//!
//! Per-package update chains, the release acceptance predicate, the chain
//! store, and the traits the committee network implements.

pub mod chain;
pub mod keyring;
pub mod net;
pub mod store;
pub mod verifier;

pub use chain::{ChainBlock, ChainError};
pub use keyring::{KeyRing, KeyRingError};
pub use net::{CollectiveSigner, HeadAnnounce, NetError, Propagator};
pub use store::{ChainEntry, ChainStore};
pub use verifier::{verify_release, ChainContext, ReleaseRejected};

// The verify-by-public-key free function; re-exported so callers need not
// reach into the model crate.
pub use tessera_model::crypto::verify;
