//! Tessera Model
//!
//! Pure data types for the Tessera update-authentication system, decoupled
//! from networking, persistence and the service runtime. Everything in this
//! crate is deterministic and side-effect free.

pub mod clock;
pub mod codec;
pub mod crypto;
pub mod merkle;
pub mod policy;
pub mod types;
pub mod witness;

// Re-exports from dependencies
pub use uuid::Uuid;

pub use clock::{Clock, MockClock, SystemClock};
pub use codec::CodecError;
pub use crypto::ArmoredKey;
pub use merkle::{InclusionProof, MerkleTree};
pub use policy::{Policy, PolicyError, Release};
pub use types::{Hash, PubKey, SigBytes};
pub use witness::{AggregateSignature, Roster, Witness};
