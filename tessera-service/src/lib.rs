//! Tessera Service
//!
//! The node-facing layer: the timestamp engine that produces one collective
//! witness per epoch, the facade exposing client operations, canonical
//! persistence, and snapshot ingestion.

pub mod config;
pub mod engine;
pub mod facade;
pub mod ingest;
pub mod persist;

pub use config::ServiceConfig;
pub use engine::{check_signed_pair, EngineError, EngineHandle};
pub use facade::{
    ChainUpdate, ChainUpdates, CreatePackage, PackageChain, Service, ServiceError, ServiceState,
    UpdatePackage,
};
pub use ingest::{parse_snapshot, ReleaseSigner, SnapshotRecord};
