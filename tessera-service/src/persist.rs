//! Canonical on-disk state.
//!
//! The whole node state (every chain plus the current witness) is one
//! file in the canonical encoding. Saving after a reload yields the same
//! bytes. An absent or empty file means a fresh store; a file that fails
//! to decode aborts startup rather than serving a partial view.

use std::fs;
use std::io;
use std::path::Path;
use tessera_core::store::ChainStore;
use tessera_model::codec::{self, CodecError, Reader, Writer};
use thiserror::Error;
use tracing::debug;

use crate::facade::ServiceState;

/// File name of the persisted state inside the data directory.
pub const STATE_FILE: &str = "swupdate.bin";

const FORMAT_VERSION: u8 = 1;

/// Save/load failure.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("unsupported state format {0}")]
    UnknownVersion(u8),
}

/// Canonical bytes of the full node state.
pub fn encode_state(state: &ServiceState) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u8(FORMAT_VERSION);
    w.put_bytes(&state.store.encode());
    match &state.witness {
        Some(witness) => {
            w.put_u8(1);
            w.put_bytes(&codec::encode_witness(witness));
        }
        None => w.put_u8(0),
    }
    w.into_bytes()
}

pub fn decode_state(bytes: &[u8]) -> Result<ServiceState, PersistError> {
    let mut r = Reader::new(bytes);
    let version = r.u8("state.version")?;
    if version != FORMAT_VERSION {
        return Err(PersistError::UnknownVersion(version));
    }
    let store = ChainStore::decode(r.bytes("state.store")?)?;
    let witness = match r.u8("state.witness.tag")? {
        0 => None,
        1 => Some(codec::decode_witness(r.bytes("state.witness")?)?),
        tag => {
            return Err(CodecError::InvalidTag {
                field: "state.witness.tag",
                tag,
            }
            .into())
        }
    };
    r.finish()?;
    Ok(ServiceState { store, witness })
}

/// Write the encoded state into `dir`.
pub fn save(dir: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(STATE_FILE);
    fs::write(&path, bytes)?;
    debug!(path = %path.display(), len = bytes.len(), "state saved");
    Ok(())
}

/// Load the state from `dir` if a non-empty state file exists.
pub fn load(dir: &Path) -> Result<Option<ServiceState>, PersistError> {
    let path = dir.join(STATE_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    let state = decode_state(&bytes)?;
    debug!(path = %path.display(), chains = state.store.len(), "state loaded");
    Ok(Some(state))
}
