//! Snapshot ingestion.
//!
//! Upstream snapshot dumps arrive as comma-separated records of exactly six
//! fields:
//!
//! ```text
//! snapshot_timestamp,name,version,source_hash,space_separated_binaries,binaries_size
//! ```
//!
//! The first line is a header. A record that fails to parse is skipped with
//! a warning; a malformed binaries size is coerced to zero, matching the
//! dumps in circulation.

use chrono::NaiveDateTime;
use tessera_core::keyring::KeyRing;
use tessera_model::codec;
use tessera_model::policy::{Policy, Release};
use thiserror::Error;
use tracing::warn;

/// Timestamp layout of the snapshot field, e.g. `20170102150405`.
const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("expected six fields, got {0}")]
    FieldCount(usize),

    #[error("unparseable snapshot timestamp {0:?}")]
    BadTimestamp(String),
}

/// One parsed snapshot record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub snapshot: String,
    pub time: NaiveDateTime,
    pub name: String,
    pub version: String,
    pub source_hash: String,
    pub binaries: Vec<String>,
    pub binaries_size: u64,
}

impl SnapshotRecord {
    fn parse(line: &str) -> Result<Self, IngestError> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 6 {
            return Err(IngestError::FieldCount(fields.len()));
        }
        let time = NaiveDateTime::parse_from_str(fields[0], SNAPSHOT_TIME_FORMAT)
            .map_err(|_| IngestError::BadTimestamp(fields[0].to_string()))?;
        let binaries_size = fields[5].parse().unwrap_or_else(|_| {
            warn!(package = fields[1], "unreadable binaries size, using 0");
            0
        });
        Ok(Self {
            snapshot: fields[0].to_string(),
            time,
            name: fields[1].to_string(),
            version: fields[2].to_string(),
            source_hash: fields[3].to_string(),
            binaries: fields[4].split(' ').map(str::to_string).collect(),
            binaries_size,
        })
    }
}

/// Parse a whole snapshot dump, skipping the header line and any record
/// that fails to parse.
pub fn parse_snapshot(content: &str) -> Vec<SnapshotRecord> {
    let mut records = Vec::new();
    for line in content.lines().skip(1) {
        if line.is_empty() {
            continue;
        }
        match SnapshotRecord::parse(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping snapshot record: {e}"),
        }
    }
    records
}

/// Builds signed releases from snapshot records.
///
/// The key rings are injected rather than drawn from a process-wide
/// singleton. A simulation can hand over a single demo ring; the signer
/// grows its ring list with fresh keys up to the policy threshold, so every
/// policy slot carries a distinct key and the same signer set endorses
/// every release it produces.
pub struct ReleaseSigner {
    rings: Vec<KeyRing>,
}

impl ReleaseSigner {
    pub fn new(rings: Vec<KeyRing>) -> Self {
        Self { rings }
    }

    /// Sign `record` as a release with `threshold` policy slots.
    pub fn release_for(&mut self, record: &SnapshotRecord, threshold: u32) -> Release {
        while self.rings.len() < threshold as usize {
            self.rings.push(KeyRing::generate());
        }
        let policy = Policy {
            name: record.name.clone(),
            version: record.version.clone(),
            source_hash: record.source_hash.clone(),
            threshold,
            keys: self.rings[..threshold as usize]
                .iter()
                .map(|r| r.public())
                .collect(),
        };
        let signed_bytes = codec::encode_policy(&policy);
        let signatures = self.rings[..threshold as usize]
            .iter()
            .map(|r| r.sign(&signed_bytes))
            .collect();
        Release {
            policy,
            signatures,
            verify_build: false,
        }
    }
}
