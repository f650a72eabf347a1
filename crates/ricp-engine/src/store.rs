//! Whole-file replace-on-write persistence for the append-only stores.
//!
//! Three logical stores back the control plane: the mortality records, the
//! fingerprint index, and the canonical lineage. Each is read in full at
//! process start and rewritten in full (write-temp-then-rename) after each
//! run, so a reader always sees either the prior complete state or the
//! newest complete state, never a partial write. Single writer per store.
//!
//! A store that fails to parse is replaced by a freshly initialized empty
//! store with a warning; corruption is never propagated and missing
//! history is never treated as anything but absence.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::firewall::FingerprintIndex;
use crate::mortality::MortalityTracker;
use crate::promotion::CanonicalLineage;

/// Envelope schema version; a mismatch is treated as corruption.
pub const STORE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors from store persistence. Load-side corruption never surfaces as
/// an error; only write-side failures do.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// On-disk wrapper for a store payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreEnvelope<T> {
    schema_version: u32,
    recorded_at: DateTime<Utc>,
    payload: T,
}

/// Load a store payload, falling back to `Default` on absence, parse
/// failure, or schema mismatch.
fn load_payload<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return T::default(),
    };
    match serde_json::from_slice::<StoreEnvelope<T>>(&bytes) {
        Ok(envelope) if envelope.schema_version == STORE_SCHEMA_VERSION => envelope.payload,
        Ok(envelope) => {
            warn!(
                path = %path.display(),
                found = envelope.schema_version,
                expected = STORE_SCHEMA_VERSION,
                "store schema mismatch, starting from an empty store"
            );
            T::default()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "store failed to parse, starting from an empty store"
            );
            T::default()
        }
    }
}

/// Persist a store payload atomically: write a sibling temp file, then
/// rename over the target (last writer wins at file granularity).
fn persist_payload<T: Serialize>(path: &Path, payload: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let envelope = StoreEnvelope {
        schema_version: STORE_SCHEMA_VERSION,
        recorded_at: Utc::now(),
        payload,
    };
    let bytes = serde_json::to_vec_pretty(&envelope)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ControlPlaneStores
// ---------------------------------------------------------------------------

/// The three persisted stores, loaded as a unit before a run and persisted
/// as a unit after it.
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneStores {
    pub mortality: MortalityTracker,
    pub fingerprints: FingerprintIndex,
    pub lineage: CanonicalLineage,
}

impl ControlPlaneStores {
    /// Read all three stores in full from `root`.
    pub fn load(root: &Path) -> Self {
        let paths = StorePaths::new(root);
        Self {
            mortality: load_payload(&paths.mortality),
            fingerprints: load_payload(&paths.fingerprints),
            lineage: load_payload(&paths.lineage),
        }
    }

    /// Rewrite all three stores in full under `root`.
    pub fn persist(&self, root: &Path) -> Result<(), StoreError> {
        let paths = StorePaths::new(root);
        persist_payload(&paths.mortality, &self.mortality)?;
        persist_payload(&paths.fingerprints, &self.fingerprints)?;
        persist_payload(&paths.lineage, &self.lineage)?;
        Ok(())
    }
}

/// File layout under the store root.
#[derive(Debug, Clone)]
struct StorePaths {
    mortality: PathBuf,
    fingerprints: PathBuf,
    lineage: PathBuf,
}

impl StorePaths {
    fn new(root: &Path) -> Self {
        Self {
            mortality: root.join("mortality.json"),
            fingerprints: root.join("fingerprint_index.json"),
            lineage: root.join("canonical_lineage.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
