//! Bulk cache preloading from shipped bundles.
//!
//! A bundle maps cache keys to precomputed entries and typically ships
//! inside a software package so first builds start warm. Ingestion is
//! fail-safe per entry: one bad entry never aborts the rest, and valid
//! entries go through the normal store write path so downstream reads
//! cannot tell preloaded entries from freshly compiled ones.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::backend::CacheStore;
use crate::codec::{self, StorableEntry};
use crate::entry::ENTRY_FORMAT_VERSION;
use crate::error::CacheError;

/// A distributable bundle of precomputed cache entries.
///
/// Each value is a pre-serialized [`StorableEntry`] or a structurally
/// equivalent descriptor, carrying its own format-version tag.
#[derive(Debug, Clone, Default)]
pub struct PreloadBundle {
    entries: BTreeMap<String, serde_json::Value>,
}

impl PreloadBundle {
    /// Parses a bundle from its JSON text form: an object mapping cache
    /// keys to entry descriptors.
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        let entries = serde_json::from_str(json).map_err(|e| CacheError::Codec {
            reason: format!("invalid preload bundle: {e}"),
        })?;
        Ok(Self { entries })
    }

    /// Builds a bundle from key/descriptor pairs.
    pub fn from_entries(entries: BTreeMap<String, serde_json::Value>) -> Self {
        Self { entries }
    }

    /// Number of entries in the bundle.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the bundle holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counts of what a preload pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Entries validated and written to the store.
    pub loaded: usize,
    /// Entries skipped because the key already existed.
    pub skipped_existing: usize,
    /// Entries skipped for an unrecognized format version.
    pub skipped_version: usize,
    /// Entries skipped because they failed to decode or store.
    pub skipped_invalid: usize,
}

/// Ingests a bundle into the store.
///
/// Existing keys are never overwritten. Unrecognized versions and
/// malformed entries are skipped with a warning; every valid entry is
/// decoded once to prove it reusable, then written in its stored form.
/// Ingesting the same bundle twice leaves the store in the same state as
/// ingesting it once.
pub fn preload<S: CacheStore + ?Sized>(store: &S, bundle: &PreloadBundle) -> PreloadReport {
    let mut report = PreloadReport::default();

    for (key, descriptor) in &bundle.entries {
        if store.exists(key) {
            debug!(key = %key, "preload: key already cached, skipping");
            report.skipped_existing += 1;
            continue;
        }

        // Check the version tag before attempting a full decode.
        let version = descriptor.get("version").and_then(serde_json::Value::as_u64);
        if version != Some(u64::from(ENTRY_FORMAT_VERSION)) {
            warn!(key = %key, ?version, "preload: unrecognized entry version, skipping");
            report.skipped_version += 1;
            continue;
        }

        let stored: StorableEntry = match serde_json::from_value(descriptor.clone()) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "preload: malformed entry, skipping");
                report.skipped_invalid += 1;
                continue;
            }
        };

        if let Err(e) = codec::deserialize(stored.clone()) {
            warn!(key = %key, error = %e, "preload: undecodable entry, skipping");
            report.skipped_invalid += 1;
            continue;
        }

        match store.write(key, stored) {
            Ok(()) => report.loaded += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "preload: store write failed, skipping");
                report.skipped_invalid += 1;
            }
        }
    }

    report
}
