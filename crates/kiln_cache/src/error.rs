//! Error types for cache and compile-coordination operations.

use std::path::PathBuf;
use std::time::Duration;

use crate::compiler::CompilerError;

/// Errors that can occur while caching and coordinating compilation.
///
/// Only [`CacheError::InvalidInput`] and [`CacheError::Compiler`] surface
/// to callers of the orchestrator; every other condition is absorbed into
/// the protocol's fallback paths and logged. The full enum exists for the
/// backend and codec layers, which report what happened and let the
/// orchestrator decide what is fatal.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The compilation unit is malformed (empty source set, duplicate
    /// module names). Never cached, surfaced immediately.
    #[error("invalid compilation unit '{unit}': {reason}")]
    InvalidInput {
        /// Display name of the offending unit.
        unit: String,
        /// Description of what is wrong with the unit.
        reason: String,
    },

    /// The external compiler failed for this unit. The lock is released
    /// without writing an entry and the failure propagates unchanged.
    #[error("compilation of '{unit}' failed: {source}")]
    Compiler {
        /// Display name of the unit that failed to compile.
        unit: String,
        /// The underlying compiler diagnostic.
        #[source]
        source: CompilerError,
    },

    /// No lock became available within the wait timeout.
    #[error("timed out after {waited:?} waiting for lock on '{key}'")]
    LockTimeout {
        /// The cache key the lock was requested for.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A lock handle was released that the backend does not recognize:
    /// never acquired here, or expired and reclaimed by another party.
    #[error("lock on '{key}' is not held by this handle")]
    LockNotHeld {
        /// The cache key the handle claimed to hold.
        key: String,
    },

    /// The entry carries a format version this build does not support.
    /// Versions are rejected, never coerced.
    #[error("unsupported cache entry version: expected {expected}, got {actual}")]
    UnsupportedVersion {
        /// The single version this build reads and writes.
        expected: u32,
        /// The version found in the stored entry.
        actual: u32,
    },

    /// A stored entry could not be decoded (bad hex, no artifact slot,
    /// malformed structure).
    #[error("failed to decode cache entry: {reason}")]
    Codec {
        /// Description of the decode failure.
        reason: String,
    },

    /// An I/O error occurred in a storage backend.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A backend-specific failure outside the other categories.
    #[error("cache backend error: {reason}")]
    Backend {
        /// Description of the backend failure.
        reason: String,
    },
}
