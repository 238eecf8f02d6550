//! Content hashing for cache key derivation and entry integrity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 256-bit BLAKE3 content hash.
///
/// Two byte sequences with the same `ContentHash` are assumed to have
/// identical content. Cache keys are derived from these hashes and shared
/// across mutually untrusting processes, so the digest must be
/// collision-resistant, not merely fast.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Computes a content hash from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
