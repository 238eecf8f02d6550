//! The cache entry model.

use std::collections::BTreeMap;

use crate::compiler::{CompiledArtifact, Variant};
use crate::unit::OptimizeOptions;

/// The single cache entry format version this build reads and writes.
///
/// Entries carrying any other version are rejected, never coerced.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// Audit record of the digests a cache key was derived from.
///
/// Kept for debugging and provenance; never re-validated on read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramElements {
    /// Content digest hex per extracted module name.
    pub modules: BTreeMap<String, String>,
    /// Digest hex per compile parameter's rendered value.
    pub params: BTreeMap<String, String>,
}

/// A cached compilation result.
///
/// Created only by a successful compile or by bulk-preload ingestion;
/// never mutated after being stored. At least one of the two artifact
/// slots must be populated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Entry format version; must equal [`ENTRY_FORMAT_VERSION`].
    pub version: u32,
    /// Identity of the producer that compiled this entry.
    pub created_by: String,
    /// Optimize options the entry was compiled under.
    pub optimize_options: OptimizeOptions,
    /// Digests the cache key was derived from.
    pub program_elements: ProgramElements,
    /// The optimized artifact slot.
    pub optimized: Option<CompiledArtifact>,
    /// The unoptimized artifact slot.
    pub unoptimized: Option<CompiledArtifact>,
}

impl CacheEntry {
    /// The artifact in the given variant's slot, if populated.
    pub fn artifact(&self, variant: Variant) -> Option<&CompiledArtifact> {
        match variant {
            Variant::Optimized => self.optimized.as_ref(),
            Variant::Unoptimized => self.unoptimized.as_ref(),
        }
    }

    /// `true` if at least one artifact slot is populated.
    pub fn has_artifact(&self) -> bool {
        self.optimized.is_some() || self.unoptimized.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(
        optimized: Option<CompiledArtifact>,
        unoptimized: Option<CompiledArtifact>,
    ) -> CacheEntry {
        CacheEntry {
            version: ENTRY_FORMAT_VERSION,
            created_by: "kilnc-0.1.0".to_string(),
            optimize_options: OptimizeOptions::Disabled,
            program_elements: ProgramElements::default(),
            optimized,
            unoptimized,
        }
    }

    #[test]
    fn artifact_selects_slot() {
        let entry = entry_with(
            Some(CompiledArtifact::from_program(vec![1])),
            Some(CompiledArtifact::from_program(vec![2])),
        );
        assert_eq!(entry.artifact(Variant::Optimized).unwrap().program, vec![1]);
        assert_eq!(
            entry.artifact(Variant::Unoptimized).unwrap().program,
            vec![2]
        );
    }

    #[test]
    fn empty_slot_reads_as_none() {
        let entry = entry_with(None, Some(CompiledArtifact::from_program(vec![2])));
        assert!(entry.artifact(Variant::Optimized).is_none());
    }

    #[test]
    fn has_artifact_requires_a_populated_slot() {
        assert!(!entry_with(None, None).has_artifact());
        assert!(entry_with(Some(CompiledArtifact::from_program(vec![1])), None).has_artifact());
        assert!(entry_with(None, Some(CompiledArtifact::from_program(vec![2]))).has_artifact());
    }
}
