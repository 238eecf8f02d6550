//! Conversion between in-memory cache entries and their storable shape.
//!
//! [`StorableEntry`] is the wire shape persisted by every backend: compiled
//! binaries are hex-encoded, IR and source maps pass through as structured
//! data, metadata is preserved verbatim. `deserialize(serialize(e))` is
//! behaviorally identical to `e` for every field relevant to reuse.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::compiler::CompiledArtifact;
use crate::entry::{CacheEntry, ProgramElements, ENTRY_FORMAT_VERSION};
use crate::error::CacheError;
use crate::unit::OptimizeOptions;

/// Wire shape of a persisted cache entry.
///
/// Field names match the persisted JSON: `version`, `createdBy`,
/// `optimizeOptions`, `programElements`, and one hex/IR/source-map triple
/// per artifact slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorableEntry {
    /// Entry format version tag.
    pub version: u32,
    /// Identity of the producer.
    pub created_by: String,
    /// Optimize options: `"unoptimized"` or a flag map.
    pub optimize_options: OptimizeOptions,
    /// Flat module-digest map with the reserved `params` sub-map.
    pub program_elements: ProgramElements,
    /// Hex-encoded optimized program, if that slot is populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized: Option<String>,
    /// Intermediate representation of the optimized program.
    #[serde(default, rename = "optimizedIR", skip_serializing_if = "Option::is_none")]
    pub optimized_ir: Option<serde_json::Value>,
    /// Source map of the optimized program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_source_map: Option<String>,
    /// Hex-encoded unoptimized program, if that slot is populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unoptimized: Option<String>,
    /// Intermediate representation of the unoptimized program.
    #[serde(
        default,
        rename = "unoptimizedIR",
        skip_serializing_if = "Option::is_none"
    )]
    pub unoptimized_ir: Option<serde_json::Value>,
    /// Source map of the unoptimized program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unoptimized_source_map: Option<String>,
}

// The wire shape flattens module digests into one map alongside the
// reserved `params` key: `{"<module>": "<digestHex>", ..., "params": {...}}`.
impl Serialize for ProgramElements {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.modules.len() + 1))?;
        for (name, digest) in &self.modules {
            map.serialize_entry(name, digest)?;
        }
        map.serialize_entry("params", &self.params)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProgramElements {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut modules = BTreeMap::new();
        let mut params = BTreeMap::new();
        for (name, value) in raw {
            if name == "params" {
                params = serde_json::from_value(value).map_err(D::Error::custom)?;
            } else {
                match value {
                    serde_json::Value::String(digest) => {
                        modules.insert(name, digest);
                    }
                    other => {
                        return Err(D::Error::custom(format!(
                            "module digest for '{name}' must be a string, got {other}"
                        )));
                    }
                }
            }
        }
        Ok(Self { modules, params })
    }
}

/// Converts an entry to its storable representation.
///
/// Hex-encodes each populated slot's program bytes; IR, source maps, and
/// metadata pass through unchanged.
pub fn serialize(entry: &CacheEntry) -> StorableEntry {
    let (optimized, optimized_ir, optimized_source_map) = split_slot(entry.optimized.as_ref());
    let (unoptimized, unoptimized_ir, unoptimized_source_map) =
        split_slot(entry.unoptimized.as_ref());
    StorableEntry {
        version: entry.version,
        created_by: entry.created_by.clone(),
        optimize_options: entry.optimize_options.clone(),
        program_elements: entry.program_elements.clone(),
        optimized,
        optimized_ir,
        optimized_source_map,
        unoptimized,
        unoptimized_ir,
        unoptimized_source_map,
    }
}

/// Reconstructs an entry from its storable representation.
///
/// Rejects unsupported format versions before attempting any binary
/// decode, and entries with neither artifact slot populated.
pub fn deserialize(stored: StorableEntry) -> Result<CacheEntry, CacheError> {
    if stored.version != ENTRY_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion {
            expected: ENTRY_FORMAT_VERSION,
            actual: stored.version,
        });
    }

    let optimized = join_slot(
        "optimized",
        stored.optimized,
        stored.optimized_ir,
        stored.optimized_source_map,
    )?;
    let unoptimized = join_slot(
        "unoptimized",
        stored.unoptimized,
        stored.unoptimized_ir,
        stored.unoptimized_source_map,
    )?;

    if optimized.is_none() && unoptimized.is_none() {
        return Err(CacheError::Codec {
            reason: "entry has no artifact in either slot".to_string(),
        });
    }

    Ok(CacheEntry {
        version: stored.version,
        created_by: stored.created_by,
        optimize_options: stored.optimize_options,
        program_elements: stored.program_elements,
        optimized,
        unoptimized,
    })
}

fn split_slot(
    slot: Option<&CompiledArtifact>,
) -> (Option<String>, Option<serde_json::Value>, Option<String>) {
    match slot {
        Some(artifact) => (
            Some(hex::encode(&artifact.program)),
            artifact.ir.clone(),
            artifact.source_map.clone(),
        ),
        None => (None, None, None),
    }
}

fn join_slot(
    slot_name: &str,
    program: Option<String>,
    ir: Option<serde_json::Value>,
    source_map: Option<String>,
) -> Result<Option<CompiledArtifact>, CacheError> {
    match program {
        None => Ok(None),
        Some(hex_text) => {
            let program = hex::decode(&hex_text).map_err(|e| CacheError::Codec {
                reason: format!("invalid program hex in {slot_name} slot: {e}"),
            })?;
            Ok(Some(CompiledArtifact {
                program,
                ir,
                source_map,
            }))
        }
    }
}
