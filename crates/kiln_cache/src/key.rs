//! Cache key derivation.
//!
//! A cache key is a pure function of the source content, the compiler's
//! extracted parameter set, and the canonicalized optimize options. Two
//! compilation units with identical content, parameters, and equivalent
//! options yield the same key regardless of process, machine, fragment
//! order, or invocation order.

use std::collections::BTreeMap;

use kiln_common::{canonical_map_text, ContentHash};

use crate::compiler::Compiler;
use crate::error::CacheError;
use crate::unit::{CompilationUnit, OptimizeOptions};

/// A derived cache key plus the intermediate digests it was built from.
///
/// The per-module and per-parameter digests are embedded into stored
/// entries for auditability; carrying them here saves recomputing them at
/// store time.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// The final cache key, `<name>[-unoptimized]-<hex>`.
    pub key: String,
    /// Content digest hex per extracted module name.
    pub module_digests: BTreeMap<String, String>,
    /// Digest hex of each parameter's rendered value.
    pub param_digests: BTreeMap<String, String>,
}

/// Derives the cache key for a unit under the given options.
///
/// Pure: no I/O. The steps are fixed: per-fragment content digests
/// indexed by extracted module name, the compiler's parameter set as
/// text, and the canonical optimize text. Each canonical text is digested
/// individually and the newline-joined digests are digested again for the
/// final key.
///
/// Fails when the compiler cannot extract a module name or the parameter
/// set, and when two fragments extract the same module name (identically
/// named fragments from different locations would otherwise silently
/// collide in the key).
pub fn derive_key<C: Compiler>(
    compiler: &C,
    unit: &CompilationUnit,
    options: &OptimizeOptions,
) -> Result<KeyMaterial, CacheError> {
    let mut module_digests = BTreeMap::new();
    for fragment in &unit.fragments {
        let name = compiler
            .module_name(fragment)
            .map_err(|e| CacheError::Compiler {
                unit: unit.preferred_name.clone(),
                source: e,
            })?;
        let digest = ContentHash::from_bytes(fragment.content.as_bytes()).to_string();
        if module_digests.insert(name.clone(), digest).is_some() {
            return Err(CacheError::InvalidInput {
                unit: unit.preferred_name.clone(),
                reason: format!("duplicate module name '{name}'"),
            });
        }
    }

    let params = compiler
        .parameters(unit)
        .map_err(|e| CacheError::Compiler {
            unit: unit.preferred_name.clone(),
            source: e,
        })?;
    let param_digests: BTreeMap<String, String> = params
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                ContentHash::from_bytes(value.as_bytes()).to_string(),
            )
        })
        .collect();

    let modules_text =
        canonical_map_text(module_digests.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let params_text = canonical_map_text(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let options_text = options.canonical_text();

    let combined = format!(
        "{}\n{}\n{}",
        ContentHash::from_bytes(modules_text.as_bytes()),
        ContentHash::from_bytes(params_text.as_bytes()),
        ContentHash::from_bytes(options_text.as_bytes()),
    );
    let final_digest = ContentHash::from_bytes(combined.as_bytes());

    let suffix = if options.is_disabled() {
        "-unoptimized"
    } else {
        ""
    };
    let key = format!("{}{}-{}", unit.preferred_name, suffix, final_digest);

    Ok(KeyMaterial {
        key,
        module_digests,
        param_digests,
    })
}
