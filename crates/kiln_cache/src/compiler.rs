//! The upstream compiler interface consumed by the cache.
//!
//! The compiler itself is an external collaborator; this module fixes the
//! capability seam the orchestrator and key computer depend on.

use std::collections::BTreeMap;

use crate::unit::{CompilationUnit, OptimizeOptions, SourceFragment};

/// A diagnostic reported by the external compiler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompilerError {
    /// Compiler diagnostic text.
    pub message: String,
}

impl CompilerError {
    /// Creates a compiler error with the given diagnostic text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One of the two compiled-program variants a cache entry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// The optimizer ran.
    Optimized,
    /// The optimizer was disabled.
    Unoptimized,
}

impl Variant {
    /// The variant a compile under the given options produces.
    pub fn for_options(options: &OptimizeOptions) -> Self {
        if options.is_disabled() {
            Self::Unoptimized
        } else {
            Self::Optimized
        }
    }

    /// The sibling variant.
    pub fn other(self) -> Self {
        match self {
            Self::Optimized => Self::Unoptimized,
            Self::Unoptimized => Self::Optimized,
        }
    }
}

/// A compiled program variant: the binary plus its tooling artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    /// Canonical binary encoding of the compiled program.
    pub program: Vec<u8>,
    /// Intermediate representation, if the compiler emitted one.
    pub ir: Option<serde_json::Value>,
    /// Source map, if the compiler emitted one.
    pub source_map: Option<String>,
}

impl CompiledArtifact {
    /// Creates an artifact holding only the compiled binary.
    pub fn from_program(program: Vec<u8>) -> Self {
        Self {
            program,
            ir: None,
            source_map: None,
        }
    }
}

/// Result of one compiler invocation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The artifact for the requested optimize options.
    pub primary: CompiledArtifact,
    /// Opportunistic sibling artifact for the other variant, if the
    /// compiler produced one in the same run.
    pub alternate: Option<CompiledArtifact>,
}

/// Capability interface of the external compiler.
///
/// Implementations must be deterministic: identical fragments, parameters,
/// and options produce byte-identical output. That determinism is what
/// makes redundant concurrent compiles of the same key safe.
pub trait Compiler {
    /// Extracts the stable logical name of a source fragment.
    fn module_name(&self, fragment: &SourceFragment) -> Result<String, CompilerError>;

    /// Extracts the entry point's declared parameter set, each value
    /// rendered as text. Used for cache key derivation; failure here is
    /// fatal to the compile request.
    fn parameters(&self, unit: &CompilationUnit) -> Result<BTreeMap<String, String>, CompilerError>;

    /// Compiles the unit under the given options.
    fn compile(
        &self,
        unit: &CompilationUnit,
        options: &OptimizeOptions,
    ) -> Result<CompileOutput, CompilerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_for_disabled_options() {
        assert_eq!(
            Variant::for_options(&OptimizeOptions::Disabled),
            Variant::Unoptimized
        );
    }

    #[test]
    fn variant_for_enabled_options() {
        let opts = OptimizeOptions::enabled(BTreeMap::new());
        assert_eq!(Variant::for_options(&opts), Variant::Optimized);
    }

    #[test]
    fn variant_other_flips() {
        assert_eq!(Variant::Optimized.other(), Variant::Unoptimized);
        assert_eq!(Variant::Unoptimized.other(), Variant::Optimized);
    }

    #[test]
    fn compiler_error_display() {
        let err = CompilerError::new("unexpected token '}'");
        assert_eq!(err.to_string(), "unexpected token '}'");
    }

    #[test]
    fn artifact_from_program_has_no_tooling() {
        let artifact = CompiledArtifact::from_program(vec![0x00, 0x61]);
        assert!(artifact.ir.is_none());
        assert!(artifact.source_map.is_none());
    }
}
