//! Compilation-result caching with cross-process coordination.
//!
//! Many independent callers (processes, threads, cooperative tasks) may
//! request compilation of the same logical program concurrently. This crate
//! derives a content-addressed cache key per compilation unit, coordinates
//! an at-most-one-compiler-per-key lock protocol, and persists compiled
//! artifacts through a pluggable storage backend.
//!
//! Coordination is best-effort: when lock acquisition fails or times out,
//! callers fall back to a redundant local compile instead of hanging, so
//! correctness never depends on the lock. All legitimate compilers for one
//! key are pure functions of the same content-addressed input, which is
//! what makes redundant compiles safe.

#![warn(missing_docs)]

pub mod backend;
pub mod codec;
pub mod compiler;
pub mod entry;
pub mod error;
pub mod fs;
pub mod key;
pub mod memory;
pub mod orchestrator;
pub mod preload;
pub mod unit;

pub use backend::{
    CacheBackend, CacheConfig, CacheStore, LockCoordinator, LockHandle, DEFAULT_LOCK_TIMEOUT,
};
pub use codec::StorableEntry;
pub use compiler::{CompileOutput, CompiledArtifact, Compiler, CompilerError, Variant};
pub use entry::{CacheEntry, ProgramElements, ENTRY_FORMAT_VERSION};
pub use error::CacheError;
pub use fs::FsBackend;
pub use key::{derive_key, KeyMaterial};
pub use memory::MemoryBackend;
pub use orchestrator::{CachedCompile, CompileCache, CompileOutcome};
pub use preload::{preload, PreloadBundle, PreloadReport};
pub use unit::{CompilationUnit, OptimizeOptions, SourceFragment};
