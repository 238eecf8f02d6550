//! The compile orchestration protocol.
//!
//! Ties the key computer, cache store, lock coordinator, codec, and the
//! external compiler together. Per request: check the store, then try to
//! win the compile lock; losers wait for the winner's entry and only
//! compile themselves when waiting fails. Correctness never depends on
//! the lock succeeding; only the amount of redundant work does.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{CacheBackend, LockHandle, DEFAULT_LOCK_TIMEOUT};
use crate::codec;
use crate::compiler::{CompileOutput, CompiledArtifact, Compiler, Variant};
use crate::entry::{CacheEntry, ProgramElements, ENTRY_FORMAT_VERSION};
use crate::error::CacheError;
use crate::key::{derive_key, KeyMaterial};
use crate::unit::{CompilationUnit, OptimizeOptions};

/// How a compile request was ultimately satisfied.
///
/// Materially affects build-time diagnostics, so every exit path of the
/// protocol is distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The entry was already in the store, possibly after waiting on a
    /// peer to finish writing it.
    CacheHit,
    /// This caller won the lock and compiled.
    CompiledFresh,
    /// Waited on a peer whose result never appeared, then compiled
    /// locally while holding the peer's released lock.
    CompiledAfterRace,
    /// The lock wait timed out; compiled locally without coordination.
    CompiledAfterTimeout,
}

/// A successful compile-with-cache result.
#[derive(Debug, Clone)]
pub struct CachedCompile {
    /// The derived cache key.
    pub key: String,
    /// The full cache entry, as stored or as freshly produced.
    pub entry: CacheEntry,
    /// The variant requested by this call.
    pub variant: Variant,
    /// How this result was obtained.
    pub outcome: CompileOutcome,
}

impl CachedCompile {
    /// The compiled artifact for the requested variant.
    ///
    /// Always present for values produced by [`CompileCache`]: the
    /// orchestrator never returns an entry whose requested slot is empty.
    pub fn artifact(&self) -> Option<&CompiledArtifact> {
        self.entry.artifact(self.variant)
    }
}

/// Compilation-result cache front end.
///
/// Owns the backend capabilities and the external compiler, and enforces
/// at-most-one-concurrent-compile-per-key on a best-effort basis.
pub struct CompileCache<B, C> {
    backend: Arc<B>,
    compiler: C,
    created_by: String,
    lock_timeout: Duration,
}

impl<B: CacheBackend, C: Compiler> CompileCache<B, C> {
    /// Creates a cache front end.
    ///
    /// `created_by` identifies this producer in stored entries (e.g.
    /// compiler name, version, and platform); it is recorded verbatim and
    /// never interpreted.
    pub fn new(backend: Arc<B>, compiler: C, created_by: impl Into<String>) -> Self {
        Self {
            backend,
            compiler,
            created_by: created_by.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Overrides the default 30-second lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Compiles `unit` under `options`, reusing a cached result when one
    /// exists.
    pub fn compile_with_cache(
        &self,
        unit: &CompilationUnit,
        options: &OptimizeOptions,
    ) -> Result<CachedCompile, CacheError> {
        self.compile_with_cache_timeout(unit, options, self.lock_timeout)
    }

    /// Like [`Self::compile_with_cache`], with a per-call lock wait
    /// timeout.
    pub fn compile_with_cache_timeout(
        &self,
        unit: &CompilationUnit,
        options: &OptimizeOptions,
        lock_timeout: Duration,
    ) -> Result<CachedCompile, CacheError> {
        if unit.fragments.is_empty() {
            return Err(CacheError::InvalidInput {
                unit: unit.preferred_name.clone(),
                reason: "empty source set".to_string(),
            });
        }

        let material = derive_key(&self.compiler, unit, options)?;
        let variant = Variant::for_options(options);

        // The common fast path: no lock is ever touched on a hit.
        if let Some(entry) = self.read_usable(&material.key, variant) {
            debug!(key = %material.key, "served from cache");
            return Ok(CachedCompile {
                key: material.key,
                entry,
                variant,
                outcome: CompileOutcome::CacheHit,
            });
        }

        match self.backend.try_lock(&material.key) {
            Ok(Some(handle)) => {
                info!(key = %material.key, unit = %unit.preferred_name, "compiling after winning the lock");
                self.compile_and_store(
                    unit,
                    options,
                    &material,
                    variant,
                    Some(handle),
                    CompileOutcome::CompiledFresh,
                )
            }
            Ok(None) => self.wait_on_peer(unit, options, &material, variant, lock_timeout),
            Err(e) => {
                warn!(key = %material.key, error = %e, "lock backend failed; compiling without coordination");
                self.compile_and_store(
                    unit,
                    options,
                    &material,
                    variant,
                    None,
                    CompileOutcome::CompiledAfterTimeout,
                )
            }
        }
    }

    /// Another party holds the lock: wait for it, then prefer its entry.
    fn wait_on_peer(
        &self,
        unit: &CompilationUnit,
        options: &OptimizeOptions,
        material: &KeyMaterial,
        variant: Variant,
        lock_timeout: Duration,
    ) -> Result<CachedCompile, CacheError> {
        match self.backend.lock(&material.key, lock_timeout) {
            Ok(handle) => {
                // The peer should have written by now.
                if let Some(entry) = self.read_usable(&material.key, variant) {
                    self.release_logged(Some(handle));
                    debug!(key = %material.key, "served from cache after waiting on a peer");
                    return Ok(CachedCompile {
                        key: material.key.clone(),
                        entry,
                        variant,
                        outcome: CompileOutcome::CacheHit,
                    });
                }
                // Peer crashed after locking, or wrote nothing usable.
                info!(key = %material.key, unit = %unit.preferred_name, "compiling after losing a race");
                self.compile_and_store(
                    unit,
                    options,
                    material,
                    variant,
                    Some(handle),
                    CompileOutcome::CompiledAfterRace,
                )
            }
            Err(CacheError::LockTimeout { .. }) => {
                warn!(
                    key = %material.key,
                    unit = %unit.preferred_name,
                    timeout_ms = lock_timeout.as_millis() as u64,
                    "compiling after waiting and timing out"
                );
                self.compile_and_store(
                    unit,
                    options,
                    material,
                    variant,
                    None,
                    CompileOutcome::CompiledAfterTimeout,
                )
            }
            Err(e) => {
                warn!(key = %material.key, error = %e, "lock backend failed while waiting; compiling locally");
                self.compile_and_store(
                    unit,
                    options,
                    material,
                    variant,
                    None,
                    CompileOutcome::CompiledAfterTimeout,
                )
            }
        }
    }

    /// Reads and decodes the entry for `key` if it is usable for
    /// `variant`. Corrupt, unsupported, or slot-less entries read as
    /// misses.
    fn read_usable(&self, key: &str, variant: Variant) -> Option<CacheEntry> {
        let stored = self.backend.read(key)?;
        match codec::deserialize(stored) {
            Ok(entry) => {
                if entry.artifact(variant).is_some() {
                    Some(entry)
                } else {
                    warn!(key, "cached entry lacks the requested variant; recompiling");
                    None
                }
            }
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry; recompiling");
                None
            }
        }
    }

    fn compile_and_store(
        &self,
        unit: &CompilationUnit,
        options: &OptimizeOptions,
        material: &KeyMaterial,
        variant: Variant,
        handle: Option<LockHandle>,
        outcome: CompileOutcome,
    ) -> Result<CachedCompile, CacheError> {
        let output = match self.compiler.compile(unit, options) {
            Ok(output) => output,
            Err(e) => {
                // Nothing is ever cached for a failed compile.
                self.release_logged(handle);
                return Err(CacheError::Compiler {
                    unit: unit.preferred_name.clone(),
                    source: e,
                });
            }
        };

        let entry = self.build_entry(options, material, variant, output);
        if let Err(e) = self.backend.write(&material.key, codec::serialize(&entry)) {
            // The result is still correct; only future callers lose reuse.
            warn!(key = %material.key, error = %e, "failed to write cache entry");
        }
        self.release_logged(handle);

        Ok(CachedCompile {
            key: material.key.clone(),
            entry,
            variant,
            outcome,
        })
    }

    fn build_entry(
        &self,
        options: &OptimizeOptions,
        material: &KeyMaterial,
        variant: Variant,
        output: CompileOutput,
    ) -> CacheEntry {
        let mut entry = CacheEntry {
            version: ENTRY_FORMAT_VERSION,
            created_by: self.created_by.clone(),
            optimize_options: options.clone(),
            program_elements: ProgramElements {
                modules: material.module_digests.clone(),
                params: material.param_digests.clone(),
            },
            optimized: None,
            unoptimized: None,
        };
        match variant {
            Variant::Optimized => {
                entry.optimized = Some(output.primary);
                entry.unoptimized = output.alternate;
            }
            Variant::Unoptimized => {
                entry.unoptimized = Some(output.primary);
                entry.optimized = output.alternate;
            }
        }
        entry
    }

    fn release_logged(&self, handle: Option<LockHandle>) {
        if let Some(handle) = handle {
            let key = handle.key().to_string();
            if let Err(e) = self.backend.release(handle) {
                // The lock self-expires; a failed release only delays peers.
                warn!(key = %key, error = %e, "failed to release compile lock");
            }
        }
    }
}
