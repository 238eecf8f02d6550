//! End-to-end coordination tests over the filesystem backend.
//!
//! Each `FsBackend` instance stands in for a separate process: instances
//! share nothing in memory, only the cache directory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use kiln_cache::{
    preload, CacheConfig, CacheStore, CompilationUnit, CompileCache, CompileOutcome,
    CompileOutput, CompiledArtifact, Compiler, CompilerError, FsBackend, LockCoordinator,
    OptimizeOptions, PreloadBundle, SourceFragment,
};

/// Extracts `<name>` from `module <name> ...` and counts compiles across
/// all clones.
#[derive(Clone)]
struct StubCompiler {
    calls: Arc<AtomicUsize>,
}

impl StubCompiler {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Compiler for StubCompiler {
    fn module_name(&self, fragment: &SourceFragment) -> Result<String, CompilerError> {
        fragment
            .content
            .split_whitespace()
            .nth(1)
            .map(str::to_string)
            .ok_or_else(|| CompilerError::new("no module name"))
    }

    fn parameters(&self, unit: &CompilationUnit) -> Result<BTreeMap<String, String>, CompilerError> {
        Ok(unit.parameters.clone())
    }

    fn compile(
        &self,
        unit: &CompilationUnit,
        _options: &OptimizeOptions,
    ) -> Result<CompileOutput, CompilerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        Ok(CompileOutput {
            primary: CompiledArtifact {
                program: format!("compiled:{}", unit.preferred_name).into_bytes(),
                ir: None,
                source_map: Some("AAAA".to_string()),
            },
            alternate: None,
        })
    }
}

fn token_unit() -> CompilationUnit {
    CompilationUnit::new(
        "token",
        vec![
            SourceFragment::new("src/token.kl", "module token return transfer"),
            SourceFragment::new("src/math.kl", "module math return add"),
        ],
    )
}

fn fast_poll_config() -> CacheConfig {
    CacheConfig {
        poll_interval_ms: 5,
        ..CacheConfig::default()
    }
}

#[test]
fn separate_backend_instances_share_entries() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = StubCompiler::new();

    let writer = CompileCache::new(
        Arc::new(FsBackend::with_config(dir.path(), &fast_poll_config())),
        compiler.clone(),
        "kilnc-a",
    );
    let reader = CompileCache::new(
        Arc::new(FsBackend::with_config(dir.path(), &fast_poll_config())),
        compiler.clone(),
        "kilnc-b",
    );

    let first = writer
        .compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        .unwrap();
    let second = reader
        .compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        .unwrap();

    assert_eq!(first.outcome, CompileOutcome::CompiledFresh);
    assert_eq!(second.outcome, CompileOutcome::CacheHit);
    assert_eq!(second.entry, first.entry);
    assert_eq!(second.entry.created_by, "kilnc-a");
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_instances_compile_once() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = StubCompiler::new();

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let mut joins = Vec::new();
    for i in 0..threads {
        let root = dir.path().to_path_buf();
        let compiler = compiler.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(std::thread::spawn(move || {
            let cache = CompileCache::new(
                Arc::new(FsBackend::with_config(&root, &fast_poll_config())),
                compiler,
                format!("kilnc-{i}"),
            );
            barrier.wait();
            cache.compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        }));
    }

    let results: Vec<_> = joins
        .into_iter()
        .map(|j| j.join().unwrap().unwrap())
        .collect();

    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    let reference = &results[0].entry;
    for result in &results {
        assert_eq!(&result.entry, reference);
        assert_eq!(result.artifact().unwrap().program, b"compiled:token");
    }
}

#[test]
fn abandoned_lock_does_not_block_forever() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        lock_ttl_ms: 50,
        poll_interval_ms: 5,
        ..CacheConfig::default()
    };
    let compiler = StubCompiler::new();

    // A "crashed" process left its lock behind.
    let crashed = FsBackend::with_config(dir.path(), &config);
    let cache = CompileCache::new(
        Arc::new(FsBackend::with_config(dir.path(), &config)),
        compiler.clone(),
        "kilnc-survivor",
    );
    let probe = derive_probe_key(&compiler);
    let _abandoned = crashed.try_lock(&probe).unwrap().unwrap();

    let result = cache
        .compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        .unwrap();

    assert_eq!(result.outcome, CompileOutcome::CompiledAfterRace);
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}

fn derive_probe_key(compiler: &StubCompiler) -> String {
    kiln_cache::derive_key(compiler, &token_unit(), &OptimizeOptions::Disabled)
        .unwrap()
        .key
}

#[test]
fn preload_populates_a_cold_filesystem_cache() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = StubCompiler::new();
    let source = FsBackend::with_config(dir.path(), &fast_poll_config());

    // Produce a real entry, then ship it as a bundle to a second cache.
    let producer = CompileCache::new(
        Arc::new(FsBackend::with_config(dir.path(), &fast_poll_config())),
        compiler.clone(),
        "kilnc-producer",
    );
    let produced = producer
        .compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        .unwrap();

    let stored = source.read(&produced.key).unwrap();
    let descriptor = serde_json::to_value(&stored).unwrap();
    let bundle = PreloadBundle::from_entries(
        [(produced.key.clone(), descriptor)].into_iter().collect(),
    );

    let target_dir = tempfile::tempdir().unwrap();
    let target = FsBackend::with_config(target_dir.path(), &fast_poll_config());
    let report = preload(&target, &bundle);
    assert_eq!(report.loaded, 1);

    // A consumer over the preloaded cache never compiles.
    let consumer = CompileCache::new(Arc::new(target), compiler.clone(), "kilnc-consumer");
    let result = consumer
        .compile_with_cache(&token_unit(), &OptimizeOptions::Disabled)
        .unwrap();
    assert_eq!(result.outcome, CompileOutcome::CacheHit);
    assert_eq!(result.entry.created_by, "kilnc-producer");
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}
