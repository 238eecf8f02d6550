//! Filesystem cache backend.
//!
//! Entries are framed binary files under `<root>/entries`; locks are
//! advisory lock files under `<root>/locks` created with `create_new`.
//! Each lock file carries its own staleness TTL so a crashed holder
//! cannot block waiters forever. Reads are fail-safe: a corrupt entry
//! file reads as a cache miss.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use kiln_common::ContentHash;

use crate::backend::{CacheConfig, CacheStore, LockCoordinator, LockHandle};
use crate::codec::StorableEntry;
use crate::error::CacheError;

/// Magic bytes identifying a Kiln cache entry file.
const ENTRY_MAGIC: [u8; 4] = *b"KILN";

/// Entry file framing version. Increment on breaking changes to the
/// header or payload encoding.
const ENTRY_FILE_VERSION: u32 = 1;

/// Subdirectory for entry files.
const ENTRIES_SUBDIR: &str = "entries";

/// Subdirectory for lock files.
const LOCKS_SUBDIR: &str = "locks";

/// Header prepended to every entry file for validation.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    /// Magic bytes: must be `b"KILN"`.
    magic: [u8; 4],
    /// Entry file framing version.
    file_version: u32,
    /// Content hash of the payload (for integrity checks).
    checksum: ContentHash,
}

/// On-disk body of a lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockFileBody {
    /// Token identifying this acquisition.
    token: u64,
    /// Acquisition time, unix milliseconds.
    acquired_at_ms: u64,
    /// Staleness TTL the holder promised, milliseconds.
    ttl_ms: u64,
    /// Holder's process id, for debugging.
    pid: u32,
}

/// Filesystem cache backend for cross-process coordination.
pub struct FsBackend {
    root: PathBuf,
    lock_ttl: Duration,
    poll_interval: Duration,
    token_counter: AtomicU32,
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl FsBackend {
    /// Creates a backend rooted at the given cache directory, with
    /// default lock timing.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &CacheConfig::default())
    }

    /// Creates a backend with the given lock timing.
    pub fn with_config(root: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        Self {
            root: root.into(),
            lock_ttl: config.lock_ttl(),
            poll_interval: config.poll_interval(),
            token_counter: AtomicU32::new(0),
        }
    }

    /// Mints a token unique across processes and across acquisitions
    /// within this process.
    fn mint_token(&self) -> u64 {
        let n = self.token_counter.fetch_add(1, Ordering::Relaxed);
        (u64::from(std::process::id()) << 32) | u64::from(n)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(ENTRIES_SUBDIR).join(format!("{key}.bin"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(LOCKS_SUBDIR).join(format!("{key}.lock"))
    }

    fn ensure_dir(&self, subdir: &str) -> Result<PathBuf, CacheError> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    fn create_lock_file(&self, key: &str, path: &Path) -> io::Result<LockHandle> {
        let token = self.mint_token();
        let body = LockFileBody {
            token,
            acquired_at_ms: unix_ms_now(),
            ttl_ms: self.lock_ttl.as_millis() as u64,
            pid: std::process::id(),
        };
        let json = serde_json::to_vec(&body).map_err(io::Error::other)?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&json)?;
        Ok(LockHandle::new(key, token))
    }

    /// `true` if the lock file at `path` belongs to an expired holder.
    fn holder_is_stale(&self, path: &Path) -> bool {
        let body = std::fs::read(path)
            .ok()
            .and_then(|raw| serde_json::from_slice::<LockFileBody>(&raw).ok());
        if let Some(body) = body {
            return unix_ms_now() >= body.acquired_at_ms.saturating_add(body.ttl_ms);
        }
        // Unreadable body: either mid-write by the creating process or
        // permanently corrupt. Fall back to the file's own age.
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age >= self.lock_ttl)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn read_lock_body(&self, path: &Path) -> Option<LockFileBody> {
        let raw = std::fs::read(path).ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

/// Decodes a framed entry file: length-prefixed header, then payload.
fn decode_entry_file(raw: &[u8]) -> Option<StorableEntry> {
    if raw.len() < 4 {
        return None;
    }
    let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
    if raw.len() < 4 + header_len {
        return None;
    }

    let header: EntryHeader =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .ok()?
            .0;
    if header.magic != ENTRY_MAGIC || header.file_version != ENTRY_FILE_VERSION {
        return None;
    }

    let payload = &raw[4 + header_len..];
    if ContentHash::from_bytes(payload) != header.checksum {
        return None;
    }

    serde_json::from_slice(payload).ok()
}

impl CacheStore for FsBackend {
    fn exists(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    fn read(&self, key: &str) -> Option<StorableEntry> {
        let path = self.entry_path(key);
        let raw = std::fs::read(&path).ok()?;
        let entry = decode_entry_file(&raw);
        if entry.is_none() {
            warn!(key, path = %path.display(), "discarding undecodable cache entry file");
        }
        entry
    }

    fn write(&self, key: &str, entry: StorableEntry) -> Result<(), CacheError> {
        let dir = self.ensure_dir(ENTRIES_SUBDIR)?;

        let payload = serde_json::to_vec(&entry).map_err(|e| CacheError::Codec {
            reason: e.to_string(),
        })?;
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            file_version: ENTRY_FILE_VERSION,
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Codec {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        // Entries must become visible atomically: write a temp file in
        // the same directory, then rename over the final path.
        let tmp = dir.join(format!(".{key}.tmp{}", self.mint_token()));
        std::fs::write(&tmp, &output).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        let path = self.entry_path(key);
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }
}

impl LockCoordinator for FsBackend {
    fn try_lock(&self, key: &str) -> Result<Option<LockHandle>, CacheError> {
        self.ensure_dir(LOCKS_SUBDIR)?;
        let path = self.lock_path(key);

        // One reclaim attempt for a stale lock, then a final create
        // attempt. Racing removers are fine: only one `create_new` wins.
        for _ in 0..2 {
            match self.create_lock_file(key, &path) {
                Ok(handle) => return Ok(Some(handle)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if self.holder_is_stale(&path) {
                        warn!(key, "reclaiming stale lock file");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    return Ok(None);
                }
                Err(e) => return Err(CacheError::Io { path, source: e }),
            }
        }
        Ok(None)
    }

    fn lock(&self, key: &str, timeout: Duration) -> Result<LockHandle, CacheError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.try_lock(key)? {
                return Ok(handle);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CacheError::LockTimeout {
                    key: key.to_string(),
                    waited: timeout,
                });
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn release(&self, handle: LockHandle) -> Result<(), CacheError> {
        let path = self.lock_path(handle.key());
        match self.read_lock_body(&path) {
            Some(body) if body.token == handle.token() => {
                std::fs::remove_file(&path).map_err(|e| CacheError::Io { path, source: e })
            }
            _ => Err(CacheError::LockNotHeld {
                key: handle.key().to_string(),
            }),
        }
    }
}
