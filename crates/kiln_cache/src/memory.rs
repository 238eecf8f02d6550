//! In-memory cache backend.
//!
//! Entries and locks live in process memory, so coordination spans
//! threads (or cooperative tasks) within one process. Doubles as the
//! reference backend in tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{CacheConfig, CacheStore, LockCoordinator, LockHandle};
use crate::codec::StorableEntry;
use crate::error::CacheError;

/// State of one held lock.
struct Holder {
    token: u64,
    expires_at: Instant,
}

/// Lock state behind the mutex.
#[derive(Default)]
struct LockTable {
    holders: HashMap<String, Holder>,
    next_token: u64,
}

/// In-memory cache backend with TTL-expiring locks.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, StorableEntry>>,
    locks: Mutex<LockTable>,
    released: Condvar,
    lock_ttl: Duration,
}

impl MemoryBackend {
    /// Creates a backend with default lock timing.
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Creates a backend with the given lock timing.
    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            lock_ttl: config.lock_ttl(),
        }
    }

    /// Acquires the lock for `key` if it is free or its holder expired.
    ///
    /// An expired holder is reclaimed here; its stale handle then fails
    /// `release` with [`CacheError::LockNotHeld`].
    fn try_acquire(&self, table: &mut LockTable, key: &str) -> Option<LockHandle> {
        let now = Instant::now();
        match table.holders.get(key) {
            Some(holder) if holder.expires_at > now => None,
            _ => {
                table.next_token += 1;
                let token = table.next_token;
                table.holders.insert(
                    key.to_string(),
                    Holder {
                        token,
                        expires_at: now + self.lock_ttl,
                    },
                );
                Some(LockHandle::new(key, token))
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryBackend {
    fn exists(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn read(&self, key: &str) -> Option<StorableEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn write(&self, key: &str, entry: StorableEntry) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }
}

impl LockCoordinator for MemoryBackend {
    fn try_lock(&self, key: &str) -> Result<Option<LockHandle>, CacheError> {
        let mut table = self.locks.lock();
        Ok(self.try_acquire(&mut table, key))
    }

    fn lock(&self, key: &str, timeout: Duration) -> Result<LockHandle, CacheError> {
        let deadline = Instant::now() + timeout;
        let mut table = self.locks.lock();
        loop {
            if let Some(handle) = self.try_acquire(&mut table, key) {
                return Ok(handle);
            }
            // Wake at the holder's expiry even if nobody releases.
            let holder_expiry = table
                .holders
                .get(key)
                .map(|holder| holder.expires_at)
                .unwrap_or(deadline);
            let wait_until = holder_expiry.min(deadline);
            self.released.wait_until(&mut table, wait_until);
            if Instant::now() >= deadline {
                if let Some(handle) = self.try_acquire(&mut table, key) {
                    return Ok(handle);
                }
                return Err(CacheError::LockTimeout {
                    key: key.to_string(),
                    waited: timeout,
                });
            }
        }
    }

    fn release(&self, handle: LockHandle) -> Result<(), CacheError> {
        let mut table = self.locks.lock();
        match table.holders.get(handle.key()) {
            Some(holder) if holder.token == handle.token() => {
                table.holders.remove(handle.key());
                self.released.notify_all();
                Ok(())
            }
            _ => Err(CacheError::LockNotHeld {
                key: handle.key().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StorableEntry;
    use crate::entry::{ProgramElements, ENTRY_FORMAT_VERSION};
    use crate::unit::OptimizeOptions;
    use std::sync::Arc;

    fn stored_entry() -> StorableEntry {
        StorableEntry {
            version: ENTRY_FORMAT_VERSION,
            created_by: "test".to_string(),
            optimize_options: OptimizeOptions::Disabled,
            program_elements: ProgramElements::default(),
            optimized: None,
            optimized_ir: None,
            optimized_source_map: None,
            unoptimized: Some("00".to_string()),
            unoptimized_ir: None,
            unoptimized_source_map: None,
        }
    }

    fn short_ttl_backend(ttl_ms: u64) -> MemoryBackend {
        MemoryBackend::with_config(&CacheConfig {
            lock_ttl_ms: ttl_ms,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn store_roundtrip() {
        let backend = MemoryBackend::new();
        assert!(!backend.exists("k"));
        assert!(backend.read("k").is_none());

        backend.write("k", stored_entry()).unwrap();
        assert!(backend.exists("k"));
        assert_eq!(backend.read("k").unwrap(), stored_entry());
    }

    #[test]
    fn try_lock_is_exclusive() {
        let backend = MemoryBackend::new();
        let handle = backend.try_lock("k").unwrap().unwrap();
        assert!(backend.try_lock("k").unwrap().is_none());
        backend.release(handle).unwrap();
        assert!(backend.try_lock("k").unwrap().is_some());
    }

    #[test]
    fn locks_are_per_key() {
        let backend = MemoryBackend::new();
        let _a = backend.try_lock("a").unwrap().unwrap();
        assert!(backend.try_lock("b").unwrap().is_some());
    }

    #[test]
    fn release_of_unacquired_handle_fails() {
        let backend = MemoryBackend::new();
        let err = backend.release(LockHandle::new("k", 999)).unwrap_err();
        assert!(matches!(err, CacheError::LockNotHeld { .. }));
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let backend = short_ttl_backend(20);
        let stale = backend.try_lock("k").unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(40));

        // The abandoned lock no longer blocks new acquirers.
        let fresh = backend.try_lock("k").unwrap().unwrap();

        // The stale handle can no longer release.
        let err = backend.release(stale).unwrap_err();
        assert!(matches!(err, CacheError::LockNotHeld { .. }));
        backend.release(fresh).unwrap();
    }

    #[test]
    fn lock_times_out_when_held() {
        let backend = MemoryBackend::new();
        let _held = backend.try_lock("k").unwrap().unwrap();
        let err = backend
            .lock("k", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { .. }));
    }

    #[test]
    fn lock_wakes_on_release() {
        let backend = Arc::new(MemoryBackend::new());
        let held = backend.try_lock("k").unwrap().unwrap();

        let waiter = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || backend.lock("k", Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(50));
        backend.release(held).unwrap();

        let handle = waiter.join().unwrap().unwrap();
        backend.release(handle).unwrap();
    }

    #[test]
    fn lock_acquires_after_holder_expires() {
        let backend = short_ttl_backend(50);
        let _stale = backend.try_lock("k").unwrap().unwrap();
        // Waiting longer than the TTL must succeed without any release.
        let handle = backend.lock("k", Duration::from_secs(5)).unwrap();
        backend.release(handle).unwrap();
    }
}
