//! Backend capability traits, lock handles, and timing configuration.
//!
//! The cache store and the lock coordinator are the only shared mutable
//! resources in the system. Holders may live in different memory spaces,
//! so everything here is expressed in terms of these capabilities, never
//! in terms of in-process mutexes.

use std::time::Duration;

use serde::Deserialize;

use crate::codec::StorableEntry;
use crate::error::CacheError;

/// Default wall-clock time a caller waits for a peer's lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time after which an unreleased lock self-expires.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default polling interval for backends that poll for lock availability.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_millis() as u64
}

fn default_lock_ttl_ms() -> u64 {
    DEFAULT_LOCK_TTL.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Timing configuration for lock coordination.
///
/// Deserializable so embedders can carry it in their project
/// configuration; every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Wall-clock wait for a peer's lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Time after which an unreleased lock self-expires, in milliseconds.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// Polling interval for blocking lock acquisition, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_ttl_ms: default_lock_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CacheConfig {
    /// The lock wait timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// The lock staleness TTL as a [`Duration`].
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// The lock poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Exclusive compiling rights for one cache key.
///
/// Opaque and intentionally not `Clone`: [`LockCoordinator::release`]
/// consumes the handle, so one handle cannot be released twice in safe
/// code. Handles are minted by backends; the token identifies one
/// acquisition so an expired-and-reclaimed lock cannot be released by its
/// previous holder.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: u64,
}

impl LockHandle {
    /// Mints a handle. Only backends should call this.
    pub fn new(key: impl Into<String>, token: u64) -> Self {
        Self {
            key: key.into(),
            token,
        }
    }

    /// The cache key this handle is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The backend-issued token identifying this acquisition.
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Keyed cache entry storage.
///
/// Reads are fail-safe: corruption or format mismatch reads as a miss,
/// never an error, since every read failure is by definition a cache miss.
/// Writes may race; all legitimate writers for one key produce equivalent
/// entries, so the backend picks the winner.
pub trait CacheStore {
    /// `true` if an entry exists for `key`.
    fn exists(&self, key: &str) -> bool;

    /// Reads the entry for `key`; `None` on miss or undecodable data.
    fn read(&self, key: &str) -> Option<StorableEntry>;

    /// Writes the entry for `key`. Entries become visible to other
    /// parties atomically, never partially.
    fn write(&self, key: &str, entry: StorableEntry) -> Result<(), CacheError>;
}

/// Exclusive-compile lock coordination.
///
/// `lock` is the only operation allowed to block; `try_lock` and
/// `release` complete without waiting on another party. A held lock must
/// become reacquirable after the backend's staleness TTL even if its
/// holder crashed without releasing.
pub trait LockCoordinator {
    /// Non-blocking acquisition; `None` while another holder is active.
    fn try_lock(&self, key: &str) -> Result<Option<LockHandle>, CacheError>;

    /// Blocking acquisition, bounded by `timeout` of wall-clock time.
    /// Fails with [`CacheError::LockTimeout`] when no lock becomes
    /// available in time. A successful return does not guarantee a cache
    /// entry exists: only compiling rights, or (for a waiter) that a
    /// prior holder's result should now be visible.
    fn lock(&self, key: &str, timeout: Duration) -> Result<LockHandle, CacheError>;

    /// Releases a held lock. Fails with [`CacheError::LockNotHeld`] for
    /// handles the backend does not recognize: never acquired here, or
    /// expired and reclaimed by another party.
    fn release(&self, handle: LockHandle) -> Result<(), CacheError>;
}

/// Full backend capability: storage plus lock coordination.
pub trait CacheBackend: CacheStore + LockCoordinator {}

impl<T: CacheStore + LockCoordinator + ?Sized> CacheBackend for T {}
