//! Result cache gateway: keys, TTL policy and the store interface.
//!
//! The engine never assumes a cache is present. Every miss, and every cache
//! fault, is answered by recomputing.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a simulation result stays valid.
pub const SIMULATION_TTL: Duration = Duration::from_secs(60 * 60);

/// How long a built segment network stays valid.
pub const GRAPH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const KEY_PREFIX: &str = "evacflow";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode cached value: {0}")]
    Encode(String),
    #[error("failed to decode cached value: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A namespaced cache key. The dataset version is part of every key, so
/// new road data never reads results computed from old data.
///
/// Components are escaped (`%` as `%25`, `:` as `%3A`), so distinct tuples
/// never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn simulation(scenario: &str, region: &str, version: &str) -> Self {
        Self(format!(
            "{KEY_PREFIX}:simulate:{}:{}:{}",
            escape(scenario),
            escape(&region.to_lowercase()),
            escape(version)
        ))
    }

    pub fn graph(region: &str, version: &str) -> Self {
        Self(format!(
            "{KEY_PREFIX}:graph:{}:{}",
            escape(&region.to_lowercase()),
            escape(version)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape(part: &str) -> Cow<'_, str> {
    if !part.contains([':', '%']) {
        return Cow::Borrowed(part);
    }
    let mut out = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Key-value store the engine reads through.
pub trait CacheGateway<V>: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError>;
    fn put(&self, key: CacheKey, value: &V, ttl: Duration) -> Result<(), CacheError>;
}

/// A gateway that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl<V> CacheGateway<V> for NoCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<V>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: CacheKey, _value: &V, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward. An advance past the latest representable
    /// instant is ignored.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        let next = offset.saturating_add(by);
        if self.base.checked_add(next).is_some() {
            *offset = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock();
        self.base.checked_add(offset).unwrap_or(self.base)
    }
}

// ---------------------------------------------------------------------------
// In-memory cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    /// `None` when the TTL reaches past the latest representable instant.
    expires_at: Option<Instant>,
}

/// Bounded in-process cache with per-entry expiry.
///
/// Values are stored bitcode-encoded, so every hit decodes a fresh value
/// equal in content to the one stored.
pub struct MemoryCache<V> {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    clock: Arc<dyn Clock>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> MemoryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
            _marker: PhantomData,
        }
    }

    /// Number of stored entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<V> fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V> CacheGateway<V> for MemoryCache<V>
where
    V: Serialize + DeserializeOwned,
{
    fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at.is_some_and(|at| at <= now),
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        let Some(entry) = entries.peek(key) else {
            return Ok(None);
        };
        bitcode::deserialize(&entry.bytes)
            .map(Some)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }

    fn put(&self, key: CacheKey, value: &V, ttl: Duration) -> Result<(), CacheError> {
        let bytes = bitcode::serialize(value).map_err(|e| CacheError::Encode(e.to_string()))?;
        let expires_at = self.clock.now().checked_add(ttl);
        self.entries.lock().put(key, Entry { bytes, expires_at });
        Ok(())
    }
}
