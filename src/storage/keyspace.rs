//! Keyspace With Expiry
//!
//! The keyspace is two [`Dict`]s sharing the same keys:
//!
//! ```text
//! data   : key -> Object          every live key
//! expire : key -> unix ms         only keys with a TTL
//! ```
//!
//! A key in `expire` is always present in `data`. Expired keys are removed in
//! two ways:
//!
//! 1. **Lazy**: every lookup first checks the key's deadline and deletes it
//!    from both dictionaries if it has passed.
//! 2. **Active**: [`Keyspace::active_expire_cycle`] samples random entries of
//!    `expire` from a reactor timer and deletes the ones that are due.
//!
//! Sampling bounds the work per tick, so an expired key that is never read
//! can linger until it happens to be sampled.

use crate::storage::dict::Dict;
use crate::storage::object::Object;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Source of wall-clock time in unix milliseconds.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Remaining time to live of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist
    Missing,
    /// The key exists and has no expiry
    Persistent,
    /// Milliseconds left before the key expires
    Remaining(i64),
}

/// Keyspace counters reported by INFO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Keys removed because their deadline passed
    pub expired_keys: u64,
    /// Reads that found a live key
    pub keyspace_hits: u64,
    /// Reads that found nothing
    pub keyspace_misses: u64,
}

/// The database: data plus the expire index.
pub struct Keyspace {
    data: Dict<Bytes, Object>,
    expire: Dict<Bytes, i64>,
    clock: Box<dyn Clock>,
    stats: KeyspaceStats,
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("keys", &self.data.len())
            .field("expires", &self.expire.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    /// Creates an empty keyspace on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty keyspace reading time from `clock`.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            data: Dict::new(),
            expire: Dict::new(),
            clock: Box::new(clock),
            stats: KeyspaceStats::default(),
        }
    }

    /// Current time in unix milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Deletes `key` if its deadline has passed. Returns true if it did.
    fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let deadline = self.expire.get(key).copied();
        match deadline {
            Some(when) if when <= self.now_ms() => {
                self.delete(key);
                self.stats.expired_keys += 1;
                trace!(key = ?String::from_utf8_lossy(key), "Lazily expired key");
                true
            }
            _ => false,
        }
    }

    /// Looks up a key for reading, applying lazy expiry and counting hits/misses.
    pub fn lookup_read(&mut self, key: &[u8]) -> Option<Object> {
        self.expire_if_needed(key);
        let value = self.data.get(key).cloned();
        if value.is_some() {
            self.stats.keyspace_hits += 1;
        } else {
            self.stats.keyspace_misses += 1;
        }
        value
    }

    /// Looks up a key that is about to be modified.
    pub fn lookup_write(&mut self, key: &[u8]) -> Option<Object> {
        self.expire_if_needed(key);
        self.data.get(key).cloned()
    }

    /// Mutable access to a live value, for in-place updates that keep the TTL.
    ///
    /// Combine with [`std::rc::Rc::make_mut`]: the value is copied only if a
    /// reader still holds another reference.
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.expire_if_needed(key);
        self.data.get_mut(key)
    }

    /// Returns true if the key exists and has not expired.
    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        self.data.contains_key(key)
    }

    /// Sets a key, discarding any TTL it had.
    ///
    /// The previous value (if any) is dropped here, releasing one reference.
    pub fn set(&mut self, key: Bytes, value: Object) {
        let _ = self.expire.delete(&key[..]);
        self.data.set(key, value);
    }

    /// Replaces the value of a key but keeps its TTL.
    pub fn update(&mut self, key: Bytes, value: Object) {
        self.data.set(key, value);
    }

    /// Adds a key only if it is absent. Returns false if it already existed.
    pub fn add(&mut self, key: Bytes, value: Object) -> bool {
        self.expire_if_needed(&key);
        self.data.add(key, value).is_ok()
    }

    /// Removes a key from both dictionaries. Returns true if it existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let _ = self.expire.delete(key);
        self.data.delete(key).is_ok()
    }

    /// Sets an absolute deadline in unix milliseconds.
    ///
    /// Returns false if the key does not exist. A deadline in the past
    /// deletes the key immediately.
    pub fn set_expire(&mut self, key: &[u8], at_ms: i64) -> bool {
        self.expire_if_needed(key);
        let Some(stored) = self.data.find(key).map(|(k, _)| k.clone()) else {
            return false;
        };

        if at_ms <= self.now_ms() {
            self.delete(key);
            self.stats.expired_keys += 1;
        } else {
            self.expire.set(stored, at_ms);
        }
        true
    }

    /// Removes the TTL of a key. Returns true if a TTL was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        self.expire.delete(key).is_ok()
    }

    /// Remaining time to live of a key.
    pub fn ttl_ms(&mut self, key: &[u8]) -> Ttl {
        self.expire_if_needed(key);
        if !self.data.contains_key(key) {
            return Ttl::Missing;
        }
        let deadline = self.expire.get(key).copied();
        match deadline {
            Some(when) => Ttl::Remaining((when - self.now_ms()).max(0)),
            None => Ttl::Persistent,
        }
    }

    /// One round of active expiry.
    ///
    /// Samples up to `samples` random entries of the expire index and deletes
    /// the ones whose deadline has passed. Returns the number of keys removed.
    pub fn active_expire_cycle(&mut self, samples: usize) -> usize {
        let now = self.now_ms();
        let mut expired = 0;

        for _ in 0..samples {
            let Some((key, when)) = self.expire.random_entry().map(|(k, w)| (k.clone(), *w))
            else {
                break;
            };
            if when <= now {
                self.delete(&key);
                expired += 1;
            }
        }

        self.stats.expired_keys += expired as u64;
        expired
    }

    /// Returns all live keys matching a glob pattern.
    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Bytes> {
        let now = self.now_ms();
        let candidates: Vec<Bytes> = self
            .data
            .iter()
            .map(|(k, _)| k)
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();

        candidates
            .into_iter()
            .filter(|k| !self.expire.get(&k[..]).is_some_and(|&when| when <= now))
            .collect()
    }

    /// Number of keys, including ones that expired but were not yet removed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys with a TTL.
    pub fn expires(&self) -> usize {
        self.expire.len()
    }

    /// Removes every key.
    pub fn flush(&mut self) {
        self.data.clear();
        self.expire.clear();
    }

    pub fn stats(&self) -> KeyspaceStats {
        self.stats
    }
}

/// Glob matching for KEYS: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
///
/// Iterative: on a mismatch only the most recent `*` is retried, so the cost is
/// bounded by `pattern.len() * text.len()` and the stack stays flat.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index just past the last `*`, and the text index it is retrying from.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if let Some(&token) = pattern.get(p) {
            let step = match token {
                b'*' => {
                    while pattern.get(p) == Some(&b'*') {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    star = Some((p, t));
                    continue;
                }
                b'?' => Some(1),
                b'[' => match match_class(&pattern[p + 1..], text[t]) {
                    Some((true, consumed)) => Some(1 + consumed),
                    _ => None,
                },
                b'\\' if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(2),
                c => (c == text[t]).then_some(1),
            };

            if let Some(step) = step {
                p += step;
                t += 1;
                continue;
            }
        }

        // Mismatch: let the last star swallow one more byte.
        match star {
            Some((after_star, from)) => {
                p = after_star;
                t = from + 1;
                star = Some((after_star, t));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Matches `c` against a bracket class body (the bytes after `[`).
///
/// Returns whether it matched and how many pattern bytes the class used,
/// closing `]` included. `None` for an unterminated class.
fn match_class(class: &[u8], c: u8) -> Option<(bool, usize)> {
    let (negate, mut rest) = match class.split_first() {
        Some((b'^', tail)) => (true, tail),
        _ => (false, class),
    };

    let mut matched = false;
    loop {
        match rest {
            [] => return None,
            [b']', tail @ ..] => {
                rest = tail;
                break;
            }
            [lo, b'-', hi, tail @ ..] if *hi != b']' => {
                matched |= (*lo..=*hi).contains(&c);
                rest = tail;
            }
            [x, tail @ ..] => {
                matched |= *x == c;
                rest = tail;
            }
        }
    }

    Some((matched != negate, class.len() - rest.len()))
}
