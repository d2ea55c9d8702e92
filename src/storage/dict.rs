//! Incrementally Rehashed Hash Table
//!
//! This module implements the dictionary that backs both the keyspace and the
//! expire index. It is a chained hash table that never resizes in one go:
//! when it grows, a second table is allocated and buckets are migrated one at
//! a time, piggybacking on normal reads and writes.
//!
//! ## Layout
//!
//! ```text
//!            rehash_idx
//!                │
//!                ▼
//! ht[0]  [ ][ ][ ][a][ ][b,c][ ][d]          (size 8, buckets < idx empty)
//!
//! ht[1]  [ ][x][ ][ ][ ][ ][ ][ ][ ][ ][y][ ][ ][ ][ ][ ]   (size 16)
//! ```
//!
//! While a migration is in flight, lookups probe both tables and new entries
//! always land in `ht[1]`. Once `ht[0]` is empty the tables are swapped and
//! `ht[1]` goes away.
//!
//! ## Growth Policy
//!
//! - An empty dictionary allocates [`DICT_HT_INITIAL_SIZE`] buckets on the
//!   first insert.
//! - When `used > size * DICT_FORCE_RESIZE_RATIO` the dictionary starts
//!   migrating into a table of `next_power(used * DICT_HT_GROW_RATIO)`.

use rand::Rng;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use thiserror::Error;

/// Number of buckets allocated on first insert.
pub const DICT_HT_INITIAL_SIZE: usize = 8;

/// Load factor (entries per bucket) above which the table grows.
pub const DICT_FORCE_RESIZE_RATIO: usize = 3;

/// Multiplier applied to `used` when picking the next table size.
pub const DICT_HT_GROW_RATIO: usize = 2;

/// Empty-bucket draws tolerated by [`Dict::random_entry`] before it falls
/// back to a linear scan.
const RANDOM_SAMPLE_RETRIES: usize = 64;

/// Errors returned by dictionary operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    /// An expansion was requested while a migration is still running
    #[error("dictionary is already rehashing")]
    Rehashing,

    /// The requested size cannot hold the current entries
    #[error("invalid table size {size} for {used} entries")]
    InvalidSize { size: usize, used: usize },

    /// `add` found the key already present
    #[error("key already exists")]
    AlreadyExists,

    /// `delete` did not find the key
    #[error("key not found")]
    NotFound,
}

struct DictEntry<K, V> {
    key: K,
    value: V,
}

/// One of the two tables. Each bucket owns its chain.
struct HashTable<K, V> {
    buckets: Vec<Vec<DictEntry<K, V>>>,
    mask: usize,
    used: usize,
}

impl<K, V> HashTable<K, V> {
    fn with_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Self {
            buckets,
            mask: size - 1,
            used: 0,
        }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }
}

/// Where an entry lives: (table, bucket, position in chain).
type Slot = (usize, usize, usize);

/// A hash table that grows by incremental rehashing.
///
/// Lookups take `&mut self` because every access advances a pending
/// migration by one bucket.
///
/// # Example
///
/// ```
/// use emberkv::storage::Dict;
///
/// let mut dict = Dict::new();
/// dict.add("name", 1).unwrap();
/// assert_eq!(dict.get("name"), Some(&1));
/// assert!(dict.add("name", 2).is_err());
/// assert_eq!(dict.set("name", 3), Some(1));
/// ```
pub struct Dict<K, V, S = RandomState> {
    tables: [Option<HashTable<K, V>>; 2],
    /// Next `ht[0]` bucket to migrate, `None` when not rehashing
    rehash_idx: Option<usize>,
    hash_builder: S,
}

impl<K, V> Dict<K, V, RandomState> {
    /// Creates an empty dictionary. No buckets are allocated until the first insert.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V> Default for Dict<K, V, RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for Dict<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dict")
            .field("len", &self.len())
            .field("table_sizes", &self.table_sizes())
            .field("rehash_idx", &self.rehash_idx)
            .finish()
    }
}

impl<K, V, S> Dict<K, V, S> {
    /// Creates an empty dictionary using `hash_builder` to hash keys.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            tables: [None, None],
            rehash_idx: None,
            hash_builder,
        }
    }

    /// Number of entries across both tables.
    pub fn len(&self) -> usize {
        self.tables.iter().flatten().map(|t| t.used).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while a migration from `ht[0]` to `ht[1]` is in progress.
    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// The migration cursor, if rehashing.
    pub fn rehash_index(&self) -> Option<usize> {
        self.rehash_idx
    }

    /// Bucket counts of `ht[0]` and `ht[1]` (zero when unallocated).
    pub fn table_sizes(&self) -> (usize, usize) {
        let size = |t: &Option<HashTable<K, V>>| t.as_ref().map_or(0, HashTable::size);
        (size(&self.tables[0]), size(&self.tables[1]))
    }

    /// Drops every entry and releases both tables.
    pub fn clear(&mut self) {
        self.tables = [None, None];
        self.rehash_idx = None;
    }

    /// Iterates over all entries in both tables, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.tables
            .iter()
            .flatten()
            .flat_map(|t| t.buckets.iter().flatten())
            .map(|e| (&e.key, &e.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Maps a slot index in `[0, size0 + size1)` onto a bucket.
    fn bucket_at(&self, slot: usize) -> &[DictEntry<K, V>] {
        let (size0, _) = self.table_sizes();
        let (table, idx) = if slot < size0 {
            (&self.tables[0], slot)
        } else {
            (&self.tables[1], slot - size0)
        };
        table
            .as_ref()
            .and_then(|t| t.buckets.get(idx))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl<K, V, S> Dict<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        self.hash_builder.hash_one(key) as usize
    }

    /// Migrates one bucket if a migration is in progress.
    #[inline]
    pub fn rehash_step(&mut self) {
        if self.is_rehashing() {
            self.rehash(1);
        }
    }

    /// Migrates up to `steps` non-empty buckets from `ht[0]` to `ht[1]`.
    ///
    /// Returns true if there is still work left.
    pub fn rehash(&mut self, steps: usize) -> bool {
        let Some(mut idx) = self.rehash_idx else {
            return false;
        };

        {
            let [Some(old), Some(new)] = &mut self.tables else {
                self.rehash_idx = None;
                return false;
            };

            for _ in 0..steps {
                if old.used == 0 {
                    break;
                }
                while idx < old.size() && old.buckets[idx].is_empty() {
                    idx += 1;
                }
                if idx == old.size() {
                    break;
                }

                // Entries must be rehashed: ht[1] has a different mask.
                let chain = std::mem::take(&mut old.buckets[idx]);
                old.used -= chain.len();
                for entry in chain {
                    let bucket = self.hash_builder.hash_one(&entry.key) as usize & new.mask;
                    new.buckets[bucket].push(entry);
                    new.used += 1;
                }
                idx += 1;
            }
        }

        if self.tables[0].as_ref().is_some_and(|t| t.used == 0) {
            self.tables[0] = self.tables[1].take();
            self.rehash_idx = None;
            return false;
        }

        self.rehash_idx = Some(idx);
        true
    }

    /// Allocates a table of `next_power(size)` buckets.
    ///
    /// The first call installs `ht[0]` directly; later calls install `ht[1]`
    /// and start a migration.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Err(DictError::Rehashing);
        }

        let used = self.len();
        let real_size = next_power(size);
        let current = self.tables[0].as_ref().map(HashTable::size);
        if size < used || current == Some(real_size) {
            return Err(DictError::InvalidSize { size, used });
        }

        let table = HashTable::with_size(real_size);
        if current.is_none() {
            self.tables[0] = Some(table);
        } else {
            self.tables[1] = Some(table);
            self.rehash_idx = Some(0);
        }
        Ok(())
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }

        let grow_to = match &self.tables[0] {
            None => Some(DICT_HT_INITIAL_SIZE),
            Some(t) if t.used > t.size() * DICT_FORCE_RESIZE_RATIO => {
                Some(t.used * DICT_HT_GROW_RATIO)
            }
            Some(_) => None,
        };

        if let Some(size) = grow_to {
            let expanded = self.expand(size);
            debug_assert!(expanded.is_ok());
        }
    }

    /// Finds the slot holding `key` without advancing the migration.
    fn lookup<Q>(&self, hash: usize, key: &Q) -> Option<Slot>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        for (i, table) in self.tables.iter().enumerate() {
            let Some(table) = table else { break };
            let bucket = hash & table.mask;
            if let Some(pos) = table.buckets[bucket]
                .iter()
                .position(|e| e.key.borrow() == key)
            {
                return Some((i, bucket, pos));
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    fn locate<Q>(&mut self, key: &Q) -> Option<Slot>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.tables[0].as_ref()?;
        self.rehash_step();
        let hash = self.hash_of(key);
        self.lookup(hash, key)
    }

    fn entry_at(&self, (table, bucket, pos): Slot) -> Option<&DictEntry<K, V>> {
        self.tables[table].as_ref()?.buckets[bucket].get(pos)
    }

    fn entry_at_mut(&mut self, (table, bucket, pos): Slot) -> Option<&mut DictEntry<K, V>> {
        self.tables[table].as_mut()?.buckets[bucket].get_mut(pos)
    }

    /// Pushes a key known to be absent onto the table receiving writes.
    fn insert_unique(&mut self, hash: usize, key: K, value: V) {
        let target = usize::from(self.is_rehashing());
        if let Some(table) = self.tables[target].as_mut() {
            let bucket = hash & table.mask;
            table.buckets[bucket].push(DictEntry { key, value });
            table.used += 1;
        }
    }

    /// Looks up `key`, returning the stored key and value.
    pub fn find<Q>(&mut self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.locate(key)?;
        self.entry_at(slot).map(|e| (&e.key, &e.value))
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.locate(key)?;
        self.entry_at_mut(slot).map(|e| &mut e.value)
    }

    pub fn contains_key<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.locate(key).is_some()
    }

    /// Inserts a new entry. Fails with [`DictError::AlreadyExists`] if the key
    /// is present in either table.
    pub fn add(&mut self, key: K, value: V) -> Result<(), DictError> {
        self.rehash_step();
        self.expand_if_needed();

        let hash = self.hash_of(&key);
        if self.lookup(hash, &key).is_some() {
            return Err(DictError::AlreadyExists);
        }
        self.insert_unique(hash, key, value);
        Ok(())
    }

    /// Inserts or overwrites. Returns the value that was replaced, which the
    /// caller drops to release it.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.rehash_step();

        let hash = self.hash_of(&key);
        if let Some(slot) = self.lookup(hash, &key) {
            return self
                .entry_at_mut(slot)
                .map(|e| std::mem::replace(&mut e.value, value));
        }

        self.expand_if_needed();
        self.insert_unique(hash, key, value);
        None
    }

    /// Unlinks `key` from whichever table holds it.
    pub fn delete<Q>(&mut self, key: &Q) -> Result<(K, V), DictError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (table, bucket, pos) = self.locate(key).ok_or(DictError::NotFound)?;
        let table = self.tables[table].as_mut().ok_or(DictError::NotFound)?;
        let entry = table.buckets[bucket].swap_remove(pos);
        table.used -= 1;
        Ok((entry.key, entry.value))
    }

    /// Returns a pseudo-randomly chosen entry.
    ///
    /// Buckets are drawn uniformly across both tables, so the table with more
    /// buckets is sampled more often. After [`RANDOM_SAMPLE_RETRIES`] empty
    /// draws the search degrades to a scan from a random start, so a non-empty
    /// dictionary always yields an entry.
    pub fn random_entry(&mut self) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();

        let (size0, size1) = self.table_sizes();
        let total = size0 + size1;
        let mut rng = rand::thread_rng();

        let mut slot = None;
        for _ in 0..RANDOM_SAMPLE_RETRIES {
            let candidate = rng.gen_range(0..total);
            if !self.bucket_at(candidate).is_empty() {
                slot = Some(candidate);
                break;
            }
        }
        let slot = match slot {
            Some(s) => s,
            None => {
                let start = rng.gen_range(0..total);
                (0..total)
                    .map(|offset| (start + offset) % total)
                    .find(|&s| !self.bucket_at(s).is_empty())?
            }
        };

        let chain = self.bucket_at(slot);
        let entry = &chain[rng.gen_range(0..chain.len())];
        Some((&entry.key, &entry.value))
    }
}

/// Smallest power of two that is at least `size` and at least the initial size.
fn next_power(size: usize) -> usize {
    size.max(DICT_HT_INITIAL_SIZE)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::rc::Rc;

    fn key(i: usize) -> String {
        format!("k{}", i)
    }

    #[test]
    fn test_add_find_delete() {
        let mut dict = Dict::new();
        assert!(dict.random_entry().is_none());

        dict.add(key(1), "v1").unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.find("k1"), Some((&key(1), &"v1")));
        assert_eq!(dict.get("k1"), Some(&"v1"));

        assert_eq!(dict.delete("k1"), Ok((key(1), "v1")));
        assert_eq!(dict.get("k1"), None);
        assert_eq!(dict.len(), 0);
        assert_eq!(dict.delete("k1"), Err(DictError::NotFound));
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut dict = Dict::new();
        dict.add(key(1), 1).unwrap();
        assert_eq!(dict.add(key(1), 2), Err(DictError::AlreadyExists));
        assert_eq!(dict.get("k1"), Some(&1));
    }

    #[test]
    fn test_set_overwrites_and_returns_previous() {
        let mut dict = Dict::new();
        assert_eq!(dict.set(key(1), 1), None);
        assert_eq!(dict.set(key(1), 2), Some(1));
        assert_eq!(dict.get("k1"), Some(&2));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_set_releases_previous_value_once() {
        let mut dict = Dict::new();
        let v1 = Rc::new("v1");
        let v2 = Rc::new("v2");

        dict.set(key(1), Rc::clone(&v1));
        assert_eq!(Rc::strong_count(&v1), 2);

        dict.set(key(1), Rc::clone(&v2));
        assert_eq!(Rc::strong_count(&v1), 1);
        assert_eq!(Rc::strong_count(&v2), 2);
    }

    #[test]
    fn test_uninitialized_table_has_no_side_effects() {
        let mut dict: Dict<String, i32> = Dict::new();
        assert_eq!(dict.find("missing"), None);
        assert_eq!(dict.delete("missing"), Err(DictError::NotFound));
        assert_eq!(dict.table_sizes(), (0, 0));
        assert!(!dict.is_rehashing());
    }

    #[test]
    fn test_get_mut() {
        let mut dict = Dict::new();
        dict.add(key(1), 10).unwrap();
        if let Some(v) = dict.get_mut("k1") {
            *v += 5;
        }
        assert_eq!(dict.get("k1"), Some(&15));
    }

    #[test]
    fn test_borrowed_byte_lookup() {
        let mut dict = Dict::new();
        dict.add(Bytes::from("key"), 1).unwrap();
        assert_eq!(dict.get(&b"key"[..]), Some(&1));
        assert!(dict.contains_key(&b"key"[..]));
        assert!(!dict.contains_key(&b"other"[..]));
    }

    #[test]
    fn test_load_factor_triggers_rehash() {
        let mut dict = Dict::new();
        let threshold = DICT_HT_INITIAL_SIZE * DICT_FORCE_RESIZE_RATIO;

        // Growth is checked before insertion, so the table holds exactly
        // `threshold + 1` entries before the next add starts migrating.
        for i in 0..=threshold {
            dict.add(key(i), i).unwrap();
        }
        assert!(!dict.is_rehashing());
        assert_eq!(dict.table_sizes(), (DICT_HT_INITIAL_SIZE, 0));

        dict.add(key(threshold + 1), threshold + 1).unwrap();
        assert!(dict.is_rehashing());
        assert_eq!(dict.rehash_index(), Some(0));

        let expected = ((threshold + 1) * DICT_HT_GROW_RATIO).next_power_of_two();
        assert_eq!(dict.table_sizes(), (DICT_HT_INITIAL_SIZE, expected));
    }

    #[test]
    fn test_migration_terminates() {
        let mut dict = Dict::new();
        for i in 0..26 {
            dict.add(key(i), i).unwrap();
        }
        assert!(dict.is_rehashing());
        let (old_size, new_size) = dict.table_sizes();

        // One step per non-empty old bucket is enough.
        for _ in 0..old_size {
            dict.rehash_step();
        }
        assert!(!dict.is_rehashing());
        assert_eq!(dict.table_sizes(), (new_size, 0));

        for i in 0..26 {
            assert_eq!(dict.get(key(i).as_str()), Some(&i));
        }
    }

    #[test]
    fn test_random_access_drives_migration() {
        let mut dict = Dict::new();
        for i in 0..26 {
            dict.add(key(i), i).unwrap();
        }
        for _ in 0..=DICT_HT_INITIAL_SIZE {
            assert!(dict.random_entry().is_some());
        }
        assert!(!dict.is_rehashing());
        assert_eq!(dict.len(), 26);
    }

    #[test]
    fn test_keys_reachable_mid_migration() {
        let mut dict = Dict::new();
        let mut model = HashSet::new();
        let mut rng = StdRng::seed_from_u64(7);

        for round in 0..5_000 {
            let k = rng.gen_range(0..400usize);
            if rng.gen_bool(0.65) {
                let added = dict.add(key(k), k).is_ok();
                assert_eq!(added, model.insert(k), "round {}", round);
            } else {
                let deleted = dict.delete(key(k).as_str()).is_ok();
                assert_eq!(deleted, model.remove(&k), "round {}", round);
            }
            assert_eq!(dict.len(), model.len());

            let probe = rng.gen_range(0..400usize);
            assert_eq!(
                dict.contains_key(key(probe).as_str()),
                model.contains(&probe),
                "round {}",
                round
            );
        }

        for k in 0..400 {
            assert_eq!(dict.contains_key(key(k).as_str()), model.contains(&k));
        }
        let listed: HashSet<usize> = dict.iter().map(|(_, v)| *v).collect();
        assert_eq!(listed, model);
    }

    #[test]
    fn test_expand_rejected_while_rehashing() {
        let mut dict = Dict::new();
        for i in 0..26 {
            dict.add(key(i), i).unwrap();
        }
        assert!(dict.is_rehashing());
        assert_eq!(dict.expand(1024), Err(DictError::Rehashing));
    }

    #[test]
    fn test_expand_rejects_small_size() {
        let mut dict = Dict::new();
        for i in 0..10 {
            dict.add(key(i), i).unwrap();
        }
        assert_eq!(
            dict.expand(4),
            Err(DictError::InvalidSize { size: 4, used: 10 })
        );
    }

    #[test]
    fn test_random_entry_on_sparse_table() {
        let mut dict = Dict::new();
        dict.expand(1 << 14).unwrap();
        dict.add(key(1), 1).unwrap();

        for _ in 0..20 {
            assert_eq!(dict.random_entry(), Some((&key(1), &1)));
        }
    }

    #[test]
    fn test_random_entry_returns_present_keys() {
        let mut dict = Dict::new();
        for i in 0..100 {
            dict.add(key(i), i).unwrap();
        }
        for _ in 0..200 {
            let (k, v) = dict.random_entry().unwrap();
            assert_eq!(k, &key(*v));
        }
    }

    #[test]
    fn test_clear() {
        let mut dict = Dict::new();
        for i in 0..30 {
            dict.add(key(i), i).unwrap();
        }
        dict.clear();
        assert!(dict.is_empty());
        assert!(!dict.is_rehashing());
        assert_eq!(dict.table_sizes(), (0, 0));
    }

    #[test]
    fn test_keys_cover_both_tables() {
        let mut dict = Dict::new();
        for i in 0..27 {
            dict.add(key(i), i).unwrap();
        }
        assert!(dict.is_rehashing());

        let mut seen: Vec<String> = dict.keys().cloned().collect();
        seen.sort();
        let mut expected: Vec<String> = (0..27).map(key).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
