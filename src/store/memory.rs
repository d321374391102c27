//! In-memory backend: a `BTreeMap` behind a `RwLock`.
//!
//! This is the reference implementation of [`KvStore`] — small enough to
//! audit against the trait contract by eye — and the backend every unit
//! test reaches for. It is **not** a cache for the disk store; the two
//! are peers behind the same trait.
//!
//! Iterators snapshot the matching range at creation. The trait contract
//! already forbids writing into a domain while iterating over it, so a
//! snapshot costs nothing semantically and removes any chance of holding
//! the lock across user code.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::{prefix_end, BatchOp, KvIter, KvStore, StoreError, WriteBatch};

/// Thread-safe in-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored. Test convenience.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn iter_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        reverse: bool,
    ) -> Result<KvIter<'_>, StoreError> {
        let entries = self.entries.read();

        let upper = prefix_end(prefix);
        // A cursor outside the prefix domain would invert the range
        // bounds; such a scan is simply empty.
        if let Some(cursor) = cursor {
            let below = reverse && cursor < prefix;
            let above = !reverse && upper.as_deref().is_some_and(|end| cursor >= end);
            if below || above {
                return Ok(Box::new(std::iter::empty()));
            }
        }
        let (low, high): (Bound<Vec<u8>>, Bound<Vec<u8>>) = if reverse {
            let high = match cursor {
                Some(c) => Bound::Included(c.to_vec()),
                None => match upper {
                    Some(end) => Bound::Excluded(end),
                    None => Bound::Unbounded,
                },
            };
            (Bound::Included(prefix.to_vec()), high)
        } else {
            let low = match cursor {
                Some(c) if c >= prefix => Bound::Included(c.to_vec()),
                _ => Bound::Included(prefix.to_vec()),
            };
            let high = match upper {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            };
            (low, high)
        };

        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = entries
            .range((low, high))
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if reverse {
            pairs.reverse();
        }
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // One write lock for the whole batch: atomic by construction.
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(iter: KvIter<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        iter.map(|r| r.unwrap()).collect()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for key in ["a/1", "a/2", "a/3", "b/1", "b/2"] {
            store.set(key.as_bytes(), key.as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn point_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.get(b"k").unwrap(), None);
        assert!(!store.has(b"k").unwrap());

        store.set(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.has(b"k").unwrap());

        store.set(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));

        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        // Deleting again is a no-op, not an error.
        store.delete(b"k").unwrap();
    }

    #[test]
    fn empty_key_is_a_valid_key() {
        let store = MemoryStore::new();
        store.set(b"", b"root").unwrap();
        assert_eq!(store.get(b"").unwrap(), Some(b"root".to_vec()));
    }

    #[test]
    fn prefix_iteration_scopes_to_domain() {
        let store = seeded();
        let keys: Vec<_> = collect(store.iter_prefix(b"a/", None, false).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec(), b"a/3".to_vec()]);
    }

    #[test]
    fn forward_cursor_is_inclusive() {
        let store = seeded();
        let keys: Vec<_> = collect(store.iter_prefix(b"a/", Some(b"a/2"), false).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/2".to_vec(), b"a/3".to_vec()]);
    }

    #[test]
    fn reverse_iteration_and_cursor() {
        let store = seeded();
        let keys: Vec<_> = collect(store.iter_prefix(b"a/", None, true).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/3".to_vec(), b"a/2".to_vec(), b"a/1".to_vec()]);

        // Reverse cursor: greatest key <= cursor comes first.
        let keys: Vec<_> = collect(store.iter_prefix(b"a/", Some(b"a/2"), true).unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/2".to_vec(), b"a/1".to_vec()]);
    }

    #[test]
    fn batch_applies_in_order() {
        let store = seeded();
        let mut batch = WriteBatch::new();
        batch.set(b"a/4".to_vec(), b"x".to_vec());
        batch.delete(b"a/1".to_vec());
        batch.set(b"a/4".to_vec(), b"y".to_vec()); // later op wins
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"a/1").unwrap(), None);
        assert_eq!(store.get(b"a/4").unwrap(), Some(b"y".to_vec()));
    }
}
