//! On-disk backend over sled.
//!
//! sled gives us everything this layer needs from an embedded engine:
//! lock-free concurrent reads, ordered byte keys with range scans, and
//! atomic `Batch` application. This file is a thin adapter from those
//! primitives to the [`KvStore`] trait — all policy (key layout, what
//! goes in a batch, when to flush) lives in the layers above.
//!
//! `open_temporary` backs tests and throwaway tooling: the database
//! lives in a temp directory and is removed when dropped.

use std::ops::Bound;
use std::path::Path;

use super::{prefix_end, BatchOp, KvIter, KvStore, StoreError, WriteBatch};

/// sled-backed [`KvStore`].
///
/// Cloning is cheap and shares the underlying database, the same way the
/// `sled::Db` handle itself behaves.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open a temporary database that is deleted on drop. For tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Block until all previous writes are durable on disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(key)?)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn iter_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        reverse: bool,
    ) -> Result<KvIter<'_>, StoreError> {
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
        let domain_high = match upper {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };

        let (low, high) = if reverse {
            let high = match cursor {
                Some(c) => Bound::Included(c.to_vec()),
                None => domain_high,
            };
            (Bound::Included(prefix.to_vec()), high)
        } else {
            let low = match cursor {
                Some(c) if c >= prefix => Bound::Included(c.to_vec()),
                _ => Bound::Included(prefix.to_vec()),
            };
            (low, domain_high)
        };

        let range = self.db.range::<Vec<u8>, _>((low, high));
        let prefix = prefix.to_vec();
        let mapped = range.map(move |item| {
            let (key, value) = item?;
            Ok((key.to_vec(), value.to_vec()))
        });
        let iter: KvIter<'_> = if reverse {
            // A cursor past the domain end could let foreign keys into the
            // range; keep errors, drop keys outside the prefix.
            Box::new(mapped.rev().filter(move |item| match item {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true,
            }))
        } else {
            Box::new(mapped)
        };
        Ok(iter)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.flush()
    }
}
