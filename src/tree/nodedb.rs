//! Content-addressed node store: a bounded cache and a write batch in
//! front of the KV backend.
//!
//! `get_node` resolves a hash to a materialized node: cache first, then
//! `node/<hash>` in the backend, decode, install. Entries are keyed by
//! content hash, so a cache hit can never be stale — the only policy
//! question is eviction, handled by a two-generation scheme: hits
//! promote into the hot generation; when hot fills up it becomes the
//! cold generation and the previous cold generation is dropped. Anything
//! touched within the last `capacity` insertions survives, which is as
//! much LRU as this workload needs.
//!
//! The pending write batch is *not* stored here: it is owned by the
//! `save_version` in progress and handed over atomically via `commit`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::{blake3_hash, Hash, HashFn};
use crate::store::{self, KvStore, StoreError, WriteBatch};

use super::node::Node;
use super::TreeError;

/// Two-generation approximate-LRU map from node hash to node.
#[derive(Debug, Default)]
struct NodeCache {
    capacity: usize,
    hot: HashMap<Hash, Arc<Node>>,
    cold: HashMap<Hash, Arc<Node>>,
}

impl NodeCache {
    fn new(capacity: usize) -> Self {
        NodeCache {
            capacity,
            hot: HashMap::new(),
            cold: HashMap::new(),
        }
    }

    fn get_hot(&self, hash: &Hash) -> Option<Arc<Node>> {
        self.hot.get(hash).cloned()
    }

    fn has_cold(&self, hash: &Hash) -> bool {
        self.cold.contains_key(hash)
    }

    /// Move a cold entry into the hot generation.
    fn promote(&mut self, hash: &Hash) -> Option<Arc<Node>> {
        let node = self.cold.remove(hash)?;
        self.insert(*hash, Arc::clone(&node));
        Some(node)
    }

    fn insert(&mut self, hash: Hash, node: Arc<Node>) {
        if self.capacity == 0 {
            return;
        }
        if self.hot.len() >= self.capacity {
            self.cold = std::mem::take(&mut self.hot);
        }
        self.hot.insert(hash, node);
    }
}

/// Cache-and-batch layer between the tree and the KV backend.
///
/// Shared by every tree handle over the same backend; safe for
/// concurrent readers. One `NodeDb` pairs with one hash function — all
/// content addresses in a backend namespace must come from the same
/// primitive.
pub struct NodeDb {
    store: Arc<dyn KvStore>,
    cache: RwLock<NodeCache>,
    hash_fn: HashFn,
}

impl std::fmt::Debug for NodeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read();
        f.debug_struct("NodeDb")
            .field("cache_hot", &cache.hot.len())
            .field("cache_cold", &cache.cold.len())
            .field("cache_capacity", &cache.capacity)
            .finish()
    }
}

impl NodeDb {
    /// Node store over `store` hashing with BLAKE3. `cache_size` is the
    /// per-generation entry bound; 0 disables caching.
    pub fn new(store: Arc<dyn KvStore>, cache_size: usize) -> Self {
        Self::with_hash_fn(store, cache_size, blake3_hash)
    }

    /// Same, with an explicit hash primitive.
    pub fn with_hash_fn(store: Arc<dyn KvStore>, cache_size: usize, hash_fn: HashFn) -> Self {
        NodeDb {
            store,
            cache: RwLock::new(NodeCache::new(cache_size)),
            hash_fn,
        }
    }

    pub(crate) fn hash_fn(&self) -> HashFn {
        self.hash_fn
    }

    pub(crate) fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    /// Resolve a node hash to a materialized node.
    ///
    /// A hash that resolves to nothing is corruption: the tree persists
    /// children before anything references them.
    pub fn get_node(&self, hash: &Hash) -> Result<Arc<Node>, TreeError> {
        {
            let cache = self.cache.read();
            if let Some(node) = cache.get_hot(hash) {
                return Ok(node);
            }
            if cache.has_cold(hash) {
                drop(cache);
                if let Some(node) = self.cache.write().promote(hash) {
                    return Ok(node);
                }
                // Promotion raced with eviction; fall through to the backend.
            }
        }

        let bytes = self
            .store
            .get(&store::node_key(hash))?
            .ok_or(TreeError::MissingNode(*hash))?;
        let node = Arc::new(Node::decode_storage(&bytes, *hash)?);
        self.cache.write().insert(*hash, Arc::clone(&node));
        Ok(node)
    }

    /// Stage a frozen node into the batch and install it in the cache.
    /// Idempotent: re-staging a content address rewrites identical bytes.
    pub(crate) fn stage_node(&self, batch: &mut WriteBatch, node: &Arc<Node>, hash: &Hash) {
        batch.set(store::node_key(hash), node.encode_storage());
        self.cache.write().insert(*hash, Arc::clone(node));
    }

    /// Flush a batch atomically. Cache entries are retained — they are
    /// keyed by content hash and stay valid.
    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.store.write_batch(batch)
    }

    /// Root hash recorded for `version`, or `UnknownVersion`. `Ok(None)`
    /// means the version was saved with an empty tree.
    pub fn root_hash_at(&self, version: u64) -> Result<Option<Hash>, TreeError> {
        let value = self
            .store
            .get(&store::root_key(version))?
            .ok_or(TreeError::UnknownVersion(version))?;
        decode_root_entry(&value)
    }

    /// Highest saved version and its root hash, if any version exists.
    /// Found by a reverse scan over the `root/` domain.
    pub fn latest_version(&self) -> Result<Option<(u64, Option<Hash>)>, TreeError> {
        let mut iter = self.store.iter_prefix(store::ROOT_PREFIX, None, true)?;
        match iter.next() {
            None => Ok(None),
            Some(entry) => {
                let (key, value) = entry?;
                let version = store::parse_root_key(&key).ok_or(TreeError::Decode(
                    crate::codec::DecodeError::Invalid("malformed root index key"),
                ))?;
                Ok(Some((version, decode_root_entry(&value)?)))
            }
        }
    }
}

/// A `root/` value is either empty (empty tree) or a 32-byte hash.
fn decode_root_entry(value: &[u8]) -> Result<Option<Hash>, TreeError> {
    if value.is_empty() {
        return Ok(None);
    }
    let hash: Hash = value.try_into().map_err(|_| {
        TreeError::Decode(crate::codec::DecodeError::BadLength {
            expected: 32,
            found: value.len(),
        })
    })?;
    Ok(Some(hash))
}
