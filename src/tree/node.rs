//! The AVL+ node: one shape, two states.
//!
//! A node is a leaf (height 0, carries a value) or an inner node
//! (carries a routing key and two children). A child link is either a
//! bare content hash — the node lives in the backend and materializes
//! through the node store on demand — or a direct pointer to an
//! in-memory node built during the current mutation sequence. The getter
//! prefers the pointer, which is what makes lazy loading and freshly
//! built subtrees share one representation.
//!
//! Two byte layouts, both over the canonical codec:
//!
//! - **storage form** — `height · size · version · key ·`
//!   (`value` for leaves | `leftHash · rightHash` for inners). Persisted
//!   under `node/<hash>`, round-trippable.
//! - **hash form** — what the hash function eats. Leaves hash
//!   `height · size · version · key · H(value)`; inners hash
//!   `height · size · version · leftHash · rightHash` and *omit* the
//!   routing key, so a membership proof needs no interior keys and a
//!   leaf proof exposes only the value's digest, not the value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::codec::{self, DecodeError};
use crate::crypto::{Hash, HashFn};

use super::nodedb::NodeDb;
use super::TreeError;

/// Link from an inner node to one of its children.
#[derive(Debug, Clone)]
pub(crate) enum Child {
    /// Persisted child, addressed by content hash.
    Hash(Hash),
    /// In-memory child. May be dirty (not yet hashed) or frozen.
    Node(Arc<Node>),
}

impl Child {
    /// The child's hash, if known. Dirty in-memory children have none
    /// until they are frozen.
    pub(crate) fn hash(&self) -> Option<Hash> {
        match self {
            Child::Hash(hash) => Some(*hash),
            Child::Node(node) => node.hash.get().copied(),
        }
    }

    /// Materialize the child, going through the node store when only the
    /// hash is at hand.
    pub(crate) fn resolve(&self, ndb: &NodeDb) -> Result<Arc<Node>, TreeError> {
        match self {
            Child::Node(node) => Ok(Arc::clone(node)),
            Child::Hash(hash) => ndb.get_node(hash),
        }
    }
}

/// A node of the AVL+ tree.
///
/// Frozen nodes (hash computed) are immutable and shared via `Arc`;
/// dirty nodes are uniquely owned by the mutation that built them. The
/// hash cell is written exactly once, the persisted flag flips to true
/// only after the node's bytes are durably in the backend.
#[derive(Debug)]
pub struct Node {
    /// Leaf: the entry's key. Inner: the routing key — the leftmost leaf
    /// key of the right subtree.
    pub(crate) key: Vec<u8>,
    /// Leaf payload; always empty on inner nodes.
    pub(crate) value: Vec<u8>,
    /// Version at which this node was created. Part of the hash.
    pub(crate) version: u64,
    /// 0 for leaves; 1 + max(child heights) otherwise.
    pub(crate) height: u8,
    /// Number of leaves underneath (1 for a leaf).
    pub(crate) size: u64,
    pub(crate) left: Option<Child>,
    pub(crate) right: Option<Child>,
    /// Computed lazily, cached per node, written once.
    pub(crate) hash: OnceLock<Hash>,
    /// True once the node's bytes are committed to the backend.
    pub(crate) persisted: AtomicBool,
}

impl Node {
    /// New leaf carrying one key/value binding.
    pub(crate) fn leaf(key: Vec<u8>, value: Vec<u8>, version: u64) -> Self {
        Node {
            key,
            value,
            version,
            height: 0,
            size: 1,
            left: None,
            right: None,
            hash: OnceLock::new(),
            persisted: AtomicBool::new(false),
        }
    }

    /// New inner node over two leaves (the insert split case).
    /// `key` must be the leftmost key of the right subtree.
    pub(crate) fn branch(key: Vec<u8>, version: u64, left: Child, right: Child) -> Self {
        Node {
            key,
            value: Vec::new(),
            version,
            height: 1,
            size: 2,
            left: Some(left),
            right: Some(right),
            hash: OnceLock::new(),
            persisted: AtomicBool::new(false),
        }
    }

    /// Shallow path-copy of an inner node at a new version. The clone is
    /// dirty: no hash, not persisted, children shared with the original.
    ///
    /// Panics on a leaf — leaves are replaced wholesale, never copied.
    pub(crate) fn clone_for(&self, version: u64) -> Node {
        assert!(!self.is_leaf(), "attempt to path-copy a leaf node");
        Node {
            key: self.key.clone(),
            value: Vec::new(),
            version,
            height: self.height,
            size: self.size,
            left: self.left.clone(),
            right: self.right.clone(),
            hash: OnceLock::new(),
            persisted: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.height == 0
    }

    pub(crate) fn left_child(&self) -> &Child {
        self.left.as_ref().expect("inner node without left child")
    }

    pub(crate) fn right_child(&self) -> &Child {
        self.right.as_ref().expect("inner node without right child")
    }

    /// Recompute height and size from the children. Called bottom-up
    /// after every structural change.
    pub(crate) fn update_height_size(&mut self, ndb: &NodeDb) -> Result<(), TreeError> {
        let left = self.left_child().resolve(ndb)?;
        let right = self.right_child().resolve(ndb)?;
        self.height = left.height.max(right.height) + 1;
        self.size = left.size + right.size;
        Ok(())
    }

    /// `height(left) - height(right)`; outside [-1, 1] the node needs
    /// rebalancing.
    pub(crate) fn balance_factor(&self, ndb: &NodeDb) -> Result<i32, TreeError> {
        let left = self.left_child().resolve(ndb)?;
        let right = self.right_child().resolve(ndb)?;
        Ok(i32::from(left.height) - i32::from(right.height))
    }

    // -- Codec ---------------------------------------------------------------

    /// Storage form: the bytes persisted under `node/<hash>`.
    pub(crate) fn encode_storage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.key.len() + self.value.len());
        codec::put_uvarint(&mut buf, u64::from(self.height));
        codec::put_uvarint(&mut buf, self.size);
        codec::put_uvarint(&mut buf, self.version);
        codec::put_bytes(&mut buf, &self.key);
        if self.is_leaf() {
            codec::put_bytes(&mut buf, &self.value);
        } else {
            let left = self
                .left_child()
                .hash()
                .expect("left child hash unset during encode");
            let right = self
                .right_child()
                .hash()
                .expect("right child hash unset during encode");
            codec::put_bytes(&mut buf, &left);
            codec::put_bytes(&mut buf, &right);
        }
        buf
    }

    /// Rebuild a node from storage-form bytes. `hash` is the content
    /// address the bytes were fetched under; the node is marked frozen
    /// and persisted.
    pub(crate) fn decode_storage(bytes: &[u8], hash: Hash) -> Result<Node, DecodeError> {
        let cursor = &mut &bytes[..];
        let height = codec::take_uvarint(cursor)?;
        let height =
            u8::try_from(height).map_err(|_| DecodeError::Invalid("node height exceeds u8"))?;
        let size = codec::take_uvarint(cursor)?;
        let version = codec::take_uvarint(cursor)?;
        let key = codec::take_bytes(cursor)?;

        let node = if height == 0 {
            if size != 1 {
                return Err(DecodeError::Invalid("leaf with size != 1"));
            }
            let value = codec::take_bytes(cursor)?;
            Node {
                key,
                value,
                version,
                height,
                size,
                left: None,
                right: None,
                hash: OnceLock::new(),
                persisted: AtomicBool::new(true),
            }
        } else {
            let left: Hash = codec::take_fixed_bytes(cursor)?;
            let right: Hash = codec::take_fixed_bytes(cursor)?;
            if size < 2 {
                return Err(DecodeError::Invalid("inner node with size < 2"));
            }
            Node {
                key,
                value: Vec::new(),
                version,
                height,
                size,
                left: Some(Child::Hash(left)),
                right: Some(Child::Hash(right)),
                hash: OnceLock::new(),
                persisted: AtomicBool::new(true),
            }
        };
        if !cursor.is_empty() {
            return Err(DecodeError::Invalid("trailing bytes after node"));
        }
        node.hash.set(hash).expect("fresh node already hashed");
        Ok(node)
    }

    /// Hash form: the exact bytes fed to the hash function. Inner nodes
    /// omit the routing key; leaves hash the digest of their value.
    /// Both child hashes must be known by the time this runs.
    fn encode_hash_form(&self, hash_fn: HashFn) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.key.len() + 33);
        codec::put_uvarint(&mut buf, u64::from(self.height));
        codec::put_uvarint(&mut buf, self.size);
        codec::put_uvarint(&mut buf, self.version);
        if self.is_leaf() {
            codec::put_bytes(&mut buf, &self.key);
            codec::put_bytes(&mut buf, &hash_fn(&self.value));
        } else {
            let left = self
                .left_child()
                .hash()
                .expect("left child hash unset during hashing");
            let right = self
                .right_child()
                .hash()
                .expect("right child hash unset during hashing");
            codec::put_bytes(&mut buf, &left);
            codec::put_bytes(&mut buf, &right);
        }
        buf
    }

    // -- Lookups -------------------------------------------------------------

    /// Whether a leaf with `key` exists under this node.
    pub(crate) fn has(&self, ndb: &NodeDb, key: &[u8]) -> Result<bool, TreeError> {
        if self.key == key {
            // Routing keys are always existing leaf keys, so a match on
            // an inner node already answers the question.
            return Ok(true);
        }
        if self.is_leaf() {
            return Ok(false);
        }
        if key < self.key.as_slice() {
            self.left_child().resolve(ndb)?.has(ndb, key)
        } else {
            self.right_child().resolve(ndb)?.has(ndb, key)
        }
    }

    /// Value bound to `key` under this node, if any.
    pub(crate) fn get(&self, ndb: &NodeDb, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        if self.is_leaf() {
            if self.key == key {
                return Ok(Some(self.value.clone()));
            }
            return Ok(None);
        }
        if key < self.key.as_slice() {
            self.left_child().resolve(ndb)?.get(ndb, key)
        } else {
            self.right_child().resolve(ndb)?.get(ndb, key)
        }
    }

    // -- Traversal -----------------------------------------------------------

    /// In-order walk over the whole subtree. The callback sees every
    /// node (inner and leaf) and returns `true` to stop.
    pub(crate) fn traverse(
        &self,
        ndb: &NodeDb,
        ascending: bool,
        cb: &mut dyn FnMut(&Node, u8) -> bool,
    ) -> Result<bool, TreeError> {
        self.traverse_in_range(ndb, None, None, ascending, false, 0, cb)
    }

    /// Bounded in-order walk. Inner nodes are always offered to the
    /// callback; leaves only when their key falls inside
    /// `[start, end)` — or `[start, end]` with `inclusive`. A `None`
    /// bound is open on that side. Returning `true` stops the walk and
    /// the stop propagates upward without touching further subtrees.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn traverse_in_range(
        &self,
        ndb: &NodeDb,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
        inclusive: bool,
        depth: u8,
        cb: &mut dyn FnMut(&Node, u8) -> bool,
    ) -> Result<bool, TreeError> {
        let key = self.key.as_slice();
        let after_start = start.map_or(true, |s| s < key);
        let start_or_after = start.map_or(true, |s| s <= key);
        let before_end = end.map_or(true, |e| if inclusive { key <= e } else { key < e });

        if !self.is_leaf() || (start_or_after && before_end) {
            if cb(self, depth) {
                return Ok(true);
            }
        }
        if self.is_leaf() {
            return Ok(false);
        }

        let mut stop = false;
        if ascending {
            if after_start {
                stop = self.left_child().resolve(ndb)?.traverse_in_range(
                    ndb,
                    start,
                    end,
                    ascending,
                    inclusive,
                    depth + 1,
                    cb,
                )?;
            }
            if stop {
                return Ok(true);
            }
            if before_end {
                stop = self.right_child().resolve(ndb)?.traverse_in_range(
                    ndb,
                    start,
                    end,
                    ascending,
                    inclusive,
                    depth + 1,
                    cb,
                )?;
            }
        } else {
            if before_end {
                stop = self.right_child().resolve(ndb)?.traverse_in_range(
                    ndb,
                    start,
                    end,
                    ascending,
                    inclusive,
                    depth + 1,
                    cb,
                )?;
            }
            if stop {
                return Ok(true);
            }
            if after_start {
                stop = self.left_child().resolve(ndb)?.traverse_in_range(
                    ndb,
                    start,
                    end,
                    ascending,
                    inclusive,
                    depth + 1,
                    cb,
                )?;
            }
        }
        Ok(stop)
    }

    /// Leftmost leaf key under this node, resolving children as needed.
    #[cfg(test)]
    pub(crate) fn leftmost_key(&self, ndb: &NodeDb) -> Result<Vec<u8>, TreeError> {
        if self.is_leaf() {
            return Ok(self.key.clone());
        }
        self.left_child().resolve(ndb)?.leftmost_key(ndb)
    }
}

/// Hash the node and its in-memory descendants bottom-up.
///
/// For every node that is not yet persisted, child hashes are computed
/// first, the hash-form bytes are produced and hashed, and `visit` fires
/// with the node and its hash — this is where `save_version` stages the
/// node's storage bytes. Already-persisted subtrees are skipped whole;
/// a node whose hash was computed by an earlier, failed save is visited
/// again so the retry re-stages it.
pub(crate) fn hash_recursive(
    node: &Arc<Node>,
    hash_fn: HashFn,
    visit: &mut dyn FnMut(&Arc<Node>, &Hash),
) -> Hash {
    if node.persisted.load(Ordering::Acquire) {
        return *node.hash.get().expect("persisted node without hash");
    }
    if let Some(Child::Node(child)) = &node.left {
        hash_recursive(child, hash_fn, visit);
    }
    if let Some(Child::Node(child)) = &node.right {
        hash_recursive(child, hash_fn, visit);
    }
    let hash = *node
        .hash
        .get_or_init(|| hash_fn(&node.encode_hash_form(hash_fn)));
    visit(node, &hash);
    hash
}
