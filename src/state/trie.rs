//! Merkle-Patricia trie with content-addressed persistence.
//!
//! Three node kinds, the classic set: a **leaf** holds the remaining
//! path and a value, an **extension** compresses a shared prefix in
//! front of a single child, and a **branch** fans out over the sixteen
//! nibble values with an optional value of its own. Keys are walked as
//! nibbles; paths persist in hex-prefix form (flag-and-parity nibble
//! first, the classic compact encoding).
//!
//! Nodes are addressed by the hash of their canonical encoding and
//! stored under `trie/<hash>`. Mutation happens on in-memory nodes;
//! `commit` hashes the dirty subtree bottom-up, parks the encoded nodes
//! in a pending map, and returns the new root. `stage_pending` hands
//! those bytes to a write batch and `mark_flushed` forgets them once the
//! batch is durable — until then every read can still resolve pending
//! nodes, so a crashed commit never leaves the trie blind.
//!
//! There is no delete: the state surface above only ever creates and
//! updates records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{self, DecodeError};
use crate::crypto::{blake3_hash, Hash, HashFn};
use crate::store::{self, KvStore, WriteBatch};

use super::TrieError;

const TAG_LEAF: u64 = 0;
const TAG_EXTENSION: u64 = 1;
const TAG_BRANCH: u64 = 2;

/// Link to a child node: persisted (by hash) or in-memory.
#[derive(Debug, Clone)]
enum Link {
    Hash(Hash),
    Node(Box<TrieNode>),
}

#[derive(Debug, Clone)]
enum TrieNode {
    /// Remaining path (nibbles) and the stored value.
    Leaf { path: Vec<u8>, value: Vec<u8> },
    /// Shared path prefix (nibbles, never empty) over one child.
    Extension { path: Vec<u8>, child: Link },
    /// Sixteen-way fan-out, plus a value for keys ending here.
    Branch {
        children: Box<[Option<Link>; 16]>,
        value: Option<Vec<u8>>,
    },
}

/// An authenticated map from byte keys to byte values.
pub struct Trie {
    backend: Arc<dyn KvStore>,
    root: Option<Link>,
    hash_fn: HashFn,
    /// Committed but not yet flushed nodes, by content hash.
    pending: HashMap<Hash, Vec<u8>>,
    /// Root produced by the last `commit` (or the opening root).
    committed: Option<Hash>,
}

impl std::fmt::Debug for Trie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie")
            .field("committed", &self.committed.map(hex::encode))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Trie {
    /// Open a trie at a prior root (`None` for empty), hashing with
    /// BLAKE3.
    pub fn new(root: Option<Hash>, backend: Arc<dyn KvStore>) -> Self {
        Self::with_hash_fn(root, backend, blake3_hash)
    }

    /// Same, with an explicit hash primitive.
    pub fn with_hash_fn(root: Option<Hash>, backend: Arc<dyn KvStore>, hash_fn: HashFn) -> Self {
        Trie {
            backend,
            root: root.map(Link::Hash),
            hash_fn,
            pending: HashMap::new(),
            committed: root,
        }
    }

    /// Value bound to `key`, or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match &self.root {
            None => Ok(None),
            Some(link) => self.get_at(link, &to_nibbles(key)),
        }
    }

    /// Bind `key` to `value`, replacing any existing binding.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        let path = to_nibbles(key);
        let new_root = match self.root.take() {
            None => Link::Node(Box::new(TrieNode::Leaf {
                path,
                value: value.to_vec(),
            })),
            Some(link) => self.insert_at(link, &path, value.to_vec())?,
        };
        self.root = Some(new_root);
        Ok(())
    }

    /// Current working root, computed without committing anything.
    /// `None` for the empty trie.
    pub fn hash(&self) -> Option<Hash> {
        self.root.as_ref().map(|link| self.hash_link(link))
    }

    /// Commit the working trie: hash dirty nodes bottom-up, park their
    /// encodings in the pending map, and return the new root.
    pub fn commit(&mut self) -> Result<Option<Hash>, TrieError> {
        let root = match self.root.take() {
            None => None,
            Some(link) => {
                let (hash, link) = self.commit_link(link);
                self.root = Some(link);
                Some(hash)
            }
        };
        self.committed = root;
        Ok(root)
    }

    /// Root produced by the last `commit` (or the root the trie was
    /// opened at, before any mutation is committed).
    pub fn committed_root(&self) -> Option<Hash> {
        self.committed
    }

    /// Stage every pending node into `batch`. The pending map is kept
    /// until [`Trie::mark_flushed`] so a failed batch write loses
    /// nothing.
    pub(crate) fn stage_pending(&self, batch: &mut WriteBatch) {
        for (hash, bytes) in &self.pending {
            batch.set(store::trie_key(hash), bytes.clone());
        }
    }

    /// Forget pending nodes after their batch is durably written.
    pub(crate) fn mark_flushed(&mut self) {
        self.pending.clear();
    }

    // -- Resolution ----------------------------------------------------------

    fn load_node(&self, hash: &Hash) -> Result<TrieNode, TrieError> {
        if let Some(bytes) = self.pending.get(hash) {
            return Ok(TrieNode::decode(bytes)?);
        }
        let bytes = self
            .backend
            .get(&store::trie_key(hash))?
            .ok_or(TrieError::MissingNode(*hash))?;
        Ok(TrieNode::decode(&bytes)?)
    }

    fn get_at(&self, link: &Link, path: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match link {
            Link::Node(node) => self.get_in(node, path),
            Link::Hash(hash) => {
                let node = self.load_node(hash)?;
                self.get_in(&node, path)
            }
        }
    }

    fn get_in(&self, node: &TrieNode, path: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match node {
            TrieNode::Leaf {
                path: leaf_path,
                value,
            } => Ok((leaf_path == path).then(|| value.clone())),
            TrieNode::Extension {
                path: ext_path,
                child,
            } => match path.strip_prefix(ext_path.as_slice()) {
                Some(rest) => self.get_at(child, rest),
                None => Ok(None),
            },
            TrieNode::Branch { children, value } => match path.split_first() {
                None => Ok(value.clone()),
                Some((&nibble, rest)) => match &children[nibble as usize] {
                    Some(child) => self.get_at(child, rest),
                    None => Ok(None),
                },
            },
        }
    }

    // -- Insertion -----------------------------------------------------------

    fn take_node(&self, link: Link) -> Result<TrieNode, TrieError> {
        match link {
            Link::Node(node) => Ok(*node),
            Link::Hash(hash) => self.load_node(&hash),
        }
    }

    fn insert_at(&self, link: Link, path: &[u8], value: Vec<u8>) -> Result<Link, TrieError> {
        let node = self.take_node(link)?;
        let new_node = match node {
            TrieNode::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let common = common_prefix(&leaf_path, path);
                if common == leaf_path.len() && common == path.len() {
                    // Same key: replace the value.
                    TrieNode::Leaf {
                        path: leaf_path,
                        value,
                    }
                } else {
                    // Split into a branch under the shared prefix.
                    let mut children: [Option<Link>; 16] = Default::default();
                    let mut branch_value = None;
                    place(
                        &mut children,
                        &mut branch_value,
                        &leaf_path[common..],
                        leaf_value,
                    );
                    place(&mut children, &mut branch_value, &path[common..], value);
                    wrap_prefix(
                        &path[..common],
                        TrieNode::Branch {
                            children: Box::new(children),
                            value: branch_value,
                        },
                    )
                }
            }
            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix(&ext_path, path);
                if common == ext_path.len() {
                    // Fully inside the extension: descend.
                    let new_child = self.insert_at(child, &path[common..], value)?;
                    TrieNode::Extension {
                        path: ext_path,
                        child: new_child,
                    }
                } else {
                    // Split the extension at the divergence point.
                    let mut children: [Option<Link>; 16] = Default::default();
                    let mut branch_value = None;

                    let ext_rest = &ext_path[common..];
                    let sub = if ext_rest.len() == 1 {
                        child
                    } else {
                        Link::Node(Box::new(TrieNode::Extension {
                            path: ext_rest[1..].to_vec(),
                            child,
                        }))
                    };
                    children[ext_rest[0] as usize] = Some(sub);

                    place(&mut children, &mut branch_value, &path[common..], value);
                    wrap_prefix(
                        &path[..common],
                        TrieNode::Branch {
                            children: Box::new(children),
                            value: branch_value,
                        },
                    )
                }
            }
            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => match path.split_first() {
                None => TrieNode::Branch {
                    children,
                    value: Some(value),
                },
                Some((&nibble, rest)) => {
                    let slot = nibble as usize;
                    let new_child = match children[slot].take() {
                        Some(child) => self.insert_at(child, rest, value)?,
                        None => Link::Node(Box::new(TrieNode::Leaf {
                            path: rest.to_vec(),
                            value,
                        })),
                    };
                    children[slot] = Some(new_child);
                    TrieNode::Branch {
                        children,
                        value: branch_value,
                    }
                }
            },
        };
        Ok(Link::Node(Box::new(new_node)))
    }

    // -- Hashing & commit ----------------------------------------------------

    fn hash_link(&self, link: &Link) -> Hash {
        match link {
            Link::Hash(hash) => *hash,
            Link::Node(node) => {
                let bytes = node.encode(&mut |child| self.hash_link(child));
                (self.hash_fn)(&bytes)
            }
        }
    }

    fn commit_link(&mut self, link: Link) -> (Hash, Link) {
        match link {
            Link::Hash(hash) => (hash, Link::Hash(hash)),
            Link::Node(node) => {
                // Children first, so encoding sees only hashes.
                let node = match *node {
                    leaf @ TrieNode::Leaf { .. } => leaf,
                    TrieNode::Extension { path, child } => {
                        let (_, child) = self.commit_link(child);
                        TrieNode::Extension { path, child }
                    }
                    TrieNode::Branch {
                        mut children,
                        value,
                    } => {
                        for slot in children.iter_mut() {
                            if let Some(child) = slot.take() {
                                let (_, child) = self.commit_link(child);
                                *slot = Some(child);
                            }
                        }
                        TrieNode::Branch { children, value }
                    }
                };
                let bytes = node.encode(&mut |child| match child {
                    Link::Hash(hash) => *hash,
                    Link::Node(_) => unreachable!("children committed before parent"),
                });
                let hash = (self.hash_fn)(&bytes);
                self.pending.insert(hash, bytes);
                (hash, Link::Hash(hash))
            }
        }
    }
}

impl TrieNode {
    /// Canonical encoding. `child_hash` resolves each child link to its
    /// 32-byte hash (computing it when the child is still in memory).
    fn encode(&self, child_hash: &mut dyn FnMut(&Link) -> Hash) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            TrieNode::Leaf { path, value } => {
                codec::put_uvarint(&mut buf, TAG_LEAF);
                codec::put_bytes(&mut buf, &hex_prefix(path, true));
                codec::put_bytes(&mut buf, value);
            }
            TrieNode::Extension { path, child } => {
                codec::put_uvarint(&mut buf, TAG_EXTENSION);
                codec::put_bytes(&mut buf, &hex_prefix(path, false));
                codec::put_bytes(&mut buf, &child_hash(child));
            }
            TrieNode::Branch { children, value } => {
                codec::put_uvarint(&mut buf, TAG_BRANCH);
                let mut bitmap: u64 = 0;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                codec::put_uvarint(&mut buf, bitmap);
                for child in children.iter().flatten() {
                    codec::put_bytes(&mut buf, &child_hash(child));
                }
                match value {
                    Some(value) => {
                        codec::put_uvarint(&mut buf, 1);
                        codec::put_bytes(&mut buf, value);
                    }
                    None => codec::put_uvarint(&mut buf, 0),
                }
            }
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Result<TrieNode, DecodeError> {
        let cursor = &mut &bytes[..];
        let tag = codec::take_uvarint(cursor)?;
        let node = match tag {
            TAG_LEAF => {
                let encoded_path = codec::take_bytes(cursor)?;
                let (path, is_leaf) = decode_hex_prefix(&encoded_path)?;
                if !is_leaf {
                    return Err(DecodeError::Invalid("leaf with extension path flag"));
                }
                let value = codec::take_bytes(cursor)?;
                TrieNode::Leaf { path, value }
            }
            TAG_EXTENSION => {
                let encoded_path = codec::take_bytes(cursor)?;
                let (path, is_leaf) = decode_hex_prefix(&encoded_path)?;
                if is_leaf {
                    return Err(DecodeError::Invalid("extension with leaf path flag"));
                }
                if path.is_empty() {
                    return Err(DecodeError::Invalid("extension with empty path"));
                }
                let child: Hash = codec::take_fixed_bytes(cursor)?;
                TrieNode::Extension {
                    path,
                    child: Link::Hash(child),
                }
            }
            TAG_BRANCH => {
                let bitmap = codec::take_uvarint(cursor)?;
                if bitmap >> 16 != 0 {
                    return Err(DecodeError::Invalid("branch bitmap beyond 16 slots"));
                }
                let mut children: [Option<Link>; 16] = Default::default();
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        let hash: Hash = codec::take_fixed_bytes(cursor)?;
                        *slot = Some(Link::Hash(hash));
                    }
                }
                let value = match codec::take_uvarint(cursor)? {
                    0 => None,
                    1 => Some(codec::take_bytes(cursor)?),
                    _ => return Err(DecodeError::Invalid("branch value flag")),
                };
                TrieNode::Branch {
                    children: Box::new(children),
                    value,
                }
            }
            _ => return Err(DecodeError::Invalid("unknown trie node tag")),
        };
        if !cursor.is_empty() {
            return Err(DecodeError::Invalid("trailing bytes after trie node"));
        }
        Ok(node)
    }
}

/// Split a byte key into nibbles, high half first.
fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Hang a remaining path off a fresh branch: an empty remainder lands
/// in the branch value, otherwise the first nibble picks the slot and
/// the rest becomes a leaf.
fn place(
    children: &mut [Option<Link>; 16],
    branch_value: &mut Option<Vec<u8>>,
    rest: &[u8],
    value: Vec<u8>,
) {
    match rest.split_first() {
        None => *branch_value = Some(value),
        Some((&nibble, tail)) => {
            children[nibble as usize] = Some(Link::Node(Box::new(TrieNode::Leaf {
                path: tail.to_vec(),
                value,
            })));
        }
    }
}

/// Prepend the shared prefix as an extension when it is non-empty.
fn wrap_prefix(prefix: &[u8], node: TrieNode) -> TrieNode {
    if prefix.is_empty() {
        node
    } else {
        TrieNode::Extension {
            path: prefix.to_vec(),
            child: Link::Node(Box::new(node)),
        }
    }
}

/// Compact (hex-prefix) path encoding: the first nibble carries the
/// leaf flag and the parity, an odd path starts in the low half of the
/// first byte.
fn hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let flag: u8 = (if is_leaf { 2 } else { 0 }) + u8::from(odd);
    let mut out = Vec::with_capacity(1 + nibbles.len() / 2);
    let rest = if odd {
        out.push((flag << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

fn decode_hex_prefix(encoded: &[u8]) -> Result<(Vec<u8>, bool), DecodeError> {
    let Some((&first, rest)) = encoded.split_first() else {
        return Err(DecodeError::Invalid("empty hex-prefix path"));
    };
    let flag = first >> 4;
    if flag > 3 {
        return Err(DecodeError::Invalid("hex-prefix flag out of range"));
    }
    let is_leaf = flag >= 2;
    let odd = flag % 2 == 1;

    let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
    if odd {
        nibbles.push(first & 0x0F);
    } else if first & 0x0F != 0 {
        return Err(DecodeError::Invalid("hex-prefix padding not zero"));
    }
    for byte in rest {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    Ok((nibbles, is_leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn empty_trie() -> Trie {
        Trie::new(None, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn hex_prefix_roundtrip() {
        for (nibbles, is_leaf) in [
            (vec![], true),
            (vec![], false),
            (vec![0x1], true),
            (vec![0x1, 0x2], false),
            (vec![0xF, 0x0, 0xA], true),
            (to_nibbles(b"some-key"), false),
        ] {
            let encoded = hex_prefix(&nibbles, is_leaf);
            assert_eq!(decode_hex_prefix(&encoded).unwrap(), (nibbles, is_leaf));
        }
    }

    #[test]
    fn insert_and_get() {
        let mut trie = empty_trie();
        assert_eq!(trie.get(b"missing").unwrap(), None);

        trie.insert(b"dog", b"puppy").unwrap();
        trie.insert(b"doge", b"coin").unwrap();
        trie.insert(b"do", b"verb").unwrap();
        trie.insert(b"horse", b"stallion").unwrap();

        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"doge").unwrap(), Some(b"coin".to_vec()));
        assert_eq!(trie.get(b"do").unwrap(), Some(b"verb".to_vec()));
        assert_eq!(trie.get(b"horse").unwrap(), Some(b"stallion".to_vec()));
        assert_eq!(trie.get(b"cat").unwrap(), None);
        assert_eq!(trie.get(b"dogs").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut trie = empty_trie();
        trie.insert(b"key", b"one").unwrap();
        trie.insert(b"key", b"two").unwrap();
        assert_eq!(trie.get(b"key").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn hash_is_order_independent() {
        // Unlike the AVL+ tree, trie shape depends only on the key set,
        // so insertion order cannot affect the root.
        let mut a = empty_trie();
        let mut b = empty_trie();
        let entries: Vec<(&[u8], &[u8])> =
            vec![(b"alpha", b"1"), (b"beta", b"2"), (b"alphabet", b"3")];
        for (key, value) in &entries {
            a.insert(key, value).unwrap();
        }
        for (key, value) in entries.iter().rev() {
            b.insert(key, value).unwrap();
        }
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().is_some());
    }

    #[test]
    fn hash_changes_with_content() {
        let mut trie = empty_trie();
        assert_eq!(trie.hash(), None);
        trie.insert(b"k", b"v1").unwrap();
        let h1 = trie.hash().unwrap();
        trie.insert(b"k", b"v2").unwrap();
        let h2 = trie.hash().unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn commit_matches_working_hash() {
        let mut trie = empty_trie();
        trie.insert(b"a", b"1").unwrap();
        trie.insert(b"ab", b"2").unwrap();
        let working = trie.hash();
        let committed = trie.commit().unwrap();
        assert_eq!(working, committed);
        assert_eq!(trie.committed_root(), committed);
        // Reads still work after links collapse to hashes.
        assert_eq!(trie.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.get(b"ab").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn reopen_at_committed_root() {
        let backend: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let mut trie = Trie::new(None, Arc::clone(&backend) as Arc<dyn KvStore>);
        for i in 0..50u32 {
            trie.insert(format!("key-{i}").as_bytes(), &i.to_be_bytes())
                .unwrap();
        }
        let root = trie.commit().unwrap().unwrap();

        let mut batch = WriteBatch::new();
        trie.stage_pending(&mut batch);
        backend.write_batch(batch).unwrap();
        trie.mark_flushed();

        let reopened = Trie::new(Some(root), backend);
        for i in 0..50u32 {
            assert_eq!(
                reopened.get(format!("key-{i}").as_bytes()).unwrap(),
                Some(i.to_be_bytes().to_vec()),
            );
        }
        assert_eq!(reopened.get(b"key-50").unwrap(), None);
        assert_eq!(reopened.hash(), Some(root));
    }

    #[test]
    fn pending_nodes_resolve_before_flush() {
        let mut trie = empty_trie();
        trie.insert(b"k", b"v").unwrap();
        trie.commit().unwrap();
        // Nothing flushed to the backend yet; reads come from pending.
        assert_eq!(trie.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn missing_node_is_an_error() {
        let trie = Trie::new(Some([0xEE; 32]), Arc::new(MemoryStore::new()));
        assert!(matches!(
            trie.get(b"anything"),
            Err(TrieError::MissingNode(h)) if h == [0xEE; 32]
        ));
    }

    #[test]
    fn incremental_commits_converge_with_batch_build() {
        // Commit after every insert vs one commit at the end: same root.
        let backend: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let mut incremental = Trie::new(None, Arc::clone(&backend) as Arc<dyn KvStore>);
        let mut oneshot = empty_trie();
        for i in 0..20u32 {
            let key = format!("{i:03}");
            incremental.insert(key.as_bytes(), b"x").unwrap();
            incremental.commit().unwrap();
            oneshot.insert(key.as_bytes(), b"x").unwrap();
        }
        assert_eq!(incremental.commit().unwrap(), oneshot.commit().unwrap());
    }

    #[test]
    fn node_decode_rejects_corruption() {
        assert!(TrieNode::decode(&[]).is_err());
        assert!(TrieNode::decode(&[0x09]).is_err()); // unknown tag

        // Valid leaf plus trailing garbage.
        let leaf = TrieNode::Leaf {
            path: vec![1, 2],
            value: b"v".to_vec(),
        };
        let mut bytes = leaf.encode(&mut |_| unreachable!());
        let decoded = TrieNode::decode(&bytes).unwrap();
        assert!(matches!(decoded, TrieNode::Leaf { .. }));
        bytes.push(0x00);
        assert!(matches!(
            TrieNode::decode(&bytes),
            Err(DecodeError::Invalid("trailing bytes after trie node"))
        ));
    }
}
