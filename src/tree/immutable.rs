//! The read-only view of one tree version.
//!
//! A `Tree` is a root pointer, a node store handle, and a version
//! number. Cloning copies the handle, not the tree; any number of
//! readers may share one version concurrently. Mutation happens through
//! [`MutableTree`](super::MutableTree), which produces a fresh `Tree`
//! per saved version.

use std::fmt;
use std::sync::Arc;

use crate::crypto::Hash;

use super::node::{hash_recursive, Node};
use super::{NodeDb, TreeError};

/// Immutable AVL+ tree at a fixed version.
#[derive(Clone)]
pub struct Tree {
    pub(crate) root: Option<Arc<Node>>,
    pub(crate) ndb: Arc<NodeDb>,
    pub(crate) version: u64,
}

impl Tree {
    /// The empty tree at version 0.
    pub fn empty(ndb: Arc<NodeDb>) -> Self {
        Tree {
            root: None,
            ndb,
            version: 0,
        }
    }

    /// Reopen a previously saved version via the `root/<version>` index.
    pub fn load(ndb: Arc<NodeDb>, version: u64) -> Result<Self, TreeError> {
        let root = match ndb.root_hash_at(version)? {
            None => None,
            Some(hash) => Some(ndb.get_node(&hash)?),
        };
        Ok(Tree { root, ndb, version })
    }

    /// Reopen the newest saved version, or the empty tree at version 0
    /// when nothing has been saved yet.
    pub fn load_latest(ndb: Arc<NodeDb>) -> Result<Self, TreeError> {
        match ndb.latest_version()? {
            None => Ok(Tree::empty(ndb)),
            Some((version, None)) => Ok(Tree {
                root: None,
                ndb,
                version,
            }),
            Some((version, Some(hash))) => {
                let root = ndb.get_node(&hash)?;
                Ok(Tree {
                    root: Some(root),
                    ndb,
                    version,
                })
            }
        }
    }

    /// Number of leaves.
    pub fn size(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.size)
    }

    /// Height of the root (0 for an empty or single-leaf tree).
    pub fn height(&self) -> u8 {
        self.root.as_ref().map_or(0, |root| root.height)
    }

    /// The version this view is fixed at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Root hash, computed lazily and cached per node. `None` for the
    /// empty tree.
    pub fn root_hash(&self) -> Option<Hash> {
        self.root
            .as_ref()
            .map(|root| hash_recursive(root, self.ndb.hash_fn(), &mut |_, _| {}))
    }

    /// Whether a leaf with `key` exists.
    pub fn has(&self, key: &[u8]) -> Result<bool, TreeError> {
        match &self.root {
            None => Ok(false),
            Some(root) => root.has(&self.ndb, key),
        }
    }

    /// Value bound to `key`, or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        match &self.root {
            None => Ok(None),
            Some(root) => root.get(&self.ndb, key),
        }
    }

    /// Visit every leaf in ascending key order. The visitor returns
    /// `true` to stop early; the return value reports whether it did.
    pub fn iterate(
        &self,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool, TreeError> {
        match &self.root {
            None => Ok(false),
            Some(root) => root.traverse(&self.ndb, true, &mut |node, _| {
                if node.is_leaf() {
                    f(&node.key, &node.value)
                } else {
                    false
                }
            }),
        }
    }

    /// Visit the leaves with `start <= key < end` in the requested
    /// direction. `None` is open on that side. An inverted range
    /// (`start > end`) yields nothing and is not an error.
    pub fn iterate_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool, TreeError> {
        if range_is_inverted(start, end) {
            return Ok(false);
        }
        match &self.root {
            None => Ok(false),
            Some(root) => {
                root.traverse_in_range(&self.ndb, start, end, ascending, false, 0, &mut |node,
                                                                                         _| {
                    if node.is_leaf() {
                        f(&node.key, &node.value)
                    } else {
                        false
                    }
                })
            }
        }
    }

    /// [`Tree::iterate_range`] with an inclusive upper bound. The
    /// visitor also receives the version at which each leaf was written.
    pub fn iterate_range_inclusive(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
        mut f: impl FnMut(&[u8], &[u8], u64) -> bool,
    ) -> Result<bool, TreeError> {
        if range_is_inverted(start, end) {
            return Ok(false);
        }
        match &self.root {
            None => Ok(false),
            Some(root) => {
                root.traverse_in_range(&self.ndb, start, end, ascending, true, 0, &mut |node,
                                                                                        _| {
                    if node.is_leaf() {
                        f(&node.key, &node.value, node.version)
                    } else {
                        false
                    }
                })
            }
        }
    }

}

fn range_is_inverted(start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
    matches!((start, end), (Some(s), Some(e)) if s > e)
}

/// Renders the leaf list: `Tree{6b: 31, 6c: 32}` with hex keys and
/// values. Debug aid; iteration errors render as a marker entry.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tree{{")?;
        let mut first = true;
        let mut fmt_err = false;
        let result = self.iterate(|key, value| {
            let sep = if first { "" } else { ", " };
            first = false;
            if write!(f, "{sep}{}: {}", hex::encode(key), hex::encode(value)).is_err() {
                fmt_err = true;
                return true;
            }
            false
        });
        if result.is_err() {
            write!(f, "<unreadable>")?;
        }
        if fmt_err {
            return Err(fmt::Error);
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("version", &self.version)
            .field("size", &self.size())
            .field("height", &self.height())
            .finish()
    }
}
