//! # AVL+ Tree
//!
//! The versioned, authenticated key-value store at the center of this
//! crate. All values live in leaves; inner nodes carry only a routing
//! key (the leftmost leaf key of their right subtree) and the hashes of
//! their two children. Every mutation path-copies the nodes it touches,
//! so earlier versions stay reachable and unchanged subtrees are shared
//! byte-for-byte in storage.
//!
//! ```text
//! node.rs      — the node itself: codec (storage + hash forms), traversal
//! nodedb.rs    — content-addressed node store: cache + write batch
//! immutable.rs — Tree: the read-only view of one version
//! mutable.rs   — MutableTree: set/remove/rebalance and SaveVersion
//! ```
//!
//! ## Version is part of the hash
//!
//! Every node carries the version at which it was created, and that
//! version is hashed. Two trees holding identical key/value bindings
//! built through different save histories therefore have **different**
//! root hashes. This is deliberate — a root hash pins both content and
//! history — but it surprises people comparing trees: compare by
//! iteration when you mean content equality, by root hash when you mean
//! "same content, same history".

pub mod immutable;
pub mod mutable;
pub mod node;
pub mod nodedb;

pub use immutable::Tree;
pub use mutable::MutableTree;
pub use nodedb::NodeDb;

use thiserror::Error;

use crate::codec::DecodeError;
use crate::crypto::Hash;
use crate::store::StoreError;

/// Errors surfaced by the tree layers.
///
/// Nothing here is recoverable inside the tree: decode failures and
/// missing nodes mean corrupt storage, backend errors mean the engine
/// failed, and both propagate to the caller untouched. A failed
/// `save_version` leaves the working tree intact and may be retried.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Stored node bytes that the canonical codec cannot parse.
    #[error("node decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A referenced hash has no entry in the backend. The tree persists
    /// children before parents, so this is data corruption, not a race.
    #[error("node {} missing from backend", hex::encode(.0))]
    MissingNode(Hash),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A `root/<version>` marker already exists for this version.
    #[error("version {0} already saved")]
    DuplicateVersion(u64),

    /// Asked to open a version that was never saved.
    #[error("version {0} not found")]
    UnknownVersion(u64),
}
