// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # arbordb — Persistent Versioned Authenticated Key-Value Store
//!
//! An embedded library (no daemon, no wire protocol) providing two
//! authenticated maps over one ordered byte store:
//!
//! - An **AVL+ tree**: a balanced binary search tree where every value
//!   lives in a leaf and every inner node carries a routing key and two
//!   child hashes. Each `save_version` freezes an immutable snapshot
//!   with a deterministic root hash; snapshots share all untouched
//!   subtrees, and any saved version reopens in O(1) through the
//!   `root/<version>` index.
//! - A **Merkle-Patricia state trie** for account and contract state,
//!   with per-account storage sub-tries and a two-phase
//!   `commit_trie` → `commit_db` life cycle.
//!
//! Both are built from the same parts: content-addressed nodes (a node's
//! storage key is the hash of its canonical encoding), one canonical
//! byte codec, and the [`store::KvStore`] backend trait with sled on
//! disk and a `BTreeMap` in memory.
//!
//! ## Architecture
//!
//! ```text
//! crypto  — BLAKE3 / SHA-256; the hash primitive is a parameter
//! codec   — canonical varints and length-prefixed byte strings
//! store   — KvStore trait, sled + in-memory backends, key layout
//! tree    — Node / NodeDb / Tree / MutableTree (the AVL+ stack)
//! state   — Trie / Account / StateDb (the Merkle-Patricia stack)
//! ```
//!
//! ## A version's hash pins its history
//!
//! Nodes carry their creation version, and the version is hashed.
//! Building the same key→value map through different mutation
//! sequences yields *different* root hashes. Compare trees by
//! iteration when you mean content equality; compare root hashes when
//! you mean "same content reached the same way". The state trie does
//! not carry versions and is insertion-order independent — one of the
//! reasons the two structures stay separate.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use arbordb::{MemoryStore, MutableTree, NodeDb, Tree};
//!
//! # fn main() -> Result<(), arbordb::TreeError> {
//! let ndb = Arc::new(NodeDb::new(Arc::new(MemoryStore::new()), 1024));
//! let mut tree = MutableTree::new(Arc::clone(&ndb));
//!
//! tree.set(b"apple", b"red")?;
//! tree.set(b"banana", b"yellow")?;
//! let (version, root) = tree.save_version()?;
//! assert_eq!(version, 1);
//!
//! // Any saved version reopens independently.
//! let snapshot = Tree::load(ndb, version)?;
//! assert_eq!(snapshot.get(b"banana")?, Some(b"yellow".to_vec()));
//! assert_eq!(snapshot.root_hash(), root);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod crypto;
pub mod state;
pub mod store;
pub mod tree;

pub use crypto::{blake3_hash, sha256_hash, Hash, HashFn};
pub use state::{Account, StateDb, StateError, Trie, TrieError};
pub use store::{KvStore, MemoryStore, SledStore, StoreError, WriteBatch};
pub use tree::{MutableTree, NodeDb, Tree, TreeError};
