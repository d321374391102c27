//! # State Trie
//!
//! The second authenticated map in this crate: a Merkle-Patricia trie
//! over the same KV backend, carrying account records and per-account
//! storage. It shares the backend, the codec, and the commit-to-root
//! life cycle with the AVL+ tree — and nothing else. The two are *not*
//! interchangeable: their proof shapes differ, and a deployment picks
//! whichever matches the proofs it must serve.
//!
//! ```text
//! trie.rs    — the trie itself: leaf/extension/branch nodes,
//!              content-addressed persistence, insert/get/commit
//! account.rs — the account record: balance arithmetic, storage root
//! statedb.rs — StateDb: accounts + per-account storage tries,
//!              CommitTrie → CommitDB life cycle
//! ```
//!
//! Life cycle: mutate (`create_account`, `deposit`, `put_storage_item`,
//! …) → `commit_trie()` yields the new state root (sub-tries committed
//! before the top trie, so account records carry final storage roots) →
//! `commit_db(root)` flushes every trie node and account record in one
//! atomic batch.

pub mod account;
pub mod statedb;
pub mod trie;

pub use account::Account;
pub use statedb::StateDb;
pub use trie::Trie;

use thiserror::Error;

use crate::codec::DecodeError;
use crate::crypto::Hash;
use crate::store::StoreError;

/// Errors from the trie structure itself.
#[derive(Debug, Error)]
pub enum TrieError {
    /// Stored trie node bytes the codec cannot parse.
    #[error("trie node decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A referenced trie node is absent from the backend — corruption,
    /// since commit persists children before anything references them.
    #[error("trie node {} missing from backend", hex::encode(.0))]
    MissingNode(Hash),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the account layer. Balance failures leave all state
/// untouched — the failed operation simply never happened.
#[derive(Debug, Error)]
pub enum StateError {
    /// Withdrawal larger than the balance.
    #[error("insufficient balance: have {have}, requested {requested} ({address})")]
    InsufficientBalance {
        address: String,
        have: u64,
        requested: u64,
    },

    /// Deposit would overflow the balance.
    #[error("balance overflow: current {current}, deposit {deposit} ({address})")]
    Overflow {
        address: String,
        current: u64,
        deposit: u64,
    },

    /// Operation on an address with no account record.
    #[error("account {0} not found")]
    UnknownAccount(String),

    /// Account record bytes that bincode cannot parse.
    #[error("account record decode failed: {0}")]
    Record(#[from] bincode::Error),

    /// `commit_db` was handed a root the trie never committed.
    #[error("root mismatch: trie committed {committed}, commit_db given {given}")]
    RootMismatch { committed: String, given: String },

    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
