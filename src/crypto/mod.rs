//! # Cryptographic Primitives
//!
//! One concern lives here: hashing. Everything authenticated in this
//! crate — tree nodes, trie nodes, version roots — reduces to a 32-byte
//! digest, and this module is the only place that knows which function
//! produces it.

pub mod hash;

pub use hash::{blake3_hash, sha256_hash, Hash, HashFn, HASH_LEN};
