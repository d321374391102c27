//! # Hashing Utilities
//!
//! Two hash functions and no appetite for more:
//!
//! - **BLAKE3** — the default. Fast on every platform that matters, and
//!   the function every arbordb-native structure uses unless told
//!   otherwise.
//! - **SHA-256** — for deployments that must interoperate with chains
//!   whose hash contract was fixed long ago.
//!
//! The tree and trie layers never call either function directly. They
//! take a [`HashFn`] at construction and thread it through, so a store
//! opened with SHA-256 produces SHA-256 roots end to end. Mixing hash
//! functions within one backend namespace is the caller's mistake to
//! make; nothing here prevents it, and nothing here survives it.

use sha2::{Digest, Sha256};

/// Length in bytes of every digest in this crate.
pub const HASH_LEN: usize = 32;

/// A 32-byte digest. Node addresses, root hashes, and storage roots are
/// all this type.
pub type Hash = [u8; HASH_LEN];

/// The hash primitive, taken as a parameter wherever authentication
/// happens. Plain function pointer: cheap to copy, trivially `Send`,
/// and enough — hash functions carry no state worth closing over.
pub type HashFn = fn(&[u8]) -> Hash;

/// Compute the BLAKE3 hash of the input.
///
/// The workhorse. Used for node hashing, trie commitments, and value
/// digests unless the caller supplies a different [`HashFn`].
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Compute the SHA-256 hash of the input.
///
/// Provided for interoperability. Same signature as [`blake3_hash`] so
/// either slots into a [`HashFn`] parameter.
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_deterministic() {
        let a = blake3_hash(b"arbordb");
        let b = blake3_hash(b"arbordb");
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        let hash = sha256_hash(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn functions_disagree() {
        // If these ever collide we have bigger problems than this test.
        assert_ne!(blake3_hash(b"x"), sha256_hash(b"x"));
    }

    #[test]
    fn usable_as_hash_fn() {
        let f: HashFn = blake3_hash;
        assert_eq!(f(b"x"), blake3_hash(b"x"));
    }
}
