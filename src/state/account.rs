//! The account record stored in the state trie.
//!
//! Every field here is consensus-relevant: the record is what the trie
//! hashes, so two nodes disagreeing on any byte disagree on the state
//! root. Serialization is bincode — compact, deterministic, and the
//! same choice as the rest of the on-disk records.

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;

use super::StateError;

/// One account: balance, the checkpoint of its last balance-affecting
/// operation, and the roots anchoring its storage and code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account's address.
    pub address: String,
    /// Native balance in smallest units.
    pub balance: u64,
    /// Checkpoint of the transaction that last touched the balance.
    pub checkpoint: String,
    /// Root of the account's storage sub-trie; `None` until the first
    /// storage commit.
    pub storage_root: Option<Hash>,
    /// Digest of the account's contract code, when one is deployed.
    pub code_hash: Option<Hash>,
}

impl Account {
    /// Fresh account with an initial balance.
    pub fn new(address: impl Into<String>, balance: u64, checkpoint: impl Into<String>) -> Self {
        Account {
            address: address.into(),
            balance,
            checkpoint: checkpoint.into(),
            storage_root: None,
            code_hash: None,
        }
    }

    /// Credit the balance, recording the checkpoint.
    ///
    /// Fails with [`StateError::Overflow`] and changes nothing when the
    /// sum would exceed `u64::MAX`.
    pub fn deposit(&mut self, amount: u64, checkpoint: &str) -> Result<(), StateError> {
        let new_balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| StateError::Overflow {
                address: self.address.clone(),
                current: self.balance,
                deposit: amount,
            })?;
        self.balance = new_balance;
        self.checkpoint = checkpoint.to_string();
        Ok(())
    }

    /// Debit the balance, recording the checkpoint.
    ///
    /// Fails with [`StateError::InsufficientBalance`] and changes
    /// nothing when the balance would go negative.
    pub fn withdraw(&mut self, amount: u64, checkpoint: &str) -> Result<(), StateError> {
        if self.balance < amount {
            return Err(StateError::InsufficientBalance {
                address: self.address.clone(),
                have: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.checkpoint = checkpoint.to_string();
        Ok(())
    }

    /// Record the digest of deployed code.
    pub fn set_code_hash(&mut self, hash: Hash) {
        self.code_hash = Some(hash);
    }

    /// Serialize for the trie and the `acct/` record.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a record read back from the trie or the backend.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
