//! Account state over the Merkle-Patricia trie.
//!
//! `StateDb` is the surface the transaction engine talks to: account
//! creation and balance arithmetic, per-account storage slots, and the
//! two-phase commit. Dirty accounts and storage tries are cached in
//! maps; the top trie binds each address to its bincode-encoded account
//! record, and each account record pins the root of that account's
//! storage sub-trie.
//!
//! Commit ordering is the one invariant worth spelling out:
//! `commit_trie` commits every dirty **storage sub-trie first**, writes
//! the resulting storage roots into the account records, updates the
//! top trie, and only then commits the top trie — so the state root
//! always covers final storage roots. `commit_db` then flushes all
//! pending trie nodes and the flat `acct/` records in one atomic batch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::crypto::Hash;
use crate::store::{self, KvStore, WriteBatch};

use super::{Account, StateError, Trie};

fn fmt_root(root: &Option<Hash>) -> String {
    root.map(hex::encode).unwrap_or_else(|| "empty".to_string())
}

/// Account/contract state at (and after) one state root.
pub struct StateDb {
    backend: Arc<dyn KvStore>,
    trie: Trie,
    /// Accounts touched since opening, by address.
    accounts: HashMap<String, Account>,
    /// Storage sub-tries opened since, well, opening.
    storages: HashMap<String, Trie>,
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb")
            .field("accounts", &self.accounts.len())
            .field("storages", &self.storages.len())
            .finish()
    }
}

impl StateDb {
    /// Open at a prior state root, or empty with `None`.
    pub fn new(root: Option<Hash>, backend: Arc<dyn KvStore>) -> Self {
        StateDb {
            trie: Trie::new(root, Arc::clone(&backend)),
            backend,
            accounts: HashMap::new(),
            storages: HashMap::new(),
        }
    }

    // -- Accounts ------------------------------------------------------------

    /// Create (or overwrite) an account with an initial balance.
    pub fn create_account(
        &mut self,
        address: &str,
        balance: u64,
        checkpoint: &str,
    ) -> Result<(), StateError> {
        let account = Account::new(address, balance, checkpoint);
        self.accounts.insert(address.to_string(), account.clone());
        self.update_trie(&account)
    }

    /// Current balance of an account.
    pub fn balance_of(&self, address: &str) -> Result<u64, StateError> {
        Ok(self.read_account(address)?.balance)
    }

    /// Credit an account. Overflow fails without mutating anything.
    pub fn deposit(
        &mut self,
        address: &str,
        amount: u64,
        checkpoint: &str,
    ) -> Result<(), StateError> {
        let mut account = self.read_account(address)?;
        account.deposit(amount, checkpoint)?;
        self.accounts.insert(address.to_string(), account.clone());
        self.update_trie(&account)
    }

    /// Debit an account. Underflow fails without mutating anything.
    pub fn withdraw(
        &mut self,
        address: &str,
        amount: u64,
        checkpoint: &str,
    ) -> Result<(), StateError> {
        let mut account = self.read_account(address)?;
        account.withdraw(amount, checkpoint)?;
        self.accounts.insert(address.to_string(), account.clone());
        self.update_trie(&account)
    }

    /// Record the code digest for an account.
    pub fn set_code_hash(&mut self, address: &str, hash: Hash) -> Result<(), StateError> {
        let mut account = self.read_account(address)?;
        account.set_code_hash(hash);
        self.accounts.insert(address.to_string(), account.clone());
        self.update_trie(&account)
    }

    // -- Storage slots -------------------------------------------------------

    /// Read a storage slot of an account.
    pub fn storage_item(&mut self, address: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        let storage = self.load_storage(address)?;
        Ok(storage.get(key.as_bytes())?)
    }

    /// Write a storage slot of an account. The account's `storage_root`
    /// is updated at the next `commit_trie`.
    pub fn put_storage_item(
        &mut self,
        address: &str,
        key: &str,
        item: &[u8],
    ) -> Result<(), StateError> {
        let storage = self.load_storage(address)?;
        storage.insert(key.as_bytes(), item)?;
        Ok(())
    }

    // -- Commit --------------------------------------------------------------

    /// Current working state root, without committing.
    pub fn hash(&self) -> Option<Hash> {
        self.trie.hash()
    }

    /// Commit all dirty tries and return the new state root.
    ///
    /// Storage sub-tries commit first; their roots land in the account
    /// records before the top trie commits, so the returned root covers
    /// everything.
    pub fn commit_trie(&mut self) -> Result<Option<Hash>, StateError> {
        let addresses: Vec<String> = self.storages.keys().cloned().collect();
        for address in addresses {
            let storage_root = self
                .storages
                .get_mut(&address)
                .expect("storage trie disappeared")
                .commit()?;
            let mut account = self.read_account(&address)?;
            if account.storage_root != storage_root {
                account.storage_root = storage_root;
                self.accounts.insert(address.clone(), account.clone());
                self.update_trie(&account)?;
            }
        }
        Ok(self.trie.commit()?)
    }

    /// Flush everything committed under `root` — trie nodes of the top
    /// trie and all storage tries, plus the flat `acct/` records — in
    /// one atomic batch.
    ///
    /// `root` must be the value the preceding `commit_trie` returned;
    /// anything else is a sequencing bug and is rejected.
    pub fn commit_db(&mut self, root: Option<Hash>) -> Result<(), StateError> {
        if self.trie.committed_root() != root {
            return Err(StateError::RootMismatch {
                committed: fmt_root(&self.trie.committed_root()),
                given: fmt_root(&root),
            });
        }

        let mut batch = WriteBatch::new();
        self.trie.stage_pending(&mut batch);
        for storage in self.storages.values() {
            storage.stage_pending(&mut batch);
        }
        for (address, account) in &self.accounts {
            batch.set(store::account_key(address), account.to_bytes()?);
        }

        let staged = batch.len();
        self.backend.write_batch(batch)?;
        self.trie.mark_flushed();
        for storage in self.storages.values_mut() {
            storage.mark_flushed();
        }
        debug!(
            root = fmt_root(&root),
            entries = staged,
            "flushed state trie to backend"
        );
        Ok(())
    }

    // -- Internals -----------------------------------------------------------

    /// Account by address: dirty cache first, then the trie.
    fn read_account(&self, address: &str) -> Result<Account, StateError> {
        if let Some(account) = self.accounts.get(address) {
            return Ok(account.clone());
        }
        let bytes = self
            .trie
            .get(address.as_bytes())?
            .ok_or_else(|| StateError::UnknownAccount(address.to_string()))?;
        Account::from_bytes(&bytes)
    }

    /// Storage sub-trie for an account, opened at the account's current
    /// storage root on first touch.
    fn load_storage(&mut self, address: &str) -> Result<&mut Trie, StateError> {
        if !self.storages.contains_key(address) {
            let account = self.read_account(address)?;
            let trie = Trie::new(account.storage_root, Arc::clone(&self.backend));
            self.storages.insert(address.to_string(), trie);
        }
        Ok(self
            .storages
            .get_mut(address)
            .expect("storage trie just inserted"))
    }

    /// Bind the account record under its address in the top trie.
    fn update_trie(&mut self, account: &Account) -> Result<(), StateError> {
        let bytes = account.to_bytes()?;
        self.trie.insert(account.address.as_bytes(), &bytes)?;
        Ok(())
    }
}
