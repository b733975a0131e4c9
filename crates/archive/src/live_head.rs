//! Component D: the live (uncommitted) head — a mutable account trie whose
//! leaves carry a `storage_root` pointing at a mutable per-account storage
//! trie. All mutators go through [`crate::trie_ops`]; [`LiveHead::freeze`]
//! hashes and persists everything dirty beneath the account root, producing
//! the [`archivetrie_forest::Forest`]-level root a block commits to
//! `roots.dat`.

use archivetrie_crypto::keccak_hash;
use archivetrie_forest::{AccountInfo, AccountNode, Forest, NodeId, Nibbles, ValueNode};
use ethereum_types::{H256, U256};

use crate::code_store::CodeStore;
use crate::error::ArchiveError;
use crate::trie_ops;

pub(crate) fn account_path(address: [u8; 20]) -> Nibbles {
    Nibbles::from_bytes(keccak_hash(address).as_bytes())
}

pub(crate) fn storage_path(key: [u8; 32]) -> Nibbles {
    Nibbles::from_bytes(keccak_hash(key).as_bytes())
}

pub struct LiveHead<'a> {
    forest: &'a Forest,
    code_store: &'a CodeStore,
    root: NodeId,
}

impl<'a> LiveHead<'a> {
    pub fn new(forest: &'a Forest, code_store: &'a CodeStore, root: NodeId) -> Self {
        Self { forest, code_store, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get_account(&self, address: [u8; 20]) -> Result<Option<AccountNode>, ArchiveError> {
        trie_ops::get::<AccountNode>(self.forest, self.root, account_path(address))
    }

    fn require_account(&self, address: [u8; 20]) -> Result<AccountNode, ArchiveError> {
        self.get_account(address)?
            .ok_or_else(|| ArchiveError::Integrity(format!("no account at {address:02x?}")))
    }

    fn put_account(&mut self, account: AccountNode) -> Result<(), ArchiveError> {
        let path = account_path(account.address);
        self.root = trie_ops::insert(self.forest, self.root, path, account)?;
        Ok(())
    }

    /// Inserts a brand-new account, or replaces one entirely — including
    /// resetting its storage trie to empty, even if the address previously
    /// held a now-deleted account with leftover storage.
    pub fn create_account(&mut self, address: [u8; 20], info: AccountInfo) -> Result<(), ArchiveError> {
        self.put_account(AccountNode {
            address,
            info,
            storage_root: NodeId::EMPTY,
            storage_hash: *archivetrie_forest::EMPTY_TRIE_HASH,
            path_length: 0,
        })
    }

    pub fn delete_account(&mut self, address: [u8; 20]) -> Result<bool, ArchiveError> {
        let (new_root, removed) =
            trie_ops::remove::<AccountNode>(self.forest, self.root, account_path(address))?;
        self.root = new_root;
        Ok(removed.is_some())
    }

    pub fn set_balance(&mut self, address: [u8; 20], balance: U256) -> Result<(), ArchiveError> {
        let mut account = self.require_account(address)?;
        account.info.balance = balance;
        self.put_account(account)
    }

    pub fn set_nonce(&mut self, address: [u8; 20], nonce: u64) -> Result<(), ArchiveError> {
        let mut account = self.require_account(address)?;
        account.info.nonce = nonce;
        self.put_account(account)
    }

    /// Stores `code` in the code catalog and points the account at its hash.
    pub fn set_code(&mut self, address: [u8; 20], code: &[u8]) -> Result<H256, ArchiveError> {
        let hash = self.code_store.put(code)?;
        let mut account = self.require_account(address)?;
        account.info.code_hash = hash;
        self.put_account(account)?;
        Ok(hash)
    }

    pub fn get_storage(&self, address: [u8; 20], key: [u8; 32]) -> Result<Option<[u8; 32]>, ArchiveError> {
        let account = match self.get_account(address)? {
            Some(a) => a,
            None => return Ok(None),
        };
        let leaf = trie_ops::get::<ValueNode>(self.forest, account.storage_root, storage_path(key))?;
        Ok(leaf.map(|v| v.value))
    }

    /// Writes a storage slot; `value == [0u8; 32]` deletes it, matching
    /// Ethereum's "zero means absent" storage semantics.
    pub fn set_storage(&mut self, address: [u8; 20], key: [u8; 32], value: [u8; 32]) -> Result<(), ArchiveError> {
        let mut account = self.require_account(address)?;
        let path = storage_path(key);
        account.storage_root = if value == [0u8; 32] {
            trie_ops::remove::<ValueNode>(self.forest, account.storage_root, path)?.0
        } else {
            let leaf = ValueNode { key, value, path_length: 0 };
            trie_ops::insert(self.forest, account.storage_root, path, leaf)?
        };
        self.put_account(account)
    }

    /// Hashes and persists every dirty node beneath the current root,
    /// returning the root hash a block commits to `roots.dat`.
    pub fn freeze(&self) -> Result<H256, ArchiveError> {
        Ok(self.forest.freeze(self.root)?)
    }
}
