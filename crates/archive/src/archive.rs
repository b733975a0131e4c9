//! Component F: the Archive Controller. Owns the directory lock, the dirty
//! sentinel, the Forest, the code store, the root list and the checkpoint
//! coordinator, and exposes `Add`/`Get*`/`CreateWitnessProof`/
//! `RestoreBlockHeight` with the sticky-poisoning propagation policy of
//! spec §7.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use archivetrie_forest::{AccountInfo, AccountNode, CheckpointParticipant, Forest, Node, NodeId};
use ethereum_types::{H256, U256};

use crate::code_store::{CodeStore, EMPTY_CODE_HASH};
use crate::config::{ArchiveConfig, ArchiveMeta};
use crate::dir_lock::{DirLock, DirtySentinel};
use crate::error::ArchiveError;
use crate::live_head::{self, LiveHead};
use crate::root_list::{RootEntry, RootList};
use crate::trie_ops;
use crate::witness::{self, WitnessProof};

/// The set of mutations applied by a single `Add(block, update)` call, in
/// the fixed order `DeletedAccounts`, `CreatedAccounts`, `Balances`,
/// `Nonces`, `Codes`, `Slots`.
#[derive(Debug, Default, Clone)]
pub struct Update {
    pub deleted_accounts: Vec<[u8; 20]>,
    pub created_accounts: Vec<[u8; 20]>,
    pub balances: Vec<([u8; 20], U256)>,
    pub nonces: Vec<([u8; 20], u64)>,
    pub codes: Vec<([u8; 20], Vec<u8>)>,
    pub slots: Vec<([u8; 20], [u8; 32], [u8; 32])>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDiff {
    pub address: [u8; 20],
    pub before: Option<AccountInfo>,
    pub after: Option<AccountInfo>,
}

pub struct Archive {
    dir: PathBuf,
    config: ArchiveConfig,
    _lock: DirLock,
    forest: Forest,
    code_store: CodeStore,
    root_list: Mutex<RootList>,
    checkpoints: crate::checkpoint::CheckpointCoordinator,
    live_root: Mutex<NodeId>,
    last_block: Mutex<Option<u64>>,
    poison: Mutex<Option<ArchiveError>>,
}

impl Archive {
    pub fn open(dir: &Path, config: ArchiveConfig) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        if DirtySentinel::is_set(dir) {
            return Err(ArchiveError::Integrity(
                "directory was not cleanly closed; call Archive::recover before reopening"
                    .to_string(),
            ));
        }

        let lock = DirLock::acquire(dir)?;
        let sentinel = DirtySentinel::set(dir)?;

        let meta_path = dir.join("meta.json");
        let meta = ArchiveMeta::for_config(&config);
        if meta_path.exists() {
            let existing: ArchiveMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            if existing != meta {
                return Err(ArchiveError::Integrity(
                    "meta.json does not match the requested configuration".to_string(),
                ));
            }
        } else {
            std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;
        }

        let forest = Forest::open(dir, config.forest.clone())?;
        let code_store = CodeStore::open(dir)?;
        let root_list = RootList::load(dir)?;
        let checkpoints = crate::checkpoint::CheckpointCoordinator::open(&dir.join("checkpoint"))?;

        let last_block = if root_list.length() == 0 {
            None
        } else {
            Some(root_list.length() - 1)
        };
        let live_root = root_list
            .get(root_list.length().saturating_sub(1))
            .map(|e| e.root)
            .unwrap_or(NodeId::EMPTY);

        let archive = Self {
            dir: dir.to_path_buf(),
            config,
            _lock: lock,
            forest,
            code_store,
            root_list: Mutex::new(root_list),
            checkpoints,
            live_root: Mutex::new(live_root),
            last_block: Mutex::new(last_block),
            poison: Mutex::new(None),
        };
        sentinel.clear()?;
        tracing::info!(dir = %archive.dir.display(), "archive opened");
        Ok(archive)
    }

    /// Restores the directory to its last committed checkpoint, clearing a
    /// leftover dirty sentinel from an unclean close, then opens normally.
    pub fn recover(dir: &Path, config: ArchiveConfig) -> Result<Self, ArchiveError> {
        if !DirtySentinel::is_set(dir) {
            return Self::open(dir, config);
        }
        let lock = DirLock::acquire(dir)?;
        let forest = Forest::open(dir, config.forest.clone())?;
        let code_store = CodeStore::open(dir)?;
        let mut root_list = RootList::load(dir)?;
        let checkpoints = crate::checkpoint::CheckpointCoordinator::open(&dir.join("checkpoint"))?;

        if let Some(record) = checkpoints.last() {
            let mut participants = forest.checkpoint_participants().to_vec();
            participants.push(&code_store);
            participants.push(&root_list);
            checkpoints.restore_checkpoint(record.number, &participants)?;
            if let Some(num_roots) = root_list.committed_num_roots()? {
                root_list.truncate(num_roots)?;
            }
        }
        drop(lock);
        if DirtySentinel::is_set(dir) {
            std::fs::remove_file(DirtySentinel::path(dir))?;
        }
        Self::open(dir, config)
    }

    fn check_poison(&self) -> Result<(), ArchiveError> {
        if let Some(err) = self.poison.lock().expect("poison mutex poisoned").clone() {
            return Err(err);
        }
        Ok(())
    }

    fn latch<T>(&self, result: Result<T, ArchiveError>) -> Result<T, ArchiveError> {
        if let Err(err) = &result {
            if err.is_poisoning() {
                *self.poison.lock().expect("poison mutex poisoned") = Some(err.clone());
            }
        }
        result
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Applies `update` as block `block`, backfilling any empty blocks since
    /// the last one with a reused (unchanged) root.
    pub fn add(&self, block: u64, update: &Update) -> Result<H256, ArchiveError> {
        self.check_poison()?;
        let result = self.add_inner(block, update);
        self.latch(result)
    }

    fn add_inner(&self, block: u64, update: &Update) -> Result<H256, ArchiveError> {
        let mut last_block = self.last_block.lock().expect("last block mutex poisoned");
        if let Some(last) = *last_block {
            if block <= last {
                return Err(ArchiveError::DuplicateBlock { block, last });
            }
        }

        let mut root_list = self.root_list.lock().expect("root list mutex poisoned");
        let mut live_root = self.live_root.lock().expect("live root mutex poisoned");

        let start = last_block.map(|b| b + 1).unwrap_or(0);
        for _gap_block in start..block {
            let hash = self.forest.freeze(*live_root)?;
            root_list.append(RootEntry { root: *live_root, hash });
        }

        {
            let mut head = LiveHead::new(&self.forest, &self.code_store, *live_root);
            for address in &update.deleted_accounts {
                head.delete_account(*address)?;
            }
            for address in &update.created_accounts {
                head.create_account(
                    *address,
                    AccountInfo { nonce: 0, balance: U256::zero(), code_hash: *EMPTY_CODE_HASH },
                )?;
            }
            for (address, balance) in &update.balances {
                head.set_balance(*address, *balance)?;
            }
            for (address, nonce) in &update.nonces {
                head.set_nonce(*address, *nonce)?;
            }
            for (address, code) in &update.codes {
                head.set_code(*address, code)?;
            }
            for (address, key, value) in &update.slots {
                head.set_storage(*address, *key, *value)?;
            }
            *live_root = head.root();
        }

        let hash = self.forest.freeze(*live_root)?;
        root_list.append(RootEntry { root: *live_root, hash });
        root_list.store_roots()?;
        self.forest.flush()?;
        *last_block = Some(block);

        if self.config.checkpoint_interval > 0 {
            let interval = self.config.checkpoint_interval;
            let target_number = block / interval;
            let current_number = self.checkpoints.last().map(|r| r.number).unwrap_or(0);
            if target_number > current_number {
                let mut participants = self.forest.checkpoint_participants().to_vec();
                participants.push(&self.code_store);
                participants.push(&*root_list);
                self.checkpoints.create_checkpoint(block, &participants)?;
            }
        }

        tracing::debug!(block, root_hash = ?hash, "block added");
        Ok(hash)
    }

    fn root_at(&self, block: u64) -> Result<NodeId, ArchiveError> {
        let root_list = self.root_list.lock().expect("root list mutex poisoned");
        let height = root_list.length();
        if block >= height {
            return Err(ArchiveError::BlockOutOfRange { requested: block, height });
        }
        Ok(root_list.get(block).expect("block within bounds").root)
    }

    fn hash_at(&self, block: u64) -> Result<H256, ArchiveError> {
        let root_list = self.root_list.lock().expect("root list mutex poisoned");
        let height = root_list.length();
        if block >= height {
            return Err(ArchiveError::BlockOutOfRange { requested: block, height });
        }
        Ok(root_list.get(block).expect("block within bounds").hash)
    }

    fn account_at(&self, block: u64, address: [u8; 20]) -> Result<Option<AccountNode>, ArchiveError> {
        let root = self.root_at(block)?;
        trie_ops::get::<AccountNode>(&self.forest, root, live_head::account_path(address))
    }

    pub fn exists(&self, block: u64, address: [u8; 20]) -> Result<bool, ArchiveError> {
        self.check_poison()?;
        self.latch(self.account_at(block, address).map(|a| a.is_some()))
    }

    pub fn get_balance(&self, block: u64, address: [u8; 20]) -> Result<U256, ArchiveError> {
        self.check_poison()?;
        let result = self
            .account_at(block, address)
            .map(|a| a.map(|a| a.info.balance).unwrap_or_default());
        self.latch(result)
    }

    pub fn get_nonce(&self, block: u64, address: [u8; 20]) -> Result<u64, ArchiveError> {
        self.check_poison()?;
        let result = self
            .account_at(block, address)
            .map(|a| a.map(|a| a.info.nonce).unwrap_or_default());
        self.latch(result)
    }

    pub fn get_code(&self, block: u64, address: [u8; 20]) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            let Some(account) = self.account_at(block, address)? else {
                return Ok(None);
            };
            if account.info.code_hash == *EMPTY_CODE_HASH {
                return Ok(Some(Vec::new()));
            }
            self.code_store.get(account.info.code_hash)
        })();
        self.latch(result)
    }

    pub fn get_storage(
        &self,
        block: u64,
        address: [u8; 20],
        key: [u8; 32],
    ) -> Result<[u8; 32], ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            let Some(account) = self.account_at(block, address)? else {
                return Ok([0u8; 32]);
            };
            let leaf = trie_ops::get::<archivetrie_forest::ValueNode>(
                &self.forest,
                account.storage_root,
                live_head::storage_path(key),
            )?;
            Ok(leaf.map(|v| v.value).unwrap_or([0u8; 32]))
        })();
        self.latch(result)
    }

    pub fn get_hash(&self, block: u64) -> Result<H256, ArchiveError> {
        self.check_poison()?;
        self.latch(self.hash_at(block))
    }

    /// The Keccak256 hash of the account's own RLP-encoded leaf, a
    /// per-account commitment independent of its position in the trie.
    pub fn get_account_hash(&self, block: u64, address: [u8; 20]) -> Result<Option<H256>, ArchiveError> {
        self.check_poison()?;
        let result = self.account_at(block, address).map(|a| {
            a.map(|account| archivetrie_crypto::keccak_hash(Node::from(account).encode_raw()))
        });
        self.latch(result)
    }

    pub fn get_block_height(&self) -> Result<u64, ArchiveError> {
        self.check_poison()?;
        self.last_block
            .lock()
            .expect("last block mutex poisoned")
            .ok_or_else(|| ArchiveError::Integrity("no blocks have been added yet".to_string()))
    }

    pub fn get_checkpoint_block(&self) -> Result<u64, ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            let root_list = self.root_list.lock().expect("root list mutex poisoned");
            let num_roots = root_list.committed_num_roots()?.ok_or_else(|| {
                ArchiveError::Integrity("no checkpoint has been taken yet".to_string())
            })?;
            Ok(num_roots.saturating_sub(1))
        })();
        self.latch(result)
    }

    pub fn create_witness_proof(
        &self,
        block: u64,
        address: [u8; 20],
        keys: &[[u8; 32]],
    ) -> Result<WitnessProof, ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            let root = self.root_at(block)?;
            witness::build(&self.forest, root, address, keys)
        })();
        self.latch(result)
    }

    /// Diffs the account set between `from_block` and `to_block`.
    pub fn get_diff(&self, from_block: u64, to_block: u64) -> Result<Vec<AccountDiff>, ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            if to_block < from_block {
                return Err(ArchiveError::InvalidRange(format!(
                    "to_block {to_block} is before from_block {from_block}"
                )));
            }
            let before_root = self.root_at(from_block)?;
            let after_root = self.root_at(to_block)?;
            self.diff_roots(before_root, after_root)
        })();
        self.latch(result)
    }

    /// Shorthand for `get_diff(block - 1, block)`; block 0 diffs against
    /// the empty trie.
    pub fn get_diff_for_block(&self, block: u64) -> Result<Vec<AccountDiff>, ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            let after_root = self.root_at(block)?;
            let before_root = if block == 0 { NodeId::EMPTY } else { self.root_at(block - 1)? };
            self.diff_roots(before_root, after_root)
        })();
        self.latch(result)
    }

    /// Collects every reachable `(address, info)` pair under `root` into
    /// `out`. A full-trie scan rather than a hash-pruned structural diff:
    /// simple and correct regardless of how the two revisions' shapes
    /// diverge (an Extension on one side, a Branch on the other at the same
    /// logical position), at the cost of `O(account count)` instead of
    /// `O(changed accounts)`.
    fn collect_accounts(
        &self,
        root: NodeId,
        out: &mut std::collections::HashMap<[u8; 20], AccountInfo>,
    ) -> Result<(), ArchiveError> {
        if root.is_empty() {
            return Ok(());
        }
        match self.forest.get(root)? {
            Node::Empty => {}
            Node::Branch(branch) => {
                for child in branch.choices.iter() {
                    if !child.is_empty() {
                        self.collect_accounts(child.id, out)?;
                    }
                }
            }
            Node::Extension(ext) => self.collect_accounts(ext.child.id, out)?,
            Node::Account(account) => {
                out.insert(account.address, account.info);
            }
            Node::Value(_) => {}
        }
        Ok(())
    }

    fn diff_roots(&self, before: NodeId, after: NodeId) -> Result<Vec<AccountDiff>, ArchiveError> {
        if before == after {
            return Ok(Vec::new());
        }
        let mut before_map = std::collections::HashMap::new();
        let mut after_map = std::collections::HashMap::new();
        self.collect_accounts(before, &mut before_map)?;
        self.collect_accounts(after, &mut after_map)?;

        let mut addresses: Vec<[u8; 20]> =
            before_map.keys().chain(after_map.keys()).copied().collect();
        addresses.sort();
        addresses.dedup();

        let mut out = Vec::new();
        for address in addresses {
            let before_info = before_map.get(&address).copied();
            let after_info = after_map.get(&address).copied();
            if before_info != after_info {
                out.push(AccountDiff { address, before: before_info, after: after_info });
            }
        }
        Ok(out)
    }

    /// Restores every checkpoint participant to the checkpoint containing
    /// `target`, then truncates the root list to `target + 1` entries.
    pub fn restore_block_height(&self, target: u64) -> Result<(), ArchiveError> {
        self.check_poison()?;
        let result = self.restore_block_height_inner(target);
        self.latch(result)
    }

    fn restore_block_height_inner(&self, target: u64) -> Result<(), ArchiveError> {
        let last_checkpointed = self.get_checkpoint_block()?;
        if target > last_checkpointed {
            return Err(ArchiveError::RestoreBeyondCheckpoint {
                target,
                last_checkpoint: last_checkpointed,
            });
        }

        let sentinel = DirtySentinel::set(&self.dir)?;

        let number = self
            .checkpoints
            .last()
            .map(|r| r.number)
            .ok_or_else(|| ArchiveError::Integrity("no checkpoint recorded".to_string()))?;

        let mut root_list = self.root_list.lock().expect("root list mutex poisoned");
        let mut participants = self.forest.checkpoint_participants().to_vec();
        participants.push(&self.code_store);
        participants.push(&*root_list);
        self.checkpoints.restore_checkpoint(number, &participants)?;
        root_list.truncate(target + 1)?;

        let mut last_block = self.last_block.lock().expect("last block mutex poisoned");
        *last_block = Some(target);
        let mut live_root = self.live_root.lock().expect("live root mutex poisoned");
        *live_root = root_list.get(target).expect("truncated to target + 1").root;

        sentinel.clear()?;
        tracing::info!(target, "restored to block height");
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ArchiveError> {
        self.check_poison()?;
        let result = (|| {
            self.forest.flush()?;
            let mut root_list = self.root_list.lock().expect("root list mutex poisoned");
            root_list.store_roots()?;
            Ok(())
        })();
        self.latch(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use archivetrie_forest::ForestConfig;

    fn fresh_config() -> ArchiveConfig {
        ArchiveConfig {
            name: "test".to_string(),
            forest: ForestConfig::default(),
            checkpoint_interval: 0,
        }
    }

    #[test]
    fn add_then_read_balance_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let addr = [0x01; 20];
        {
            let archive = Archive::open(dir.path(), fresh_config()).unwrap();
            archive
                .add(
                    1,
                    &Update {
                        created_accounts: vec![addr],
                        balances: vec![(addr, U256::from(10))],
                        ..Default::default()
                    },
                )
                .unwrap();
            assert_eq!(archive.get_balance(1, addr).unwrap(), U256::from(10));
            assert_eq!(archive.get_balance(0, addr).unwrap(), U256::zero());
        }
        let reopened = Archive::open(dir.path(), fresh_config()).unwrap();
        assert_eq!(reopened.get_balance(1, addr).unwrap(), U256::from(10));
        assert_eq!(reopened.get_block_height().unwrap(), 1);
    }

    #[test]
    fn gap_blocks_reuse_the_previous_hash() {
        let dir = tempfile::tempdir().unwrap();
        let addr = [0x02; 20];
        let archive = Archive::open(dir.path(), fresh_config()).unwrap();
        archive
            .add(
                1,
                &Update {
                    created_accounts: vec![addr],
                    balances: vec![(addr, U256::from(1))],
                    ..Default::default()
                },
            )
            .unwrap();
        archive
            .add(
                3,
                &Update { balances: vec![(addr, U256::from(2))], ..Default::default() },
            )
            .unwrap();
        assert_eq!(archive.get_hash(1).unwrap(), archive.get_hash(2).unwrap());
        assert_eq!(archive.get_balance(2, addr).unwrap(), U256::from(1));
        assert_eq!(archive.get_balance(3, addr).unwrap(), U256::from(2));
        assert!(archive.get_balance(4, addr).is_err());
    }

    #[test]
    fn duplicate_block_is_rejected_without_poisoning() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path(), fresh_config()).unwrap();
        archive.add(1, &Update::default()).unwrap();
        let err = archive.add(1, &Update::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateBlock { block: 1, last: 1 }));
        // Archive is still healthy: a later call should succeed.
        archive.add(2, &Update::default()).unwrap();
    }

    #[test]
    fn checkpoint_then_restore_block_height() {
        let dir = tempfile::tempdir().unwrap();
        let addr = [0x03; 20];
        let config = ArchiveConfig { checkpoint_interval: 5, ..fresh_config() };
        let archive = Archive::open(dir.path(), config.clone()).unwrap();
        for block in 0..20u64 {
            archive
                .add(
                    block,
                    &Update {
                        created_accounts: if block == 0 { vec![addr] } else { Vec::new() },
                        balances: vec![(addr, U256::from(block))],
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        assert_eq!(archive.get_checkpoint_block().unwrap(), 15);

        archive.restore_block_height(15).unwrap();
        assert_eq!(archive.get_block_height().unwrap(), 15);
        assert_eq!(archive.get_balance(15, addr).unwrap(), U256::from(15));
    }

    #[test]
    fn diff_reports_balance_change() {
        let dir = tempfile::tempdir().unwrap();
        let addr = [0x04; 20];
        let archive = Archive::open(dir.path(), fresh_config()).unwrap();
        archive
            .add(
                0,
                &Update {
                    created_accounts: vec![addr],
                    balances: vec![(addr, U256::from(1))],
                    ..Default::default()
                },
            )
            .unwrap();
        archive
            .add(1, &Update { balances: vec![(addr, U256::from(2))], ..Default::default() })
            .unwrap();
        let diff = archive.get_diff_for_block(1).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].address, addr);
        assert_eq!(diff[0].before.unwrap().balance, U256::from(1));
        assert_eq!(diff[0].after.unwrap().balance, U256::from(2));
    }

    #[test]
    fn witness_proof_answers_membership_under_historical_root() {
        let dir = tempfile::tempdir().unwrap();
        let addr = [0x05; 20];
        let archive = Archive::open(dir.path(), fresh_config()).unwrap();
        archive
            .add(
                0,
                &Update {
                    created_accounts: vec![addr],
                    balances: vec![(addr, U256::from(99))],
                    ..Default::default()
                },
            )
            .unwrap();
        let proof = archive.create_witness_proof(0, addr, &[]).unwrap();
        assert!(proof.is_valid());
        let root_hash = archive.get_hash(0).unwrap();
        let (balance, complete) = witness::get_balance(&proof, root_hash, addr).unwrap();
        assert!(complete);
        assert_eq!(balance, Some(U256::from(99)));
    }
}
