//! Component H: the Witness Proof subsystem. A [`WitnessProof`] is an
//! unordered set of `(Keccak256(rlp), rlp)` pairs — a subset of trie nodes
//! sufficient to answer account/storage queries under a declared root hash,
//! without touching the [`archivetrie_forest::Forest`] that produced it.

use std::collections::HashMap;

use archivetrie_crypto::keccak_hash;
use archivetrie_forest::{AccountNode, Forest, Nibbles, Node, NodeHash, NodeId, ValueNode, EMPTY_TRIE_HASH};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WitnessProof {
    nodes: HashMap<H256, Vec<u8>>,
}

impl WitnessProof {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.nodes.contains_key(hash)
    }

    fn insert(&mut self, hash: H256, rlp: Vec<u8>) {
        self.nodes.insert(hash, rlp);
    }

    /// `true` iff every entry's key is the Keccak256 hash of its value.
    pub fn is_valid(&self) -> bool {
        self.nodes.iter().all(|(hash, rlp)| keccak_hash(rlp) == *hash)
    }

    /// The union of `self` and `other`'s entries.
    pub fn merge(&self, other: &WitnessProof) -> WitnessProof {
        let mut merged = self.clone();
        for (hash, rlp) in &other.nodes {
            merged.nodes.entry(*hash).or_insert_with(|| rlp.clone());
        }
        merged
    }
}

fn address_path(address: [u8; 20]) -> Nibbles {
    Nibbles::from_bytes(keccak_hash(address).as_bytes())
}

fn key_path(key: [u8; 32]) -> Nibbles {
    Nibbles::from_bytes(keccak_hash(key).as_bytes())
}

fn add_node(proof: &mut WitnessProof, node: &Node) {
    let raw = node.encode_raw();
    let hash = keccak_hash(&raw);
    proof.insert(hash, raw);
}

/// Walks from `id` along `path`, adding every visited non-empty,
/// non-embedded node's RLP to `proof`. Stops at a leaf, an absent child, or
/// an embedded child (whose encoding already lives inside its parent's RLP).
fn build_walk(forest: &Forest, id: NodeId, mut path: Nibbles, proof: &mut WitnessProof) -> Result<(), ArchiveError> {
    if id.is_empty() {
        return Ok(());
    }
    let node = forest.get(id)?;
    add_node(proof, &node);
    match node {
        Node::Empty => Ok(()),
        Node::Branch(b) => {
            if path.len() <= 1 {
                return Ok(());
            }
            let nib = path.at(0);
            let child = b.choices[nib];
            if child.is_empty() {
                return Ok(());
            }
            match child.hash {
                Some(NodeHash::Inline(_, _)) | None => Ok(()),
                Some(NodeHash::Hashed(_)) => build_walk(forest, child.id, path.offset(1), proof),
            }
        }
        Node::Extension(e) => {
            if path.len() < e.prefix.len() || path.slice(0, e.prefix.len()) != e.prefix {
                return Ok(());
            }
            let consumed = e.prefix.len();
            match e.child.hash {
                Some(NodeHash::Inline(_, _)) | None => Ok(()),
                Some(NodeHash::Hashed(_)) => build_walk(forest, e.child.id, path.offset(consumed), proof),
            }
        }
        Node::Account(_) | Node::Value(_) => Ok(()),
    }
}

/// Builds a witness proof for `address` (and, if given, each of its storage
/// `keys`) rooted at `root`.
pub fn build(forest: &Forest, root: NodeId, address: [u8; 20], keys: &[[u8; 32]]) -> Result<WitnessProof, ArchiveError> {
    let mut proof = WitnessProof::new();
    build_walk(forest, root, address_path(address), &mut proof)?;

    if !keys.is_empty() {
        if let Some(account) = get_account_from_forest(forest, root, address)? {
            for &key in keys {
                build_walk(forest, account.storage_root, key_path(key), &mut proof)?;
            }
        }
    }

    let root_hash = forest.freeze(root)?;
    let (_, complete) = get_account_info(&proof, root_hash, address)?;
    debug_assert!(complete, "a proof just built from the forest must answer its own query");

    Ok(proof)
}

fn get_account_from_forest(forest: &Forest, root: NodeId, address: [u8; 20]) -> Result<Option<AccountNode>, ArchiveError> {
    Ok(crate::trie_ops::get::<AccountNode>(forest, root, address_path(address))?)
}

enum Leaf {
    Account(AccountNode),
    Value(ValueNode),
}

enum WalkOutcome {
    Found(Leaf),
    Absent,
    Incomplete,
}

fn resolve(proof: &WitnessProof, hash: &NodeHash) -> Result<Option<Node>, ArchiveError> {
    match hash {
        NodeHash::Inline(data, len) => Ok(Some(
            Node::decode_raw(&data[..*len as usize]).map_err(|e| ArchiveError::MalformedProof(e.to_string()))?,
        )),
        NodeHash::Hashed(h) => {
            if *h == *EMPTY_TRIE_HASH {
                return Ok(Some(Node::Empty));
            }
            match proof.nodes.get(h) {
                Some(rlp) => Ok(Some(
                    Node::decode_raw(rlp).map_err(|e| ArchiveError::MalformedProof(e.to_string()))?,
                )),
                None => Ok(None),
            }
        }
    }
}

/// Walks the proof from `root_hash` along `path`, collecting every visited
/// node's `(hash, rlp)` pair (in root-to-leaf order) along the way,
/// regardless of whether the walk completes.
fn walk_collect(proof: &WitnessProof, root_hash: H256, path: &Nibbles) -> Result<(WalkOutcome, Vec<(H256, Vec<u8>)>), ArchiveError> {
    let mut ordered = Vec::new();
    let mut current = NodeHash::Hashed(root_hash);
    let mut remaining = path.clone();

    loop {
        let node = match resolve(proof, &current)? {
            None => return Ok((WalkOutcome::Incomplete, ordered)),
            Some(node) => {
                if let NodeHash::Hashed(h) = current {
                    if h != *EMPTY_TRIE_HASH {
                        if let Some(rlp) = proof.nodes.get(&h) {
                            ordered.push((h, rlp.clone()));
                        }
                    }
                }
                node
            }
        };

        match node {
            Node::Empty => return Ok((WalkOutcome::Absent, ordered)),
            Node::Branch(b) => {
                if remaining.len() <= 1 {
                    return Ok((WalkOutcome::Absent, ordered));
                }
                let nib = remaining.at(0);
                let child = b.choices[nib];
                if child.is_empty() {
                    return Ok((WalkOutcome::Absent, ordered));
                }
                current = child
                    .hash
                    .ok_or_else(|| ArchiveError::MalformedProof("branch child missing an edge hash".to_string()))?;
                remaining = remaining.offset(1);
            }
            Node::Extension(e) => {
                if remaining.len() < e.prefix.len() || remaining.slice(0, e.prefix.len()) != e.prefix {
                    return Ok((WalkOutcome::Absent, ordered));
                }
                let consumed = e.prefix.len();
                current = e
                    .child
                    .hash
                    .ok_or_else(|| ArchiveError::MalformedProof("extension child missing an edge hash".to_string()))?;
                remaining = remaining.offset(consumed);
            }
            Node::Account(a) => return Ok((WalkOutcome::Found(Leaf::Account(a)), ordered)),
            Node::Value(v) => return Ok((WalkOutcome::Found(Leaf::Value(v)), ordered)),
        }
    }
}

/// `(account, complete)`: `complete=false` means the proof set was missing a
/// node needed to answer the query, not that the account doesn't exist.
pub fn get_account_info(proof: &WitnessProof, root_hash: H256, address: [u8; 20]) -> Result<(Option<AccountNode>, bool), ArchiveError> {
    let (outcome, _) = walk_collect(proof, root_hash, &address_path(address))?;
    match outcome {
        WalkOutcome::Found(Leaf::Account(a)) => Ok((Some(a), true)),
        WalkOutcome::Found(Leaf::Value(_)) => Err(ArchiveError::MalformedProof(
            "expected an account leaf, found a storage value leaf".to_string(),
        )),
        WalkOutcome::Absent => Ok((None, true)),
        WalkOutcome::Incomplete => Ok((None, false)),
    }
}

pub fn get_nonce(proof: &WitnessProof, root_hash: H256, address: [u8; 20]) -> Result<(Option<u64>, bool), ArchiveError> {
    let (account, complete) = get_account_info(proof, root_hash, address)?;
    Ok((account.map(|a| a.info.nonce), complete))
}

pub fn get_balance(
    proof: &WitnessProof,
    root_hash: H256,
    address: [u8; 20],
) -> Result<(Option<ethereum_types::U256>, bool), ArchiveError> {
    let (account, complete) = get_account_info(proof, root_hash, address)?;
    Ok((account.map(|a| a.info.balance), complete))
}

pub fn get_code_hash(proof: &WitnessProof, root_hash: H256, address: [u8; 20]) -> Result<(Option<H256>, bool), ArchiveError> {
    let (account, complete) = get_account_info(proof, root_hash, address)?;
    Ok((account.map(|a| a.info.code_hash), complete))
}

/// `(value, complete)`: an absent slot reads as `None`, matching Ethereum's
/// "zero means absent" storage convention.
pub fn get_state(
    proof: &WitnessProof,
    root_hash: H256,
    address: [u8; 20],
    key: [u8; 32],
) -> Result<(Option<[u8; 32]>, bool), ArchiveError> {
    let (account, complete) = get_account_info(proof, root_hash, address)?;
    if !complete {
        return Ok((None, false));
    }
    let Some(account) = account else {
        return Ok((None, true));
    };
    let (outcome, _) = walk_collect(proof, account.storage_hash, &key_path(key))?;
    match outcome {
        WalkOutcome::Found(Leaf::Value(v)) => Ok((Some(v.value), true)),
        WalkOutcome::Found(Leaf::Account(_)) => Err(ArchiveError::MalformedProof(
            "expected a storage value leaf, found an account leaf".to_string(),
        )),
        WalkOutcome::Absent => Ok((None, true)),
        WalkOutcome::Incomplete => Ok((None, false)),
    }
}

/// The account-trie node RLPs visited while walking to `address`, in
/// trie-navigation order starting at the root.
pub fn get_account_elements(proof: &WitnessProof, root_hash: H256, address: [u8; 20]) -> Result<Vec<(H256, Vec<u8>)>, ArchiveError> {
    let (_, ordered) = walk_collect(proof, root_hash, &address_path(address))?;
    Ok(ordered)
}

/// The storage-trie node RLPs visited while walking to `key` under
/// `address`'s storage root, in trie-navigation order. Empty if the account
/// itself can't be resolved from the proof.
pub fn get_storage_elements(
    proof: &WitnessProof,
    root_hash: H256,
    address: [u8; 20],
    key: [u8; 32],
) -> Result<Vec<(H256, Vec<u8>)>, ArchiveError> {
    let (account, complete) = get_account_info(proof, root_hash, address)?;
    if !complete {
        return Ok(Vec::new());
    }
    let Some(account) = account else {
        return Ok(Vec::new());
    };
    let (_, ordered) = walk_collect(proof, account.storage_hash, &key_path(key))?;
    Ok(ordered)
}

/// Extracts the minimal sub-proof answering `(address, keys)` from `proof`.
/// Unlike the `Get*`/`GetState` queries, an incomplete source proof is an
/// error here: a sub-proof can only be produced from a path that fully
/// resolves.
pub fn extract(proof: &WitnessProof, root_hash: H256, address: [u8; 20], keys: &[[u8; 32]]) -> Result<WitnessProof, ArchiveError> {
    let mut sub = WitnessProof::new();
    let (outcome, ordered) = walk_collect(proof, root_hash, &address_path(address))?;
    for (hash, rlp) in ordered {
        sub.insert(hash, rlp);
    }
    let account = match outcome {
        WalkOutcome::Found(Leaf::Account(a)) => Some(a),
        WalkOutcome::Found(Leaf::Value(_)) => {
            return Err(ArchiveError::MalformedProof(
                "expected an account leaf, found a storage value leaf".to_string(),
            ))
        }
        WalkOutcome::Absent => None,
        WalkOutcome::Incomplete => return Err(ArchiveError::ProofIncomplete(root_hash)),
    };

    if let Some(account) = account {
        for &key in keys {
            let (outcome, ordered) = walk_collect(proof, account.storage_hash, &key_path(key))?;
            for (hash, rlp) in ordered {
                sub.insert(hash, rlp);
            }
            if matches!(outcome, WalkOutcome::Incomplete) {
                return Err(ArchiveError::ProofIncomplete(account.storage_hash));
            }
        }
    }
    Ok(sub)
}

/// An ephemeral, non-persistent view over a [`WitnessProof`]'s node set: it
/// answers the same queries as a live `Archive`/`Forest` pair but resolves
/// every node straight out of the proof, so a proof can be decoded and
/// re-walked on its own, without a `Forest` behind it.
pub struct StatelessView<'a> {
    proof: &'a WitnessProof,
    root_hash: H256,
}

impl<'a> StatelessView<'a> {
    pub fn from_proof(proof: &'a WitnessProof, root_hash: H256) -> Self {
        Self { proof, root_hash }
    }

    pub fn root_hash(&self) -> H256 {
        self.root_hash
    }

    /// Decodes and returns the raw node stored under `hash`, or `None` if
    /// the proof doesn't carry it.
    pub fn get_node(&self, hash: H256) -> Result<Option<Node>, ArchiveError> {
        match self.proof.nodes.get(&hash) {
            Some(rlp) => {
                Ok(Some(Node::decode_raw(rlp).map_err(|e| ArchiveError::MalformedProof(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    pub fn get_account_info(&self, address: [u8; 20]) -> Result<(Option<AccountNode>, bool), ArchiveError> {
        get_account_info(self.proof, self.root_hash, address)
    }

    pub fn get_nonce(&self, address: [u8; 20]) -> Result<(Option<u64>, bool), ArchiveError> {
        get_nonce(self.proof, self.root_hash, address)
    }

    pub fn get_balance(&self, address: [u8; 20]) -> Result<(Option<ethereum_types::U256>, bool), ArchiveError> {
        get_balance(self.proof, self.root_hash, address)
    }

    pub fn get_state(&self, address: [u8; 20], key: [u8; 32]) -> Result<(Option<[u8; 32]>, bool), ArchiveError> {
        get_state(self.proof, self.root_hash, address, key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use archivetrie_forest::{AccountInfo, ForestConfig};
    use ethereum_types::U256;

    fn fresh() -> (tempfile::TempDir, Forest) {
        let dir = tempfile::tempdir().unwrap();
        let forest = Forest::open(dir.path(), ForestConfig::default()).unwrap();
        (dir, forest)
    }

    fn account(address: [u8; 20], balance: u64) -> AccountNode {
        AccountNode {
            address,
            info: AccountInfo {
                nonce: 1,
                balance: U256::from(balance),
                code_hash: H256::zero(),
            },
            storage_root: NodeId::EMPTY,
            storage_hash: *EMPTY_TRIE_HASH,
            path_length: 0,
        }
    }

    #[test]
    fn proof_answers_membership_query() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let b = [0x02; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root = crate::trie_ops::insert(&forest, root, address_path(b), account(b, 20)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let proof = build(&forest, root, a, &[]).unwrap();
        assert!(proof.is_valid());

        let (balance, complete) = get_balance(&proof, root_hash, a).unwrap();
        assert!(complete);
        assert_eq!(balance, Some(U256::from(10)));
    }

    #[test]
    fn proof_answers_non_membership_query() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let missing = [0x09; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let proof = build(&forest, root, missing, &[]).unwrap();
        let (account_opt, complete) = get_account_info(&proof, root_hash, missing).unwrap();
        assert!(complete);
        assert!(account_opt.is_none());
    }

    #[test]
    fn extract_then_merge_round_trips() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let b = [0x02; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root = crate::trie_ops::insert(&forest, root, address_path(b), account(b, 20)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let full = build(&forest, root, a, &[]).unwrap();
        let extracted = extract(&full, root_hash, a, &[]).unwrap();
        let merged = full.merge(&extracted);
        assert_eq!(merged.len(), full.len());
    }

    #[test]
    fn incomplete_proof_is_reported_not_errored() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let empty_proof = WitnessProof::new();
        let (account_opt, complete) = get_account_info(&empty_proof, root_hash, a).unwrap();
        assert!(!complete);
        assert!(account_opt.is_none());
    }

    #[test]
    fn stateless_view_answers_queries_and_exposes_raw_nodes() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let b = [0x02; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root = crate::trie_ops::insert(&forest, root, address_path(b), account(b, 20)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let proof = build(&forest, root, a, &[]).unwrap();
        let view = StatelessView::from_proof(&proof, root_hash);

        let (balance, complete) = view.get_balance(a).unwrap();
        assert!(complete);
        assert_eq!(balance, Some(U256::from(10)));

        let root_node = view.get_node(root_hash).unwrap();
        assert!(root_node.is_some());
    }

    #[test]
    fn proof_round_trips_through_serde() {
        let (_dir, forest) = fresh();
        let a = [0x01; 20];
        let root = crate::trie_ops::insert(&forest, NodeId::EMPTY, address_path(a), account(a, 10)).unwrap();
        let root_hash = forest.freeze(root).unwrap();

        let proof = build(&forest, root, a, &[]).unwrap();
        let bytes = serde_json::to_vec(&proof).unwrap();
        let decoded: WitnessProof = serde_json::from_slice(&bytes).unwrap();

        let (balance, complete) = get_balance(&decoded, root_hash, a).unwrap();
        assert!(complete);
        assert_eq!(balance, Some(U256::from(10)));
    }
}
