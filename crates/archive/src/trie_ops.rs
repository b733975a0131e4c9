//! Generic insert/get/remove over a [`Forest`], shared between the account
//! trie (leaves are [`AccountNode`]) and each account's storage trie (leaves
//! are [`ValueNode`]). Both are ordinary Merkle-Patricia tries over a fixed
//! 65-nibble hashed path (64 nibbles of `Keccak256` plus the trailing leaf
//! flag); since every key hashes to the same length, no key is ever a proper
//! prefix of another, so branch nodes never need to populate their 17th
//! "value" slot.
//!
//! New/modified nodes always get a fresh [`NodeId`] unless the node being
//! replaced is already dirty (created since the last freeze) — a frozen
//! node may be referenced by a historical root and must never be mutated in
//! place.

use archivetrie_forest::{
    AccountNode, BranchNode, ChildRef, ExtensionNode, Forest, Nibbles, Node, NodeId, ValueNode,
};

use crate::error::ArchiveError;

pub trait Leaf: Clone {
    fn path_length(&self) -> u8;
    fn local_path(&self) -> Nibbles;
    fn with_path_length(self, len: u8) -> Self;
    fn into_node(self) -> Node;
    fn try_from_node(node: Node) -> Result<Self, ArchiveError>;
}

impl Leaf for AccountNode {
    fn path_length(&self) -> u8 {
        self.path_length
    }

    fn local_path(&self) -> Nibbles {
        AccountNode::local_path(self)
    }

    fn with_path_length(mut self, len: u8) -> Self {
        self.path_length = len;
        self
    }

    fn into_node(self) -> Node {
        Node::from(self)
    }

    fn try_from_node(node: Node) -> Result<Self, ArchiveError> {
        match node {
            Node::Account(a) => Ok(a),
            other => Err(ArchiveError::Integrity(format!(
                "expected an Account leaf in the account trie, found {other:?}"
            ))),
        }
    }
}

impl Leaf for ValueNode {
    fn path_length(&self) -> u8 {
        self.path_length
    }

    fn local_path(&self) -> Nibbles {
        ValueNode::local_path(self)
    }

    fn with_path_length(mut self, len: u8) -> Self {
        self.path_length = len;
        self
    }

    fn into_node(self) -> Node {
        Node::from(self)
    }

    fn try_from_node(node: Node) -> Result<Self, ArchiveError> {
        match node {
            Node::Value(v) => Ok(v),
            other => Err(ArchiveError::Integrity(format!(
                "expected a Value leaf in a storage trie, found {other:?}"
            ))),
        }
    }
}

fn is_leaf_node(node: &Node) -> bool {
    matches!(node, Node::Account(_) | Node::Value(_))
}

fn cow(forest: &Forest, id: NodeId, node: Node) -> Result<NodeId, ArchiveError> {
    if forest.is_dirty(id) {
        forest.set(id, node)?;
        Ok(id)
    } else {
        Ok(forest.create(node)?)
    }
}

pub fn get<L: Leaf>(forest: &Forest, mut id: NodeId, mut path: Nibbles) -> Result<Option<L>, ArchiveError> {
    loop {
        if id.is_empty() {
            return Ok(None);
        }
        let node = forest.get(id)?;
        match node {
            Node::Empty => return Ok(None),
            Node::Branch(b) => {
                if path.len() <= 1 {
                    return Ok(None);
                }
                let nib = path.at(0);
                id = b.choices[nib].id;
                path = path.offset(1);
            }
            Node::Extension(e) => {
                if path.len() < e.prefix.len() || path.slice(0, e.prefix.len()) != e.prefix {
                    return Ok(None);
                }
                let consumed = e.prefix.len();
                id = e.child.id;
                path = path.offset(consumed);
            }
            other => {
                let leaf = L::try_from_node(other)?;
                return Ok((leaf.local_path() == path).then_some(leaf));
            }
        }
    }
}

pub fn insert<L: Leaf>(forest: &Forest, id: NodeId, path: Nibbles, leaf: L) -> Result<NodeId, ArchiveError> {
    if id.is_empty() {
        let len = path.len() as u8;
        return Ok(forest.create(leaf.with_path_length(len).into_node())?);
    }
    let node = forest.get(id)?;
    match node {
        Node::Empty => unreachable!("non-empty id resolved to Node::Empty"),
        Node::Branch(mut b) => {
            if path.len() <= 1 {
                return Err(ArchiveError::Integrity(
                    "branch node reached with no remaining path nibbles".to_string(),
                ));
            }
            let nib = path.at(0);
            let child_id = b.choices[nib].id;
            let new_child_id = insert(forest, child_id, path.offset(1), leaf)?;
            b.choices[nib] = ChildRef::dirty(new_child_id);
            cow(forest, id, Node::Branch(b))
        }
        Node::Extension(mut e) => {
            let cp = path.count_prefix(&e.prefix);
            if cp == e.prefix.len() {
                let new_child = insert(forest, e.child.id, path.offset(cp), leaf)?;
                e.child = ChildRef::dirty(new_child);
                cow(forest, id, Node::Extension(e))
            } else {
                split_extension(forest, e, path, leaf, cp)
            }
        }
        leaf_node if is_leaf_node(&leaf_node) => {
            let existing = L::try_from_node(leaf_node)?;
            let existing_path = existing.local_path();
            if existing_path == path {
                let len = path.len() as u8;
                cow(forest, id, leaf.with_path_length(len).into_node())
            } else {
                split_leaf(forest, existing, existing_path, path, leaf)
            }
        }
        other => Err(ArchiveError::Integrity(format!(
            "unexpected node kind during insert: {other:?}"
        ))),
    }
}

fn split_leaf<L: Leaf>(
    forest: &Forest,
    existing: L,
    existing_path: Nibbles,
    new_path: Nibbles,
    new_leaf: L,
) -> Result<NodeId, ArchiveError> {
    let cp = existing_path.count_prefix(&new_path);
    let mut branch = BranchNode::default();

    let existing_nib = existing_path.at(cp);
    let existing_len = (existing_path.len() - cp - 1) as u8;
    let existing_id = forest.create(existing.with_path_length(existing_len).into_node())?;
    branch.choices[existing_nib] = ChildRef::dirty(existing_id);

    let new_nib = new_path.at(cp);
    let new_len = (new_path.len() - cp - 1) as u8;
    let new_id = forest.create(new_leaf.with_path_length(new_len).into_node())?;
    branch.choices[new_nib] = ChildRef::dirty(new_id);

    let branch_id = forest.create(Node::Branch(Box::new(branch)))?;
    if cp == 0 {
        Ok(branch_id)
    } else {
        let prefix = new_path.slice(0, cp);
        Ok(forest.create(Node::Extension(ExtensionNode {
            prefix,
            child: ChildRef::dirty(branch_id),
        }))?)
    }
}

fn split_extension<L: Leaf>(
    forest: &Forest,
    e: ExtensionNode,
    path: Nibbles,
    leaf: L,
    cp: usize,
) -> Result<NodeId, ArchiveError> {
    let mut branch = BranchNode::default();

    let old_nib = e.prefix.at(cp);
    let old_remainder = e.prefix.offset(cp + 1);
    let old_branch_child_id = if old_remainder.is_empty() {
        e.child.id
    } else {
        forest.create(Node::Extension(ExtensionNode {
            prefix: old_remainder,
            child: e.child,
        }))?
    };
    branch.choices[old_nib] = ChildRef::dirty(old_branch_child_id);

    let new_nib = path.at(cp);
    let new_remainder = path.offset(cp + 1);
    let new_leaf_id = forest.create(leaf.with_path_length(new_remainder.len() as u8).into_node())?;
    branch.choices[new_nib] = ChildRef::dirty(new_leaf_id);

    let branch_id = forest.create(Node::Branch(Box::new(branch)))?;
    if cp == 0 {
        Ok(branch_id)
    } else {
        let prefix = path.slice(0, cp);
        Ok(forest.create(Node::Extension(ExtensionNode {
            prefix,
            child: ChildRef::dirty(branch_id),
        }))?)
    }
}

/// Collapses a branch with a single remaining child into that child's
/// position, absorbing the nibble `nibble` that used to select it.
fn collapse_single_child(forest: &Forest, nibble: u8, child_id: NodeId) -> Result<NodeId, ArchiveError> {
    let child = forest.get(child_id)?;
    match child {
        Node::Extension(ext) => {
            let mut prefix = Nibbles::from_hex(vec![nibble]);
            prefix.extend(&ext.prefix);
            Ok(forest.create(Node::Extension(ExtensionNode {
                prefix,
                child: ext.child,
            }))?)
        }
        Node::Account(a) => {
            let len = a.path_length() + 1;
            Ok(forest.create(a.with_path_length(len).into_node())?)
        }
        Node::Value(v) => {
            let len = v.path_length() + 1;
            Ok(forest.create(v.with_path_length(len).into_node())?)
        }
        Node::Branch(_) => Ok(forest.create(Node::Extension(ExtensionNode {
            prefix: Nibbles::from_hex(vec![nibble]),
            child: ChildRef::dirty(child_id),
        }))?),
        Node::Empty => unreachable!("a branch's non-empty child slot pointed at Empty"),
    }
}

pub fn remove<L: Leaf>(forest: &Forest, id: NodeId, path: Nibbles) -> Result<(NodeId, Option<L>), ArchiveError> {
    if id.is_empty() {
        return Ok((NodeId::EMPTY, None));
    }
    let node = forest.get(id)?;
    match node {
        Node::Empty => Ok((NodeId::EMPTY, None)),
        Node::Branch(mut b) => {
            if path.len() <= 1 {
                return Ok((id, None));
            }
            let nib = path.at(0);
            let child_id = b.choices[nib].id;
            let (new_child_id, removed) = remove::<L>(forest, child_id, path.offset(1))?;
            if removed.is_none() {
                return Ok((id, None));
            }
            b.choices[nib] = if new_child_id.is_empty() {
                ChildRef::empty()
            } else {
                ChildRef::dirty(new_child_id)
            };

            let remaining: Vec<usize> = b
                .choices
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_empty())
                .map(|(i, _)| i)
                .collect();
            if remaining.is_empty() {
                Ok((NodeId::EMPTY, removed))
            } else if remaining.len() == 1 {
                let only = remaining[0];
                let only_child_id = b.choices[only].id;
                let collapsed = collapse_single_child(forest, only as u8, only_child_id)?;
                Ok((collapsed, removed))
            } else {
                Ok((cow(forest, id, Node::Branch(b))?, removed))
            }
        }
        Node::Extension(mut e) => {
            let cp = path.count_prefix(&e.prefix);
            if cp < e.prefix.len() {
                return Ok((id, None));
            }
            let (new_child_id, removed) = remove::<L>(forest, e.child.id, path.offset(cp))?;
            if removed.is_none() {
                return Ok((id, None));
            }
            if new_child_id.is_empty() {
                return Ok((NodeId::EMPTY, removed));
            }
            match forest.get(new_child_id)? {
                Node::Extension(child_ext) => {
                    let mut merged_prefix = e.prefix.clone();
                    merged_prefix.extend(&child_ext.prefix);
                    let new_id = forest.create(Node::Extension(ExtensionNode {
                        prefix: merged_prefix,
                        child: child_ext.child,
                    }))?;
                    Ok((new_id, removed))
                }
                _ => {
                    e.child = ChildRef::dirty(new_child_id);
                    Ok((cow(forest, id, Node::Extension(e))?, removed))
                }
            }
        }
        leaf_node if is_leaf_node(&leaf_node) => {
            let existing = L::try_from_node(leaf_node)?;
            if existing.local_path() == path {
                Ok((NodeId::EMPTY, Some(existing)))
            } else {
                Ok((id, None))
            }
        }
        other => Err(ArchiveError::Integrity(format!(
            "unexpected node kind during remove: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use archivetrie_crypto::keccak_hash;
    use archivetrie_forest::{AccountInfo, ForestConfig};
    use ethereum_types::{H256, U256};

    fn fresh_forest() -> (tempfile::TempDir, Forest) {
        let dir = tempfile::tempdir().unwrap();
        let forest = Forest::open(dir.path(), ForestConfig::default()).unwrap();
        (dir, forest)
    }

    fn account(address: [u8; 20], balance: u64) -> AccountNode {
        AccountNode {
            address,
            info: AccountInfo {
                nonce: 0,
                balance: U256::from(balance),
                code_hash: H256::zero(),
            },
            storage_root: NodeId::EMPTY,
            storage_hash: *archivetrie_forest::EMPTY_TRIE_HASH,
            path_length: 0,
        }
    }

    fn path_for(address: [u8; 20]) -> Nibbles {
        Nibbles::from_bytes(keccak_hash(address).as_bytes())
    }

    #[test]
    fn insert_then_get_single_account() {
        let (_dir, forest) = fresh_forest();
        let addr = [0x01; 20];
        let root = insert(&forest, NodeId::EMPTY, path_for(addr), account(addr, 100)).unwrap();
        let got: AccountNode = get(&forest, root, path_for(addr)).unwrap().unwrap();
        assert_eq!(got.info.balance, U256::from(100));
    }

    #[test]
    fn insert_two_accounts_and_update_one() {
        let (_dir, forest) = fresh_forest();
        let a = [0x01; 20];
        let b = [0x02; 20];
        let root = insert(&forest, NodeId::EMPTY, path_for(a), account(a, 10)).unwrap();
        let root = insert(&forest, root, path_for(b), account(b, 20)).unwrap();
        let root = insert(&forest, root, path_for(a), account(a, 99)).unwrap();

        let got_a: AccountNode = get(&forest, root, path_for(a)).unwrap().unwrap();
        let got_b: AccountNode = get(&forest, root, path_for(b)).unwrap().unwrap();
        assert_eq!(got_a.info.balance, U256::from(99));
        assert_eq!(got_b.info.balance, U256::from(20));
    }

    #[test]
    fn remove_one_of_two_leaves_the_other_reachable() {
        let (_dir, forest) = fresh_forest();
        let a = [0x01; 20];
        let b = [0x02; 20];
        let root = insert(&forest, NodeId::EMPTY, path_for(a), account(a, 10)).unwrap();
        let root = insert(&forest, root, path_for(b), account(b, 20)).unwrap();

        let (root, removed): (NodeId, Option<AccountNode>) = remove(&forest, root, path_for(a)).unwrap();
        assert!(removed.is_some());
        assert!(get::<AccountNode>(&forest, root, path_for(a)).unwrap().is_none());
        let got_b: AccountNode = get(&forest, root, path_for(b)).unwrap().unwrap();
        assert_eq!(got_b.info.balance, U256::from(20));
    }

    #[test]
    fn remove_missing_key_is_a_no_op() {
        let (_dir, forest) = fresh_forest();
        let a = [0x01; 20];
        let root = insert(&forest, NodeId::EMPTY, path_for(a), account(a, 10)).unwrap();
        let missing = [0x09; 20];
        let (new_root, removed): (NodeId, Option<AccountNode>) = remove(&forest, root, path_for(missing)).unwrap();
        assert!(removed.is_none());
        assert_eq!(new_root, root);
    }
}
