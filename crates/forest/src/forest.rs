//! The Forest: one [`Stock`] per non-empty node kind, the node cache, the
//! hashing/encoding policy, and freeze bookkeeping.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::cache::NodeCache;
use crate::config::ForestConfig;
use crate::error::ForestError;
use crate::node::{AccountNode, BranchNode, ExtensionNode, Node, ValueNode};
use crate::node_hash::NodeHash;
use crate::node_id::{NodeId, NodeKind, NodeReference};
use crate::stock::Stock;

#[derive(Serialize, Deserialize, PartialEq, Eq)]
struct ForestMeta {
    version: u32,
    hash_location: crate::config::HashLocation,
}

const FOREST_FORMAT_VERSION: u32 = 1;

pub struct Forest {
    dir: PathBuf,
    branches: Stock<BranchNode>,
    extensions: Stock<ExtensionNode>,
    accounts: Stock<AccountNode>,
    values: Stock<ValueNode>,
    cache: NodeCache,
    config: ForestConfig,
    dirty: Mutex<HashSet<NodeId>>,
}

impl Forest {
    pub fn open(dir: &Path, config: ForestConfig) -> Result<Self, ForestError> {
        std::fs::create_dir_all(dir)?;
        let meta_path = dir.join("forest.json");
        let meta = ForestMeta {
            version: FOREST_FORMAT_VERSION,
            hash_location: config.hash_location,
        };
        if meta_path.exists() {
            let existing: ForestMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            if existing != meta {
                return Err(ForestError::Storage(anyhow::anyhow!(
                    "forest.json does not match the requested configuration"
                )));
            }
        } else {
            std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;
        }

        let branches_dir = dir.join("branches");
        let extensions_dir = dir.join("extensions");
        let accounts_dir = dir.join("accounts");
        let values_dir = dir.join("values");

        let branches = if branches_dir.join("meta.json").exists() {
            Stock::open(&branches_dir, NodeKind::Branch as u8)?
        } else {
            Stock::create(&branches_dir, NodeKind::Branch as u8)?
        };
        let extensions = if extensions_dir.join("meta.json").exists() {
            Stock::open(&extensions_dir, NodeKind::Extension as u8)?
        } else {
            Stock::create(&extensions_dir, NodeKind::Extension as u8)?
        };
        let accounts = if accounts_dir.join("meta.json").exists() {
            Stock::open(&accounts_dir, NodeKind::Account as u8)?
        } else {
            Stock::create(&accounts_dir, NodeKind::Account as u8)?
        };
        let values = if values_dir.join("meta.json").exists() {
            Stock::open(&values_dir, NodeKind::Value as u8)?
        } else {
            Stock::create(&values_dir, NodeKind::Value as u8)?
        };

        tracing::info!(dir = %dir.display(), "forest opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            branches,
            extensions,
            accounts,
            values,
            cache: NodeCache::new(config.cache_capacity),
            config,
            dirty: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocates a fresh id for `node`'s kind and installs it in the cache,
    /// dirty (not yet persisted to its stock — that happens at `freeze`).
    pub fn create(&self, node: Node) -> Result<NodeId, ForestError> {
        let kind = match &node {
            Node::Empty => return Ok(NodeId::EMPTY),
            Node::Branch(_) => NodeKind::Branch,
            Node::Extension(_) => NodeKind::Extension,
            Node::Account(_) => NodeKind::Account,
            Node::Value(_) => NodeKind::Value,
        };
        let index = match kind {
            NodeKind::Branch => self.branches.new_id()?,
            NodeKind::Extension => self.extensions.new_id()?,
            NodeKind::Account => self.accounts.new_id()?,
            NodeKind::Value => self.values.new_id()?,
            NodeKind::Empty => unreachable!(),
        };
        let id = NodeId::new(kind, index);
        self.dirty.lock().expect("dirty set mutex poisoned").insert(id);
        let (_, evicted) = self.cache.put(id, node);
        self.check_eviction(evicted)?;
        Ok(id)
    }

    fn check_eviction(&self, evicted: Option<crate::cache::Eviction>) -> Result<(), ForestError> {
        if let Some(eviction) = evicted {
            if self
                .dirty
                .lock()
                .expect("dirty set mutex poisoned")
                .contains(&eviction.id)
            {
                return Err(ForestError::EvictedUnfrozen(eviction.id));
            }
        }
        Ok(())
    }

    fn load_from_stock(&self, id: NodeId) -> Result<Node, ForestError> {
        match id.kind() {
            NodeKind::Empty => Ok(Node::Empty),
            NodeKind::Branch => Ok(self.branches.get(id.index())?.into()),
            NodeKind::Extension => Ok(self.extensions.get(id.index())?.into()),
            NodeKind::Account => Ok(self.accounts.get(id.index())?.into()),
            NodeKind::Value => Ok(self.values.get(id.index())?.into()),
        }
    }

    /// Materializes a node on demand: cache hit returns directly, a miss
    /// pulls the frozen record from its stock and repopulates the cache.
    pub fn get(&self, id: NodeId) -> Result<Node, ForestError> {
        if id.is_empty() {
            return Ok(Node::Empty);
        }
        let mut reference = NodeReference::new(id);
        if let Some(node) = self.cache.get(&mut reference) {
            return Ok(node);
        }
        let node = self.load_from_stock(id)?;
        let (_, evicted) = self.cache.put(id, node.clone());
        self.check_eviction(evicted)?;
        Ok(node)
    }

    /// Overwrites a dirty node's in-memory contents (write-view mutation).
    /// Only valid for nodes not yet frozen.
    pub fn set(&self, id: NodeId, node: Node) -> Result<(), ForestError> {
        self.dirty.lock().expect("dirty set mutex poisoned").insert(id);
        let (_, evicted) = self.cache.put(id, node);
        self.check_eviction(evicted)
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.lock().expect("dirty set mutex poisoned").contains(&id)
    }

    fn persist(&self, id: NodeId, node: &Node) -> Result<(), ForestError> {
        match (id.kind(), node) {
            (NodeKind::Branch, Node::Branch(b)) => self.branches.set(id.index(), b),
            (NodeKind::Extension, Node::Extension(e)) => self.extensions.set(id.index(), e),
            (NodeKind::Account, Node::Account(a)) => self.accounts.set(id.index(), a),
            (NodeKind::Value, Node::Value(v)) => self.values.set(id.index(), v),
            _ => Err(ForestError::Storage(anyhow::anyhow!(
                "node kind/id mismatch while persisting {id:?}"
            ))),
        }
    }

    /// Recursively hashes and persists every dirty node reachable from
    /// `id`, pruning already-frozen subtrees. Returns the edge-hash to use
    /// for `id` from its parent (embedding-eligible).
    fn freeze_walk(&self, id: NodeId) -> Result<NodeHash, ForestError> {
        if id.is_empty() {
            return Ok(NodeHash::default());
        }
        if !self.is_dirty(id) {
            let node = self.get(id)?;
            return Ok(node.compute_hash());
        }

        let mut node = self.get(id)?;
        match &mut node {
            Node::Branch(b) => {
                for choice in b.choices.iter_mut() {
                    if !choice.is_empty() {
                        choice.hash = Some(self.freeze_walk(choice.id)?);
                    }
                }
            }
            Node::Extension(e) => {
                if !e.child.is_empty() {
                    e.child.hash = Some(self.freeze_walk(e.child.id)?);
                }
            }
            Node::Account(a) => {
                a.storage_hash = self.freeze_walk(a.storage_root)?.force_hash();
            }
            Node::Value(_) => {}
            Node::Empty => unreachable!(),
        }

        let hash = node.compute_hash();
        self.persist(id, &node)?;
        self.cache.put(id, node);
        self.dirty.lock().expect("dirty set mutex poisoned").remove(&id);
        tracing::trace!(?id, "froze node");
        Ok(hash)
    }

    /// Post-order freeze from `root`, returning its real (never embedded)
    /// hash.
    pub fn freeze(&self, root: NodeId) -> Result<H256, ForestError> {
        if root.is_empty() {
            return Ok(*crate::node_hash::EMPTY_TRIE_HASH);
        }
        let hash = self.freeze_walk(root)?.force_hash();
        tracing::debug!(?root, ?hash, "froze root");
        Ok(hash)
    }

    pub fn flush(&self) -> Result<(), ForestError> {
        self.branches.flush()?;
        self.extensions.flush()?;
        self.accounts.flush()?;
        self.values.flush()?;
        Ok(())
    }

    pub fn checkpoint_participants(&self) -> [&dyn crate::checkpoint::CheckpointParticipant; 4] {
        [&self.branches, &self.extensions, &self.accounts, &self.values]
    }

    pub fn for_each_cached(&self, f: impl FnMut(NodeId, &Node)) {
        self.cache.for_each(f)
    }
}
