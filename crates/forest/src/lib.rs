//! Components A–C of the archive engine: node identity and hashing, the
//! RLP node codec, the on-disk node stocks, the bounded node cache, and the
//! `Forest` that ties them together behind a single hash/freeze policy.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod forest;
pub mod nibbles;
pub mod node;
pub mod node_hash;
pub mod node_id;
pub mod record;
pub mod stock;

pub use cache::{Eviction, NodeCache};
pub use checkpoint::CheckpointParticipant;
pub use config::{ForestConfig, HashLocation};
pub use error::ForestError;
pub use forest::Forest;
pub use nibbles::Nibbles;
pub use node::{AccountInfo, AccountNode, BranchNode, ChildRef, ExtensionNode, Node, ValueNode};
pub use node_hash::{NodeHash, EMPTY_TRIE_HASH};
pub use node_id::{NodeId, NodeKind, NodeReference};
pub use stock::{Stock, StockRecord};
