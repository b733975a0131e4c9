use archivetrie_rlp::RLPDecodeError;
use thiserror::Error;

use crate::node_id::NodeId;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    #[error("stock I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stock metadata (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stock storage error: {0}")]
    Storage(anyhow::Error),
    #[error("stock metadata mismatch: expected kind {expected_kind} record size {expected_size}, got kind {got_kind} record size {got_size}")]
    MetaMismatch {
        expected_kind: u8,
        expected_size: usize,
        got_kind: u8,
        got_size: usize,
    },
    #[error("node {0:?} not found in stock")]
    NodeNotFound(NodeId),
    #[error("attempted to Set id {id} beyond current length {len}")]
    OutOfBounds { id: u64, len: u64 },
    #[error("inconsistent internal tree structure: evicted node {0:?} was not frozen")]
    EvictedUnfrozen(NodeId),
    #[error("hashing requires all outgoing edges to have valid hashes, but child {0:?} is dirty")]
    DirtyChild(NodeId),
    #[error("this stock/forest instance is poisoned by a previous error: {0}")]
    Poisoned(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl Clone for ForestError {
    fn clone(&self) -> Self {
        // Errors are latched into sticky state as their Display text; a
        // clone is only ever needed for that re-wrapping, never for control
        // flow that inspects variants.
        ForestError::Poisoned(self.to_string())
    }
}
