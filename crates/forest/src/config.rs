use serde::{Deserialize, Serialize};

/// Where an edge's child hash is persisted: with the node that owns the
/// edge, or alongside the parent that references it. Both layouts must
/// produce identical Ethereum-compatible root hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashLocation {
    NodeStored,
    ParentStored,
}

impl Default for HashLocation {
    fn default() -> Self {
        HashLocation::ParentStored
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub hash_location: HashLocation,
    pub cache_capacity: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            hash_location: HashLocation::default(),
            cache_capacity: 8192,
        }
    }
}
