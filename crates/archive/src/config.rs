use archivetrie_forest::ForestConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub name: String,
    pub forest: ForestConfig,
    /// 0 disables automatic checkpointing; otherwise a checkpoint is taken
    /// once `block / checkpoint_interval` advances past the last one taken.
    pub checkpoint_interval: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            name: "archivetrie".to_string(),
            forest: ForestConfig::default(),
            checkpoint_interval: 0,
        }
    }
}

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct ArchiveMeta {
    pub name: String,
    pub version: u32,
}

impl ArchiveMeta {
    pub fn for_config(config: &ArchiveConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: FORMAT_VERSION,
        }
    }
}
