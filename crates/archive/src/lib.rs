//! Components D–H of the archive engine: the mutable live head, the
//! append-only root list, the code blob catalog, the archive controller
//! tying them to a directory lock and a checkpoint coordinator, and witness
//! proof construction/verification.

pub mod archive;
pub mod checkpoint;
pub mod code_store;
pub mod config;
pub mod dir_lock;
pub mod error;
pub mod live_head;
pub mod root_list;
pub mod trie_ops;
pub mod witness;

pub use archive::{AccountDiff, Archive, Update};
pub use checkpoint::{CheckpointCoordinator, CheckpointRecord};
pub use code_store::CodeStore;
pub use config::ArchiveConfig;
pub use dir_lock::{DirLock, DirtySentinel};
pub use error::ArchiveError;
pub use live_head::LiveHead;
pub use root_list::{RootEntry, RootList};
pub use witness::{StatelessView, WitnessProof};
