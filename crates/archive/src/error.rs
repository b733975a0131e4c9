use archivetrie_forest::ForestError;
use ethereum_types::H256;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error(transparent)]
    Forest(#[from] ForestError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Json(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("block {requested} is out of range (have 0..{height})")]
    BlockOutOfRange { requested: u64, height: u64 },

    #[error("block {block} already has a root (last block is {last})")]
    DuplicateBlock { block: u64, last: u64 },

    #[error("invalid diff range: {0}")]
    InvalidRange(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("witness proof incomplete: node with hash {0:?} absent from the proof set")]
    ProofIncomplete(H256),

    #[error("malformed witness proof: {0}")]
    MalformedProof(String),

    #[error("directory already open: {0}")]
    AlreadyOpen(String),

    #[error("archive is poisoned by a prior error: {0}")]
    Poisoned(String),

    #[error("restore target {target} is beyond the last checkpointed block {last_checkpoint}")]
    RestoreBeyondCheckpoint { target: u64, last_checkpoint: u64 },
}

impl ArchiveError {
    /// Whether this error latches into the archive's sticky poisoned state
    /// (I/O and integrity failures) versus being purely local to the call
    /// that raised it (input errors, not-supported, cancellation).
    pub fn is_poisoning(&self) -> bool {
        !matches!(
            self,
            ArchiveError::BlockOutOfRange { .. }
                | ArchiveError::DuplicateBlock { .. }
                | ArchiveError::InvalidRange(_)
                | ArchiveError::NotSupported(_)
                | ArchiveError::Cancelled
                | ArchiveError::ProofIncomplete(_)
                | ArchiveError::MalformedProof(_)
                | ArchiveError::AlreadyOpen(_)
                | ArchiveError::Poisoned(_)
                | ArchiveError::RestoreBeyondCheckpoint { .. }
        )
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Json(err.to_string())
    }
}
