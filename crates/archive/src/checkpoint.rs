//! The archive-level Checkpoint Coordinator: drives the two-phase
//! prepare/commit/abort protocol ([`archivetrie_forest::CheckpointParticipant`])
//! across every participant (the forest's four stocks, the code store, and
//! the root list) and durably records which block height each checkpoint
//! number corresponds to, so a restore can be requested by block height.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use archivetrie_forest::CheckpointParticipant;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub number: u64,
    pub block_height: u64,
}

pub struct CheckpointCoordinator {
    dir: PathBuf,
    records: Mutex<Vec<CheckpointRecord>>,
}

impl CheckpointCoordinator {
    pub fn open(dir: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("checkpoints.json");
        let records = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join("checkpoints.json")
    }

    fn store_records(&self, records: &[CheckpointRecord]) -> Result<(), ArchiveError> {
        std::fs::write(self.records_path(), serde_json::to_vec_pretty(records)?)?;
        Ok(())
    }

    pub fn last(&self) -> Option<CheckpointRecord> {
        self.records.lock().expect("checkpoint coordinator mutex poisoned").last().copied()
    }

    pub fn block_height_of(&self, number: u64) -> Option<u64> {
        self.records
            .lock()
            .expect("checkpoint coordinator mutex poisoned")
            .iter()
            .find(|r| r.number == number)
            .map(|r| r.block_height)
    }

    /// Runs prepare on every participant, then commit on every participant.
    /// A prepare failure aborts everything that already prepared. A commit
    /// failure after some participants already committed leaves the archive
    /// poisoned — partial commits across independently-durable participants
    /// can't be rolled back, only surfaced.
    pub fn create_checkpoint(
        &self,
        block_height: u64,
        participants: &[&dyn CheckpointParticipant],
    ) -> Result<u64, ArchiveError> {
        let number = self.last().map(|r| r.number + 1).unwrap_or(1);

        let mut prepared = Vec::with_capacity(participants.len());
        for participant in participants {
            match participant.prepare_checkpoint(number) {
                Ok(()) => prepared.push(*participant),
                Err(err) => {
                    for done in &prepared {
                        let _ = done.abort_checkpoint(number);
                    }
                    return Err(err.into());
                }
            }
        }

        for participant in participants {
            participant
                .commit_checkpoint(number)
                .map_err(ArchiveError::from)?;
        }

        let mut records = self.records.lock().expect("checkpoint coordinator mutex poisoned");
        records.push(CheckpointRecord { number, block_height });
        self.store_records(&records)?;
        tracing::info!(number, block_height, "checkpoint committed");
        Ok(number)
    }

    pub fn restore_checkpoint(
        &self,
        number: u64,
        participants: &[&dyn CheckpointParticipant],
    ) -> Result<(), ArchiveError> {
        for participant in participants {
            participant.restore_checkpoint(number).map_err(ArchiveError::from)?;
        }
        let mut records = self.records.lock().expect("checkpoint coordinator mutex poisoned");
        records.retain(|r| r.number <= number);
        self.store_records(&records)?;
        Ok(())
    }
}
