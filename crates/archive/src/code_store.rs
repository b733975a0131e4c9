//! The code blob catalog: `codes.dat` holds length-prefixed
//! `(codeHash: 32B, len: u32, bytes)` records. The code store itself is
//! treated as an external key-value store by the rest of the archive; this
//! crate only needs to persist it and have it participate in checkpoints.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use archivetrie_crypto::keccak_hash;
use archivetrie_forest::{CheckpointParticipant, ForestError};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

lazy_static::lazy_static! {
    /// `Keccak256(b"")`, the code hash of an externally-owned account (one
    /// with no contract code installed).
    pub static ref EMPTY_CODE_HASH: H256 = keccak_hash([]);
}

struct Inner {
    file: File,
    index: HashMap<H256, (u64, u32)>,
    len_bytes: u64,
}

pub struct CodeStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Serialize, Deserialize)]
struct CodeCheckpointRecord {
    number: u64,
    len_bytes: u64,
}

impl CodeStore {
    pub fn open(dir: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("codes.dat");
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut index = HashMap::new();
        let mut offset = 0u64;
        let mut cursor = 0usize;
        while cursor + 36 <= bytes.len() {
            let hash = H256::from_slice(&bytes[cursor..cursor + 32]);
            let len = u32::from_le_bytes(bytes[cursor + 32..cursor + 36].try_into().unwrap());
            let body_start = cursor + 36;
            let body_end = body_start + len as usize;
            if body_end > bytes.len() {
                break;
            }
            index.insert(hash, (offset, len));
            offset += 36 + len as u64;
            cursor = body_end;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(Inner {
                file,
                index,
                len_bytes: offset,
            }),
        })
    }

    /// Stores `code`, keyed by its Keccak256 hash; a no-op if already present.
    pub fn put(&self, code: &[u8]) -> Result<H256, ArchiveError> {
        let hash = keccak_hash(code);
        let mut inner = self.inner.lock().expect("code store mutex poisoned");
        if inner.index.contains_key(&hash) {
            return Ok(hash);
        }
        let offset = inner.len_bytes;
        let mut record = Vec::with_capacity(36 + code.len());
        record.extend_from_slice(hash.as_bytes());
        record.extend_from_slice(&(code.len() as u32).to_le_bytes());
        record.extend_from_slice(code);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&record)?;
        inner.file.flush()?;
        inner.index.insert(hash, (offset, code.len() as u32));
        inner.len_bytes += record.len() as u64;
        Ok(hash)
    }

    pub fn get(&self, hash: H256) -> Result<Option<Vec<u8>>, ArchiveError> {
        let mut inner = self.inner.lock().expect("code store mutex poisoned");
        let Some(&(offset, len)) = inner.index.get(&hash) else {
            return Ok(None);
        };
        let mut buf = vec![0u8; len as usize];
        inner.file.seek(SeekFrom::Start(offset + 36))?;
        inner.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoint")
    }
}

impl CheckpointParticipant for CodeStore {
    fn prepare_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        std::fs::create_dir_all(&dir).map_err(ForestError::from)?;
        let len_bytes = self.inner.lock().expect("code store mutex poisoned").len_bytes;
        let record = CodeCheckpointRecord { number, len_bytes };
        let bytes = serde_json::to_vec(&record).map_err(ForestError::from)?;
        std::fs::write(dir.join("prepared.json"), bytes).map_err(ForestError::from)?;
        Ok(())
    }

    fn commit_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        let prepared_path = dir.join("prepared.json");
        let bytes = std::fs::read(&prepared_path).map_err(ForestError::from)?;
        let record: CodeCheckpointRecord = serde_json::from_slice(&bytes).map_err(ForestError::from)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "code store prepared checkpoint {} does not match commit request {number}",
                record.number
            )));
        }
        std::fs::rename(&prepared_path, dir.join("committed.json")).map_err(ForestError::from)?;
        Ok(())
    }

    fn abort_checkpoint(&self, _number: u64) -> Result<(), ForestError> {
        let prepared = self.checkpoint_dir().join("prepared.json");
        if prepared.exists() {
            std::fs::remove_file(prepared).map_err(ForestError::from)?;
        }
        Ok(())
    }

    fn restore_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let path = self.checkpoint_dir().join("committed.json");
        let bytes = std::fs::read(path).map_err(ForestError::from)?;
        let record: CodeCheckpointRecord = serde_json::from_slice(&bytes).map_err(ForestError::from)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "code store committed checkpoint {} does not match restore target {number}",
                record.number
            )));
        }
        // Append-only and keyed by content hash: truncating past a
        // checkpoint boundary would only discard code that is still valid
        // (codes are never superseded), so restore is a no-op beyond
        // verifying the checkpoint record exists.
        Ok(())
    }
}
