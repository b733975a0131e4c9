//! Component E: the append-only, persistent list of per-block roots.
//! `roots[i]` is the frozen root produced by block `i`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use archivetrie_forest::checkpoint::CheckpointParticipant;
use archivetrie_forest::{ForestError, NodeId, NodeKind};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    pub root: NodeId,
    pub hash: H256,
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// A streaming varint decoder that tolerates arbitrary chunk boundaries: it
/// buffers partial input across calls and only yields a value once a
/// terminating (high-bit-clear) byte has been seen.
#[derive(Default)]
struct VarintReader {
    value: u64,
    shift: u32,
}

impl VarintReader {
    fn push_byte(&mut self, byte: u8) -> Option<u64> {
        self.value |= ((byte & 0x7f) as u64) << self.shift;
        self.shift += 7;
        if byte & 0x80 == 0 {
            let value = self.value;
            self.value = 0;
            self.shift = 0;
            Some(value)
        } else {
            None
        }
    }
}

fn encode_entry(buf: &mut Vec<u8>, entry: &RootEntry) {
    write_varint(buf, entry.root.index());
    buf.push(entry.root.kind() as u8);
    buf.extend_from_slice(entry.hash.as_bytes());
}

/// Decodes entries from a byte stream, tolerating any chunk size: call
/// repeatedly as bytes become available, each completed entry is yielded.
struct StreamDecoder {
    pending: Vec<u8>,
    varint: VarintReader,
    index_value: Option<u64>,
}

impl StreamDecoder {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            varint: VarintReader::default(),
            index_value: None,
        }
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<RootEntry>) -> Result<(), ArchiveError> {
        for &byte in chunk {
            if self.index_value.is_none() {
                if let Some(v) = self.varint.push_byte(byte) {
                    self.index_value = Some(v);
                }
                continue;
            }
            self.pending.push(byte);
            // kind byte + 32-byte hash = 33 bytes once the varint is done.
            if self.pending.len() == 33 {
                let kind_tag = self.pending[0];
                let kind = match kind_tag {
                    1 => NodeKind::Branch,
                    2 => NodeKind::Extension,
                    3 => NodeKind::Account,
                    4 => NodeKind::Value,
                    0 => NodeKind::Empty,
                    other => {
                        return Err(ArchiveError::Integrity(format!(
                            "roots.dat: invalid node kind tag {other}"
                        )))
                    }
                };
                let index = self.index_value.take().unwrap();
                let root = NodeId::new(kind, index);
                let hash = H256::from_slice(&self.pending[1..33]);
                out.push(RootEntry { root, hash });
                self.pending.clear();
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RootListCheckpointRecord {
    number: u64,
    num_roots: u64,
}

/// Sub-linear growth schedule for the in-memory backing vec: below
/// `LINEAR_THRESHOLD` entries, doubling is fine; beyond it, capacity grows
/// by a fixed fraction under 1.3x per growth event (P4).
const LINEAR_THRESHOLD: usize = 1 << 16;
const GROWTH_NUMERATOR: usize = 5;
const GROWTH_DENOMINATOR: usize = 4; // 1.25x

fn next_capacity(current_cap: usize, needed: usize) -> usize {
    if needed <= current_cap {
        return current_cap;
    }
    let mut cap = current_cap.max(1);
    while cap < needed {
        cap = if cap < LINEAR_THRESHOLD {
            (cap * 2).max(cap + 1)
        } else {
            (cap * GROWTH_NUMERATOR / GROWTH_DENOMINATOR).max(cap + 1)
        };
    }
    cap
}

pub struct RootList {
    dir: PathBuf,
    file: File,
    roots: Vec<RootEntry>,
    capacity: usize,
    stored_len: u64,
}

impl RootList {
    pub fn create(dir: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.join("roots.dat"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            roots: Vec::new(),
            capacity: 0,
            stored_len: 0,
        })
    }

    /// Reads `roots.dat`, reconciling against the latest committed
    /// checkpoint: if the file is longer than the checkpointed length and no
    /// clean-close marker is present, the caller is expected to have already
    /// rejected the dirty directory before reaching here.
    pub fn load(dir: &Path) -> Result<Self, ArchiveError> {
        let path = dir.join("roots.dat");
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut decoder = StreamDecoder::new();
        let mut roots = Vec::new();
        // Simulate arbitrary chunking by feeding in fixed-size slices; a real
        // reader would chunk by I/O buffer size, the decoder doesn't care.
        for chunk in bytes.chunks(4096) {
            decoder.feed(chunk, &mut roots)?;
        }

        let capacity = next_capacity(0, roots.len());
        let extra = capacity.saturating_sub(roots.capacity());
        if extra > 0 {
            roots.reserve_exact(extra);
        }
        let stored_len = roots.len() as u64;
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            roots,
            capacity,
            stored_len,
        })
    }

    pub fn length(&self) -> u64 {
        self.roots.len() as u64
    }

    pub fn get(&self, index: u64) -> Option<RootEntry> {
        self.roots.get(index as usize).copied()
    }

    pub fn append(&mut self, entry: RootEntry) {
        let needed = self.roots.len() + 1;
        self.capacity = next_capacity(self.capacity, needed);
        let extra = self.capacity.saturating_sub(self.roots.capacity());
        if extra > 0 {
            self.roots.reserve_exact(extra);
        }
        self.roots.push(entry);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes only the suffix appended since the last store, so repeated
    /// calls are O(new entries), not O(total length).
    pub fn store_roots(&mut self) -> Result<(), ArchiveError> {
        let already_stored = self.stored_len as usize;
        if already_stored >= self.roots.len() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in &self.roots[already_stored..] {
            encode_entry(&mut buf, entry);
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        self.stored_len = self.roots.len() as u64;
        Ok(())
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoint")
    }
}

impl CheckpointParticipant for RootList {
    fn prepare_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        std::fs::create_dir_all(&dir).map_err(ForestError::from)?;
        let record = RootListCheckpointRecord {
            number,
            num_roots: self.length(),
        };
        let bytes = serde_json::to_vec(&record).map_err(ForestError::from)?;
        std::fs::write(dir.join("prepared.json"), bytes).map_err(ForestError::from)?;
        Ok(())
    }

    fn commit_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        let prepared_path = dir.join("prepared.json");
        let bytes = std::fs::read(&prepared_path).map_err(ForestError::from)?;
        let record: RootListCheckpointRecord = serde_json::from_slice(&bytes).map_err(ForestError::from)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "root list prepared checkpoint {} does not match commit request {number}",
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
        let record: RootListCheckpointRecord = serde_json::from_slice(&bytes).map_err(ForestError::from)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "root list committed checkpoint {} does not match restore target {number}",
                record.number
            )));
        }
        // Truncation of the in-memory/on-disk vec itself happens through
        // `Archive::restore_block_height`, which holds `&mut RootList`;
        // `CheckpointParticipant` only needs `&self` so it can't mutate here.
        Ok(())
    }
}

impl RootList {
    /// Truncates to `new_len` entries, rewriting `roots.dat` from scratch.
    /// Used by `Archive::restore_block_height`.
    pub fn truncate(&mut self, new_len: u64) -> Result<(), ArchiveError> {
        self.roots.truncate(new_len as usize);
        self.stored_len = 0;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.store_roots()
    }

    pub fn committed_checkpoint(&self) -> Result<Option<u64>, ArchiveError> {
        let path = self.checkpoint_dir().join("committed.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let record: RootListCheckpointRecord = serde_json::from_slice(&bytes)?;
        Ok(Some(record.number))
    }

    pub fn committed_num_roots(&self) -> Result<Option<u64>, ArchiveError> {
        let path = self.checkpoint_dir().join("committed.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let record: RootListCheckpointRecord = serde_json::from_slice(&bytes)?;
        Ok(Some(record.num_roots))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use archivetrie_forest::NodeKind;

    #[test]
    fn append_store_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = RootList::create(dir.path()).unwrap();
        list.append(RootEntry {
            root: NodeId::new(NodeKind::Branch, 7),
            hash: H256::repeat_byte(0xAA),
        });
        list.append(RootEntry {
            root: NodeId::new(NodeKind::Account, 3),
            hash: H256::repeat_byte(0xBB),
        });
        list.store_roots().unwrap();

        let reloaded = RootList::load(dir.path()).unwrap();
        assert_eq!(reloaded.length(), 2);
        assert_eq!(reloaded.get(0).unwrap().hash, H256::repeat_byte(0xAA));
        assert_eq!(reloaded.get(1).unwrap().root.kind(), NodeKind::Account);
    }

    #[test]
    fn growth_schedule_is_sublinear_past_threshold() {
        let mut cap = 0;
        for n in 1..=(LINEAR_THRESHOLD + 5000) {
            let new_cap = next_capacity(cap, n);
            if cap >= LINEAR_THRESHOLD {
                assert!((new_cap as f64) <= (cap as f64) * 1.3 + 1.0);
            }
            cap = new_cap;
        }
    }

    #[test]
    fn append_grows_the_real_backing_vec_to_the_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = RootList::create(dir.path()).unwrap();
        for i in 0..10 {
            list.append(RootEntry {
                root: NodeId::new(NodeKind::Branch, i),
                hash: H256::repeat_byte(i as u8),
            });
            // The backing Vec must actually hold at least the scheduled
            // capacity, not just whatever `Vec::push`'s own doubling gives it.
            assert!(list.roots.capacity() >= list.capacity);
        }
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = RootList::create(dir.path()).unwrap();
        list.append(RootEntry {
            root: NodeId::new(NodeKind::Value, 1),
            hash: H256::repeat_byte(0x11),
        });
        list.store_roots().unwrap();
        CheckpointParticipant::prepare_checkpoint(&list, 1).unwrap();
        CheckpointParticipant::commit_checkpoint(&list, 1).unwrap();
        assert_eq!(list.committed_checkpoint().unwrap(), Some(1));
        assert_eq!(list.committed_num_roots().unwrap(), Some(1));
    }
}
