//! A [`Stock<T>`] is a persistent indexed container for fixed-size records
//! of one node kind: a dense value file plus a free list for id reuse.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ForestError;
use crate::node_id::NodeId;

/// A type that can be packed into a fixed-size record for a [`Stock`].
pub trait StockRecord: Sized + Clone {
    const RECORD_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Result<Self, ForestError>;
    fn default_record() -> Self;
}

#[derive(Serialize, Deserialize)]
struct StockMeta {
    kind_tag: u8,
    record_size: usize,
    len: u64,
}

struct StockInner {
    values: File,
    freelist: Vec<u64>,
    len: u64,
    poisoned: Option<String>,
}

pub struct Stock<T: StockRecord> {
    dir: PathBuf,
    kind_tag: u8,
    inner: Mutex<StockInner>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: StockRecord> Stock<T> {
    pub fn create(dir: &Path, kind_tag: u8) -> Result<Self, ForestError> {
        std::fs::create_dir_all(dir)?;
        let meta = StockMeta {
            kind_tag,
            record_size: T::RECORD_SIZE,
            len: 0,
        };
        std::fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&meta)?)?;
        let values = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.join("values.dat"))?;
        write_freelist(dir, &[])?;
        Ok(Self {
            dir: dir.to_path_buf(),
            kind_tag,
            inner: Mutex::new(StockInner {
                values,
                freelist: Vec::new(),
                len: 0,
                poisoned: None,
            }),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn open(dir: &Path, kind_tag: u8) -> Result<Self, ForestError> {
        let meta_bytes = std::fs::read(dir.join("meta.json"))?;
        let meta: StockMeta = serde_json::from_slice(&meta_bytes)?;
        if meta.kind_tag != kind_tag || meta.record_size != T::RECORD_SIZE {
            return Err(ForestError::MetaMismatch {
                expected_kind: kind_tag,
                expected_size: T::RECORD_SIZE,
                got_kind: meta.kind_tag,
                got_size: meta.record_size,
            });
        }
        let values = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join("values.dat"))?;
        let freelist = read_freelist(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            kind_tag,
            inner: Mutex::new(StockInner {
                values,
                freelist,
                len: meta.len,
                poisoned: None,
            }),
            _marker: std::marker::PhantomData,
        })
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut StockInner) -> Result<R, ForestError>) -> Result<R, ForestError> {
        let mut guard = self.inner.lock().expect("stock mutex poisoned by a panic");
        if let Some(msg) = &guard.poisoned {
            return Err(ForestError::Poisoned(msg.clone()));
        }
        let result = f(&mut guard);
        if let Err(err) = &result {
            tracing::error!(kind_tag = self.kind_tag, error = %err, "stock operation failed, poisoning stock");
            guard.poisoned = Some(err.to_string());
        }
        result
    }

    /// Returns a fresh id: reused from the free list if one is available,
    /// otherwise the next append slot. Does not write a record.
    pub fn new_id(&self) -> Result<u64, ForestError> {
        self.with_inner(|inner| {
            if let Some(id) = inner.freelist.pop() {
                Ok(id)
            } else {
                let id = inner.len;
                inner.len += 1;
                Ok(id)
            }
        })
    }

    pub fn set(&self, id: u64, record: &T) -> Result<(), ForestError> {
        self.with_inner(|inner| {
            if id >= inner.len {
                return Err(ForestError::OutOfBounds { id, len: inner.len });
            }
            let mut buf = vec![0u8; T::RECORD_SIZE];
            record.encode(&mut buf);
            inner
                .values
                .seek(SeekFrom::Start(id * T::RECORD_SIZE as u64))?;
            inner.values.write_all(&buf)?;
            Ok(())
        })
    }

    pub fn get(&self, id: u64) -> Result<T, ForestError> {
        self.with_inner(|inner| {
            if id >= inner.len {
                return Err(ForestError::OutOfBounds { id, len: inner.len });
            }
            let mut buf = vec![0u8; T::RECORD_SIZE];
            inner
                .values
                .seek(SeekFrom::Start(id * T::RECORD_SIZE as u64))?;
            inner.values.read_exact(&mut buf)?;
            T::decode(&buf)
        })
    }

    pub fn delete(&self, id: u64) -> Result<(), ForestError> {
        self.with_inner(|inner| {
            inner.freelist.push(id);
            Ok(())
        })
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().expect("stock mutex poisoned by a panic").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> Result<(), ForestError> {
        self.with_inner(|inner| {
            inner.values.flush()?;
            write_freelist(&self.dir, &inner.freelist)?;
            let meta = StockMeta {
                kind_tag: self.kind_tag,
                record_size: T::RECORD_SIZE,
                len: inner.len,
            };
            std::fs::write(self.dir.join("meta.json"), serde_json::to_vec_pretty(&meta)?)?;
            Ok(())
        })
    }
}

fn write_freelist(dir: &Path, ids: &[u64]) -> Result<(), ForestError> {
    let mut buf = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    std::fs::write(dir.join("freelist.dat"), buf)?;
    Ok(())
}

fn read_freelist(dir: &Path) -> Result<Vec<u64>, ForestError> {
    let path = dir.join("freelist.dat");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(ForestError::Storage(anyhow::anyhow!(
            "freelist.dat has a length not a multiple of 8"
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Checkpoint participation: each stock keeps its own
/// `checkpoint/{committed,prepared}.json` recording the value-file length at
/// the checkpoint boundary, so `restore` can truncate back to it.
#[derive(Serialize, Deserialize)]
struct StockCheckpointRecord {
    number: u64,
    len: u64,
}

impl<T: StockRecord> Stock<T> {
    fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoint")
    }

    pub fn prepare_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        std::fs::create_dir_all(&dir)?;
        let len = self.len();
        let record = StockCheckpointRecord { number, len };
        std::fs::write(dir.join("prepared.json"), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    pub fn commit_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let dir = self.checkpoint_dir();
        let prepared_path = dir.join("prepared.json");
        let bytes = std::fs::read(&prepared_path)?;
        let record: StockCheckpointRecord = serde_json::from_slice(&bytes)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "prepared checkpoint {} does not match commit request {number}",
                record.number
            )));
        }
        std::fs::rename(&prepared_path, dir.join("committed.json"))?;
        Ok(())
    }

    pub fn abort_checkpoint(&self, _number: u64) -> Result<(), ForestError> {
        let prepared = self.checkpoint_dir().join("prepared.json");
        if prepared.exists() {
            std::fs::remove_file(prepared)?;
        }
        Ok(())
    }

    pub fn committed_checkpoint(&self) -> Result<Option<u64>, ForestError> {
        let path = self.checkpoint_dir().join("committed.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let record: StockCheckpointRecord = serde_json::from_slice(&bytes)?;
        Ok(Some(record.number))
    }

    /// Truncates the value file and free list to the state recorded at
    /// checkpoint `number`, rebuilding the free list as "everything beyond
    /// the checkpointed length is gone".
    pub fn restore_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        let path = self.checkpoint_dir().join("committed.json");
        let bytes = std::fs::read(path)?;
        let record: StockCheckpointRecord = serde_json::from_slice(&bytes)?;
        if record.number != number {
            return Err(ForestError::Checkpoint(format!(
                "committed checkpoint {} does not match restore target {number}",
                record.number
            )));
        }
        self.with_inner(|inner| {
            inner.values.set_len(record.len * T::RECORD_SIZE as u64)?;
            inner.len = record.len;
            inner.freelist.retain(|&id| id < record.len);
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Tiny(u64);

    impl StockRecord for Tiny {
        const RECORD_SIZE: usize = 8;

        fn encode(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0.to_le_bytes());
        }

        fn decode(buf: &[u8]) -> Result<Self, ForestError> {
            Ok(Tiny(u64::from_le_bytes(buf.try_into().unwrap())))
        }

        fn default_record() -> Self {
            Tiny(0)
        }
    }

    #[test]
    fn new_id_reuses_freelist_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let stock = Stock::<Tiny>::create(dir.path(), 1).unwrap();
        let a = stock.new_id().unwrap();
        stock.set(a, &Tiny(111)).unwrap();
        stock.delete(a).unwrap();
        let b = stock.new_id().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stock = Stock::<Tiny>::create(dir.path(), 1).unwrap();
        let id = stock.new_id().unwrap();
        stock.set(id, &Tiny(42)).unwrap();
        assert_eq!(stock.get(id).unwrap(), Tiny(42));
    }

    #[test]
    fn set_beyond_len_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let stock = Stock::<Tiny>::create(dir.path(), 1).unwrap();
        assert!(stock.set(5, &Tiny(1)).is_err());
    }

    #[test]
    fn reopen_verifies_meta() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stock = Stock::<Tiny>::create(dir.path(), 7).unwrap();
            let id = stock.new_id().unwrap();
            stock.set(id, &Tiny(9)).unwrap();
            stock.flush().unwrap();
        }
        let reopened = Stock::<Tiny>::open(dir.path(), 7).unwrap();
        assert_eq!(reopened.get(0).unwrap(), Tiny(9));
        assert!(Stock::<Tiny>::open(dir.path(), 8).is_err());
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stock = Stock::<Tiny>::create(dir.path(), 1).unwrap();
        let a = stock.new_id().unwrap();
        stock.set(a, &Tiny(1)).unwrap();
        stock.prepare_checkpoint(1).unwrap();
        stock.commit_checkpoint(1).unwrap();

        let b = stock.new_id().unwrap();
        stock.set(b, &Tiny(2)).unwrap();

        stock.restore_checkpoint(1).unwrap();
        assert_eq!(stock.len(), 1);
    }
}
