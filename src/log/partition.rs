//! Per-partition-file state machine and block-aligned I/O (§4.G "state
//! machine per partition file").
//!
//! Grounded on `transaction/wal_manager.rs`'s `OpenOptions`/`File`-based
//! append pattern, generalized from one append-only file to a fixed-size,
//! numbered partition that can later be scavenged.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::log::error::{LogError, LogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Never opened; no file exists yet.
    Virgin,
    /// The one partition currently accepting appends (§4.G: "`Appending` is
    /// unique across the set of partitions").
    Appending,
    /// Fully written; still readable for recovery/compensate.
    Closed,
    /// Past the oldest active LSN; its file has been removed.
    Scavenged,
}

pub struct Partition {
    pub num: u32,
    path: PathBuf,
    state: Mutex<PartitionState>,
    file: Mutex<Option<File>>,
    pub data_size: u64,
}

impl Partition {
    pub fn new(dir: &Path, num: u32, data_size: u64) -> Self {
        Self {
            num,
            path: dir.join(format!("log.{num}")),
            state: Mutex::new(PartitionState::Virgin),
            file: Mutex::new(None),
            data_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PartitionState {
        *self.state.lock()
    }

    /// Transitions `Virgin` or `Closed` to `Appending`, opening (creating if
    /// necessary) the backing file. Rejects from `Scavenged`: a scavenged
    /// partition's bytes are gone.
    pub fn open_for_append(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        if *state == PartitionState::Scavenged {
            return Err(LogError::Internal(format!(
                "cannot reopen scavenged partition {}",
                self.num
            )));
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;
        *self.file.lock() = Some(file);
        *state = PartitionState::Appending;
        Ok(())
    }

    pub fn close(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        if *state != PartitionState::Appending {
            return Err(LogError::Internal(format!(
                "cannot close partition {} from state {:?}",
                self.num, *state
            )));
        }
        if let Some(file) = self.file.lock().as_ref() {
            file.sync_all()?;
        }
        *state = PartitionState::Closed;
        Ok(())
    }

    /// Removes the backing file. Only reachable once the oldest active LSN
    /// has advanced past this partition (§4.G) — the caller is responsible
    /// for checking that before calling.
    pub fn scavenge(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        if *state != PartitionState::Closed {
            return Err(LogError::Internal(format!(
                "cannot scavenge partition {} from state {:?}",
                self.num, *state
            )));
        }
        *self.file.lock() = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        *state = PartitionState::Scavenged;
        Ok(())
    }

    /// Reads the bytes of the partial block containing `offset`, i.e. the
    /// on-disk prefix that must be preserved when a block-aligned write
    /// starts mid-block (§4.G "priming the buffer from the existing file
    /// tail on startup").
    pub fn prime_tail(&self, offset: u64, block_size: u64) -> LogResult<Vec<u8>> {
        let aligned = offset - (offset % block_size);
        let prefix_len = (offset - aligned) as usize;
        if prefix_len == 0 {
            return Ok(Vec::new());
        }
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| LogError::Internal("partition not open".into()))?;
        let mut buf = vec![0u8; prefix_len];
        file.seek(SeekFrom::Start(aligned))?;
        let read = file.read(&mut buf)?;
        buf.truncate(read);
        buf.resize(prefix_len, 0);
        Ok(buf)
    }

    /// Writes `data` starting logically at `offset`, rounding the physical
    /// write down to the containing block boundary using `prefix_pad` (the
    /// bytes `prime_tail` returned for that offset) and padding the tail up
    /// to a block boundary with zeros.
    pub fn write_block_aligned(
        &self,
        offset: u64,
        data: &[u8],
        block_size: u64,
        prefix_pad: &[u8],
    ) -> LogResult<()> {
        let aligned_offset = offset - prefix_pad.len() as u64;
        let mut buf = Vec::with_capacity(prefix_pad.len() + data.len());
        buf.extend_from_slice(prefix_pad);
        buf.extend_from_slice(data);
        let remainder = buf.len() as u64 % block_size;
        if remainder != 0 {
            buf.resize(buf.len() + (block_size - remainder) as usize, 0);
        }
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| LogError::Internal("partition not open".into()))?;
        file.seek(SeekFrom::Start(aligned_offset))?;
        file.write_all(&buf)?;
        Ok(())
    }

    pub fn sync(&self) -> LogResult<()> {
        if let Some(file) = self.file.lock().as_ref() {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| LogError::Internal("partition not open".into()))?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)
            .map_err(|e| LogError::Eof(format!("short read at offset {offset}: {e}")))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_virgin_to_scavenged() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Partition::new(dir.path(), 1, 4096);
        assert_eq!(partition.state(), PartitionState::Virgin);
        partition.open_for_append().unwrap();
        assert_eq!(partition.state(), PartitionState::Appending);
        partition.close().unwrap();
        assert_eq!(partition.state(), PartitionState::Closed);
        partition.scavenge().unwrap();
        assert_eq!(partition.state(), PartitionState::Scavenged);
        assert!(!partition.path().exists());
    }

    #[test]
    fn scavenged_partition_cannot_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Partition::new(dir.path(), 1, 4096);
        partition.open_for_append().unwrap();
        partition.close().unwrap();
        partition.scavenge().unwrap();
        assert!(partition.open_for_append().is_err());
    }

    #[test]
    fn block_aligned_write_preserves_primed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Partition::new(dir.path(), 1, 4096);
        partition.open_for_append().unwrap();
        partition.write_block_aligned(0, b"ABCD", 8, &[]).unwrap();

        let prefix = partition.prime_tail(4, 8).unwrap();
        assert_eq!(prefix, b"ABCD");
        partition.write_block_aligned(4, b"EFGH", 8, &prefix).unwrap();

        let read_back = partition.read_at(0, 8).unwrap();
        assert_eq!(&read_back, b"ABCDEFGH");
    }
}
