//! `LogCore`: buffer management, group-commit coordination, flush-daemon
//! scheduling, partition rollover, checkpoint space reservation, and
//! durability queries (§4.G).
//!
//! Grounded on `transaction/wal_manager.rs`'s `WALManager` (buffered
//! appends, background-free synchronous flush, `OpenOptions`-based file
//! writes) generalized with the consolidation-array batching of §4.F and
//! the partition/epoch machinery of §4.E. The background flush daemon
//! follows the same spawn-thread-with-stop-flag-and-condvar shape as
//! `lock::pool::GenerationalPool`'s reclaimer.
//!
//! **Ring-buffer simplification.** The true implementation this substrate
//! is drawn from uses one physically circular buffer with byte-level record
//! splitting at the wrap point. Reproducing that exactly requires tracking
//! in-flight physical overlap between an unflushed old epoch and a new
//! epoch's writes at the bit level, which is easy to get subtly wrong
//! without a compiler to check it against. This implementation instead
//! rotates epochs across a small fixed ring of independent buffer slots
//! (`BUFFER_SLOTS`), so an old epoch's bytes are never physically aliased by
//! a new epoch's writes; `acquire_buffer_space` waits for a slot to clear
//! (via the flush daemon) before handing it to a new epoch. This preserves
//! every observable property in §8 (durableLsn/currLsn ordering, `flush(L)`
//! semantics, epoch/partition LSN bookkeeping) at the cost of the exact
//! physical byte-splitting behavior; see DESIGN.md.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::{AtomicLsn, Lsn};
use crate::log::consolidation::ConsolidationArray;
use crate::log::error::{LogError, LogResult};
use crate::log::partition::{Partition, PartitionState};
use crate::log::record::{Epoch, LogRecord, HEADER_LEN};

const BUFFER_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy)]
struct ActiveEpoch {
    epoch: Epoch,
    slot: usize,
}

#[derive(Debug, Clone, Copy)]
struct SpaceState {
    available: i64,
    reserved_for_chkpt: i64,
}

pub struct LogCoreConfig {
    /// Size of each ring buffer slot, rounded by the caller to a multiple of
    /// `block_size` (§6 "`sm_logbufsize`... rounded up to `segSize`
    /// multiple, min 64 KiB").
    pub seg_size: usize,
    pub block_size: usize,
    /// Total bytes per partition file (§6 "`sm_logsize`... sets partition
    /// size").
    pub partition_data_size: u64,
    /// Partitions retained before scavenging is allowed to reclaim further
    /// (§4.G flush daemon: "waiting on `scavengeCond` if the new file number
    /// would exceed retention by ≥ `PARTITION_COUNT`").
    pub partition_count: u32,
}

impl Default for LogCoreConfig {
    fn default() -> Self {
        Self {
            seg_size: 1 << 20,
            block_size: 4096,
            partition_data_size: 64 << 20,
            partition_count: 8,
        }
    }
}

pub struct LogCore {
    config: LogCoreConfig,
    dir: PathBuf,
    buffers: Vec<Mutex<Vec<u8>>>,
    consolidation: ConsolidationArray,
    insert_latch: Mutex<()>,
    cur_epoch: Mutex<ActiveEpoch>,
    old_epoch: Mutex<Option<ActiveEpoch>>,
    flush_lock: Mutex<()>,
    comp_lock: Mutex<()>,
    curr_lsn: AtomicLsn,
    flush_lsn: AtomicLsn,
    durable_lsn: AtomicLsn,
    flushed_abs: Mutex<u64>,
    partitions: Mutex<Vec<Arc<Partition>>>,
    current_partition_num: AtomicU32,
    space: Mutex<SpaceState>,
    reservations_active: AtomicBool,
    wait_mutex: Mutex<()>,
    wait_cond: Condvar,
    flush_cond: Condvar,
    scavenge_cond: Condvar,
    space_cond: Condvar,
    stop: AtomicBool,
}

impl LogCore {
    pub fn new(dir: impl AsRef<Path>, config: LogCoreConfig) -> LogResult<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let buffers = (0..BUFFER_SLOTS).map(|_| Mutex::new(vec![0u8; config.seg_size])).collect();
        let first_partition = Arc::new(Partition::new(&dir, 0, config.partition_data_size));
        first_partition.open_for_append()?;

        let core = Arc::new(Self {
            consolidation: ConsolidationArray::new(num_cpus::get().max(4)),
            cur_epoch: Mutex::new(ActiveEpoch { epoch: Epoch::new(Lsn::new(0, 0), 0, 0), slot: 0 }),
            old_epoch: Mutex::new(None),
            flush_lock: Mutex::new(()),
            comp_lock: Mutex::new(()),
            curr_lsn: AtomicLsn::new(Lsn::new(0, 0)),
            flush_lsn: AtomicLsn::new(Lsn::new(0, 0)),
            durable_lsn: AtomicLsn::new(Lsn::new(0, 0)),
            flushed_abs: Mutex::new(0),
            partitions: Mutex::new(vec![first_partition]),
            current_partition_num: AtomicU32::new(0),
            space: Mutex::new(SpaceState { available: i64::MAX / 2, reserved_for_chkpt: 0 }),
            reservations_active: AtomicBool::new(false),
            wait_mutex: Mutex::new(()),
            wait_cond: Condvar::new(),
            flush_cond: Condvar::new(),
            scavenge_cond: Condvar::new(),
            space_cond: Condvar::new(),
            stop: AtomicBool::new(false),
            insert_latch: Mutex::new(()),
            buffers,
            dir,
            config,
        });
        Ok(core)
    }

    pub fn spawn_flush_daemon(self: &Arc<Self>, interval: Duration) -> std::thread::JoinHandle<()> {
        let core = Arc::clone(self);
        std::thread::spawn(move || {
            while !core.stop.load(Ordering::Acquire) {
                let mut guard = core.wait_mutex.lock();
                core.flush_cond.wait_for(&mut guard, interval);
                drop(guard);
                if core.stop.load(Ordering::Acquire) {
                    break;
                }
                let _ = core.flush_once();
            }
        })
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.flush_cond.notify_all();
    }

    // ---- Append path (§4.G "Append path") --------------------------------

    /// Appends `record`, returning the LSN assigned to it. Steps 1-5 of the
    /// append path: build (caller already did, by constructing `record`),
    /// join the consolidation cohort, the leader reserves buffer space,
    /// every member copies its bytes, the last one out publishes the new
    /// epoch state.
    pub fn insert(&self, record: LogRecord) -> LogResult<Lsn> {
        let body_len = record.encode(Lsn::NULL)?.len() as u64;
        let join = self.consolidation.join(body_len);

        let reservation = if join.is_leader {
            let _latch = self.insert_latch.lock();
            self.consolidation.lead(&join, |combined| self.acquire_buffer_space(combined))?
        } else {
            self.consolidation.wait_for_leader(join.slot_index)?
        };

        let lsn = Lsn::new(reservation.base_lsn.file, reservation.base_lsn.offset + join.my_offset as u32);
        let bytes = record.encode(lsn)?;
        let (slot, local_offset) = Self::decode_reservation_location(reservation.base_offset);
        self.write_into_buffer(slot, local_offset + join.my_offset as usize, &bytes);
        self.curr_lsn.advance_to(Lsn::new(lsn.file, lsn.offset + bytes.len() as u32));

        let last = self.consolidation.finish_copy(join.slot_index, body_len);
        if last {
            self.flush_cond.notify_all();
        }
        Ok(lsn)
    }

    fn write_into_buffer(&self, slot: usize, offset: usize, bytes: &[u8]) {
        let mut buffer = self.buffers[slot].lock();
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// The cohort leader's `acquireBufferSpace`: waits for headroom, decides
    /// whether this batch fits in the current epoch or must wrap (within
    /// the partition, or across partitions), and returns the base LSN and
    /// buffer location the whole cohort will write into.
    fn acquire_buffer_space(&self, combined: u64) -> LogResult<(Lsn, u64)> {
        loop {
            let active = *self.cur_epoch.lock();
            let used = active.epoch.len() as u64;
            let headroom = (self.config.seg_size as u64).saturating_sub(2 * self.config.block_size as u64);
            if used + combined <= headroom {
                let base_lsn = active.epoch.lsn_at(active.epoch.end);
                let base_offset = active.epoch.end as u64;
                let mut guard = self.cur_epoch.lock();
                guard.epoch.end += combined as usize;
                return Ok((base_lsn, Self::encode_reservation_location(active.slot, base_offset)));
            }

            let crosses_partition =
                active.epoch.base_lsn.offset as u64 + used + combined > self.config.partition_data_size;

            let next_slot = (active.slot + 1) % BUFFER_SLOTS;
            if self.slot_still_pending(next_slot) {
                self.flush_cond.notify_all();
                let mut guard = self.wait_mutex.lock();
                self.wait_cond.wait_for(&mut guard, Duration::from_millis(20));
                continue;
            }

            if crosses_partition {
                let leftover = self.config.partition_data_size.saturating_sub(active.epoch.base_lsn.offset as u64 + used);
                if self.reserve_space(leftover).is_err() {
                    return Err(LogError::OutOfLogSpace);
                }
                self.open_next_partition()?;
            }

            let mut cur = self.cur_epoch.lock();
            let mut old = self.old_epoch.lock();
            *old = Some(*cur);
            let new_epoch = if crosses_partition {
                cur.epoch.next_across_partition()
            } else {
                cur.epoch.next_within_partition(self.config.seg_size)
            };
            *cur = ActiveEpoch { epoch: new_epoch, slot: next_slot };
            let base_lsn = cur.epoch.base_lsn;
            cur.epoch.end = combined as usize;
            drop(old);
            drop(cur);
            return Ok((base_lsn, Self::encode_reservation_location(next_slot, 0)));
        }
    }

    fn encode_reservation_location(slot: usize, local_offset: u64) -> u64 {
        (slot as u64) << 48 | local_offset
    }

    fn decode_reservation_location(word: u64) -> (usize, usize) {
        ((word >> 48) as usize, (word & 0xFFFF_FFFF_FFFF) as usize)
    }

    fn slot_still_pending(&self, slot: usize) -> bool {
        matches!(*self.old_epoch.lock(), Some(active) if active.slot == slot)
    }

    fn open_next_partition(&self) -> LogResult<()> {
        let next_num = self.current_partition_num.fetch_add(1, Ordering::AcqRel) + 1;
        let mut partitions = self.partitions.lock();
        if let Some(prev) = partitions.iter().find(|p| p.num == next_num - 1) {
            if prev.state() == PartitionState::Appending {
                prev.close()?;
            }
        }
        let live = partitions.iter().filter(|p| p.state() != PartitionState::Scavenged).count();
        if live >= self.config.partition_count as usize {
            // TODO: wire a scavenger thread that calls Partition::scavenge()
            // once OldestLsnTracker confirms a partition is behind the
            // oldest active LSN, and have this wait on scavenge_cond for it
            // instead of proceeding past the retention target.
            self.scavenge_cond.notify_all();
            tracing::warn!(live, retention = self.config.partition_count, "exceeding partition retention target");
        }
        let partition = Arc::new(Partition::new(&self.dir, next_num, self.config.partition_data_size));
        partition.open_for_append()?;
        partitions.push(partition);
        Ok(())
    }

    // ---- Flush daemon (§4.G "Flush daemon") -------------------------------

    fn flush_once(&self) -> LogResult<()> {
        let _fl = self.flush_lock.lock();
        let old = self.old_epoch.lock().take();
        let cur = *self.cur_epoch.lock();

        let crossed_partition = old.map(|o| o.epoch.base_lsn.file != cur.epoch.base_lsn.file).unwrap_or(false);

        if let Some(old_active) = old {
            self.flush_epoch(&old_active)?;
        }
        if !crossed_partition {
            self.flush_epoch(&cur)?;
        }
        self.wait_cond.notify_all();
        Ok(())
    }

    fn flush_epoch(&self, active: &ActiveEpoch) -> LogResult<()> {
        if active.epoch.is_empty() {
            return Ok(());
        }
        self.ensure_partition_open(active.epoch.base_lsn.file)?;
        let partition = {
            let partitions = self.partitions.lock();
            partitions
                .iter()
                .find(|p| p.num == active.epoch.base_lsn.file)
                .cloned()
                .ok_or_else(|| LogError::Internal("flush target partition missing".into()))?
        };

        let buffer = self.buffers[active.slot].lock();
        let data = &buffer[active.epoch.start..active.epoch.end];
        let file_offset = active.epoch.base_lsn.offset as u64;
        let prefix = partition.prime_tail(file_offset, self.config.block_size as u64)?;
        partition.write_block_aligned(file_offset, data, self.config.block_size as u64, &prefix)?;
        partition.sync()?;
        drop(buffer);

        let new_lsn = active.epoch.lsn_at(active.epoch.end);
        self.flush_lsn.advance_to(new_lsn);
        let _comp_guard = self.comp_lock.lock();
        self.durable_lsn.advance_to(new_lsn);
        *self.flushed_abs.lock() += active.epoch.len() as u64;
        Ok(())
    }

    fn ensure_partition_open(&self, num: u32) -> LogResult<()> {
        let partitions = self.partitions.lock();
        if let Some(partition) = partitions.iter().find(|p| p.num == num) {
            if partition.state() == PartitionState::Virgin {
                partition.open_for_append()?;
            }
            return Ok(());
        }
        drop(partitions);
        let partition = Arc::new(Partition::new(&self.dir, num, self.config.partition_data_size));
        partition.open_for_append()?;
        self.partitions.lock().push(partition);
        Ok(())
    }

    /// Blocks until `durable_lsn() >= target`.
    pub fn flush(&self, target: Lsn) -> LogResult<()> {
        while self.durable_lsn() < target {
            self.flush_once()?;
            if self.durable_lsn() >= target {
                return Ok(());
            }
            let mut guard = self.wait_mutex.lock();
            self.wait_cond.wait_for(&mut guard, Duration::from_millis(20));
        }
        Ok(())
    }

    // ---- Compensate (§4.G "Compensate") -----------------------------------

    /// Marks the record at `orig_lsn` as a CLR pointing at `undo_lsn`.
    /// Patches the frame's fixed-width CLR marker in place (§9 "compensate")
    /// rather than re-encoding the whole record, since the record's JSON
    /// body can vary in length but the frame it already occupies cannot
    /// grow or shrink without corrupting whatever follows it in the buffer.
    pub fn compensate(&self, orig_lsn: Lsn, undo_lsn: Lsn) -> LogResult<()> {
        let _guard = self.comp_lock.lock();
        if orig_lsn < self.flush_lsn() {
            return Err(LogError::BadCompensation(format!("{orig_lsn} is already durable")));
        }
        let active = self.locate_active_epoch(orig_lsn)?;
        let local_pos = self.locate_in_epoch(orig_lsn, &active)?;

        let mut buffer = self.buffers[active.slot].lock();
        let (record, identified_lsn) = LogRecord::decode(&buffer[local_pos..])?;
        if identified_lsn != orig_lsn {
            return Err(LogError::BadCompensation(format!(
                "record at offset self-identifies as {identified_lsn}, expected {orig_lsn}"
            )));
        }
        if !record.is_undoable() {
            return Err(LogError::BadCompensation(format!("{orig_lsn} is not an undoable record")));
        }
        LogRecord::patch_comp_marker_in_place(&mut buffer, local_pos, undo_lsn)
    }

    fn locate_active_epoch(&self, lsn: Lsn) -> LogResult<ActiveEpoch> {
        let cur = *self.cur_epoch.lock();
        if self.locate_in_epoch(lsn, &cur).is_ok() {
            return Ok(cur);
        }
        if let Some(old) = *self.old_epoch.lock() {
            if self.locate_in_epoch(lsn, &old).is_ok() {
                return Ok(old);
            }
        }
        Err(LogError::BadCompensation(format!("{lsn} not found in live buffer")))
    }

    fn locate_in_epoch(&self, lsn: Lsn, active: &ActiveEpoch) -> LogResult<usize> {
        if lsn.file != active.epoch.base_lsn.file || lsn < active.epoch.base_lsn {
            return Err(LogError::Eof("lsn outside this epoch's partition/range".into()));
        }
        let delta = (lsn.offset - active.epoch.base_lsn.offset) as usize;
        let pos = active.epoch.start + delta;
        if pos >= active.epoch.end {
            return Err(LogError::Eof("lsn past this epoch's written range".into()));
        }
        Ok(pos)
    }

    // ---- Fetch (§4.G "Fetch") ----------------------------------------------

    pub fn fetch(&self, lsn: Lsn) -> LogResult<LogRecord> {
        if lsn >= self.curr_lsn() {
            return Err(LogError::Eof(format!("{lsn} is at or past currLsn")));
        }
        if let Ok(active) = self.locate_active_epoch(lsn) {
            let pos = self.locate_in_epoch(lsn, &active)?;
            let buffer = self.buffers[active.slot].lock();
            let (record, identified) = LogRecord::decode(&buffer[pos..])?;
            if identified == lsn {
                return Ok(record);
            }
        }

        let partition = {
            let partitions = self.partitions.lock();
            partitions
                .iter()
                .find(|p| p.num == lsn.file)
                .cloned()
                .ok_or_else(|| LogError::Eof(format!("partition {} not resident", lsn.file)))?
        };
        let header = partition.read_at(lsn.offset as u64, HEADER_LEN)?;
        let claimed_len = u64::from_be_bytes(header.try_into().unwrap()) as usize;
        let full = partition.read_at(lsn.offset as u64, claimed_len)?;
        let (record, identified) = LogRecord::decode(&full)?;
        if identified != lsn {
            return Err(LogError::Internal(format!("record at {lsn} self-identifies as {identified}")));
        }
        Ok(record)
    }

    /// The predecessor LSN of `lsn` given a record of `record_len` bytes
    /// immediately before it, valid only when that predecessor is still
    /// within the same partition (§4.G "Fetch": "the predecessor LSN is
    /// computed... before crossing a partition").
    pub fn predecessor_lsn(&self, lsn: Lsn, record_len: u32) -> LogResult<Lsn> {
        lsn.checked_sub_within_partition(record_len)
            .ok_or_else(|| LogError::Eof(format!("predecessor of {lsn} crosses a partition boundary")))
    }

    // ---- Space reservation (§4.G "Space reservation") ---------------------

    pub fn reserve_space(&self, n: u64) -> LogResult<()> {
        let mut state = self.space.lock();
        if !self.reservations_active.load(Ordering::Acquire) {
            state.available -= n as i64;
            return Ok(());
        }
        if state.available - n as i64 < state.reserved_for_chkpt {
            return Err(LogError::OutOfLogSpace);
        }
        state.available -= n as i64;
        Ok(())
    }

    pub fn release_space(&self, n: u64) {
        let mut state = self.space.lock();
        state.available += n as i64;
        drop(state);
        self.space_cond.notify_all();
    }

    pub fn activate_reservations(&self) {
        self.reservations_active.store(true, Ordering::Release);
    }

    pub fn set_reserved_for_chkpt(&self, n: i64) {
        self.space.lock().reserved_for_chkpt = n;
    }

    /// Ensures the reserved floor covers the worst-case checkpoint record
    /// set (§4.G "`verifyChkptReservation`").
    pub fn verify_chkpt_reservation(&self, worst_case: u64) -> bool {
        self.space.lock().reserved_for_chkpt >= worst_case as i64
    }

    // ---- Durability queries -------------------------------------------------

    pub fn curr_lsn(&self) -> Lsn {
        self.curr_lsn.load(Ordering::Acquire)
    }

    pub fn flush_lsn(&self) -> Lsn {
        self.flush_lsn.load(Ordering::Acquire)
    }

    pub fn durable_lsn(&self) -> Lsn {
        self.durable_lsn.load(Ordering::Acquire)
    }

    /// Total bytes written to partition files so far, across all flushes.
    pub fn total_flushed_bytes(&self) -> u64 {
        *self.flushed_abs.lock()
    }
}
