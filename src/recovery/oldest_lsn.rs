//! `OldestLsnTracker` (§4.A): bucketed low-water-mark of active
//! transactions, exposing the oldest active LSN for log-space reclamation.
//!
//! Grounded directly on `PoorMansOldestLsnTracker` (`log_lsn_tracker.h`/
//! `.cpp`): `enter`/`leave` operate on a fixed table of `buckets` slots
//! keyed by `xctId mod buckets`, with a bounded CAS spin on `enter` and a
//! plain store on `leave` ("no barrier, eventual visibility acceptable").

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{prime_bucket_count, Lsn, TransactionId};

const SPIN_WARN_THRESHOLD: u32 = 0xFFFF;

/// Packs an `Lsn` into a `u64` slot value; `0` means "empty" (§4.A: "one
/// LSN value or zero").
fn pack(lsn: Lsn) -> u64 {
    ((lsn.file as u64 + 1) << 32) | (lsn.offset as u64)
}

fn unpack(word: u64) -> Option<Lsn> {
    if word == 0 {
        None
    } else {
        Some(Lsn {
            file: ((word >> 32) as u32) - 1,
            offset: word as u32,
        })
    }
}

/// Bucketed low-water-mark tracker. One slot per active-transaction-id
/// bucket; `oldest_active_lsn` scans the whole table, so it is O(buckets)
/// but only ever called off the hot path (log-space reclamation, flush
/// daemon bookkeeping).
pub struct OldestLsnTracker {
    slots: Vec<AtomicU64>,
    bucket_count: u32,
    cached: AtomicU64,
}

impl OldestLsnTracker {
    pub fn new(requested_buckets: u32) -> Self {
        let bucket_count = prime_bucket_count(requested_buckets);
        let mut slots = Vec::with_capacity(bucket_count as usize);
        slots.resize_with(bucket_count as usize, || AtomicU64::new(0));
        Self {
            slots,
            bucket_count,
            cached: AtomicU64::new(0),
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    fn slot_for(&self, txn_id: TransactionId) -> &AtomicU64 {
        &self.slots[(txn_id % self.bucket_count as u64) as usize]
    }

    /// Spins with CAS until the slot for `txn_id` is replaced from empty
    /// to `lsn` (§4.A "spins with compare-and-swap ... until it replaces
    /// zero"). Bucket collisions cause bounded spin; under normal load a
    /// single CAS succeeds.
    pub fn enter(&self, txn_id: TransactionId, lsn: Lsn) {
        let slot = self.slot_for(txn_id);
        let want = pack(lsn);
        let mut spins: u32 = 0;
        loop {
            match slot.compare_exchange_weak(0, want, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(_) => {
                    spins = spins.wrapping_add(1);
                    if spins == SPIN_WARN_THRESHOLD {
                        tracing::warn!(txn_id, "oldest-lsn tracker enter() spinning on bucket collision");
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Plain store of zero (§4.A "writes zero (plain store, eventual
    /// visibility acceptable)").
    pub fn leave(&self, txn_id: TransactionId) {
        self.slot_for(txn_id).store(0, Ordering::Relaxed);
    }

    /// Scans every slot, returning the smallest non-zero LSN, or
    /// `curr_lsn` when the table is empty (§4.A).
    pub fn oldest_active_lsn(&self, curr_lsn: Lsn) -> Lsn {
        let mut min: Option<Lsn> = None;
        for slot in &self.slots {
            if let Some(lsn) = unpack(slot.load(Ordering::Acquire)) {
                min = Some(match min {
                    Some(existing) if existing <= lsn => existing,
                    _ => lsn,
                });
            }
        }
        let result = min.unwrap_or(curr_lsn);
        self.cached.store(pack(result), Ordering::Relaxed);
        result
    }

    /// Last published result of `oldest_active_lsn`, for callers that want
    /// a cheap approximate read without a full table scan (§4.A "a cached
    /// last result is published for quick queries").
    pub fn oldest_active_lsn_cached(&self) -> Option<Lsn> {
        unpack(self.cached.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_rounds_to_prime() {
        let t = OldestLsnTracker::new(10);
        assert_eq!(t.bucket_count(), 61);
    }

    #[test]
    fn empty_table_returns_curr_lsn() {
        let t = OldestLsnTracker::new(61);
        assert_eq!(t.oldest_active_lsn(Lsn::new(3, 9)), Lsn::new(3, 9));
    }

    #[test]
    fn returns_smallest_entered_lsn() {
        let t = OldestLsnTracker::new(61);
        t.enter(1, Lsn::new(0, 100));
        t.enter(2, Lsn::new(0, 50));
        t.enter(3, Lsn::new(0, 200));
        assert_eq!(t.oldest_active_lsn(Lsn::new(5, 0)), Lsn::new(0, 50));
    }

    #[test]
    fn leave_removes_entry() {
        let t = OldestLsnTracker::new(61);
        t.enter(1, Lsn::new(0, 10));
        t.leave(1);
        assert_eq!(t.oldest_active_lsn(Lsn::new(0, 500)), Lsn::new(0, 500));
    }

    #[test]
    fn cached_value_tracks_last_scan() {
        let t = OldestLsnTracker::new(61);
        assert_eq!(t.oldest_active_lsn_cached(), None);
        t.enter(1, Lsn::new(0, 10));
        let _ = t.oldest_active_lsn(Lsn::new(0, 999));
        assert_eq!(t.oldest_active_lsn_cached(), Some(Lsn::new(0, 10)));
    }
}
