//! Shared types used across the lock, log, and recovery subsystems.
//!
//! This mirrors the role of `rusty-db`'s own `common` module: a small set of
//! identifiers and value types that every other module depends on, with no
//! dependencies of its own back into the subsystems.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for transactions, matching `common::TransactionId` in
/// the parent `rusty-db` crate this substrate is extracted from.
pub type TransactionId = u64;

/// Unique identifier for pages, as referenced by checkpoint dirty-page
/// tracking (component H). The physical page format is out of scope.
pub type PageId = u64;

/// Log sequence number: a `(file, offset)` pair, total-ordered
/// lexicographically. `Lsn::NULL` is the smallest possible value.
///
/// This is the Rust analogue of `lsn_t` (`src/common/*`, referenced
/// throughout `log.h`/`lock_raw.h`): a partitioned token rather than a flat
/// counter, because partition rollover needs to distinguish "same file,
/// larger offset" from "next file".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn {
    pub file: u32,
    pub offset: u32,
}

impl Lsn {
    /// The smallest possible LSN, used as a sentinel for "never set".
    pub const NULL: Lsn = Lsn { file: 0, offset: 0 };

    pub const fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Returns the LSN `n` bytes past this one within the same partition.
    pub fn advance(&self, n: u32) -> Self {
        Self {
            file: self.file,
            offset: self.offset + n,
        }
    }

    /// Returns the LSN of the first byte of the next partition file.
    pub fn next_partition(&self) -> Self {
        Self {
            file: self.file + 1,
            offset: 0,
        }
    }

    /// Computes the predecessor LSN `record_len` bytes before this one,
    /// provided that stays within the same partition file. Backward scans
    /// must compute this *before* crossing a partition boundary (§4.G
    /// "Fetch"), since the predecessor of the first record in a partition
    /// lives in the prior partition and is not a fixed byte offset away.
    pub fn checked_sub_within_partition(&self, record_len: u32) -> Option<Self> {
        self.offset.checked_sub(record_len).map(|offset| Self {
            file: self.file,
            offset,
        })
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.file, self.offset)
    }
}

/// Largest prime below each power of two from 2^6 through 2^30, used by
/// both the lock table and the oldest-LSN tracker to size their bucket
/// arrays (§4.A, §6 `sm_locktablesize`). Grounded on `lock_compt.h`'s
/// `primes[]` table as used by `log_lsn_tracker.cpp`.
const PRIMES_BELOW_POWERS_OF_TWO: [u32; 25] = [
    61, 127, 251, 509, 1021, 2039, 4093, 8191, 16381, 32749, 65521, 131071,
    262139, 524287, 1048573, 2097143, 4194301, 8388593, 16777213, 33554393,
    67108859, 134217689, 268435399, 536870909, 1073741789,
];

/// Rounds `requested` down to the nearest prime at or below the next power
/// of two, with a floor of 61 (§4.A, §6). Used for lock-table bucket counts
/// and oldest-LSN tracker bucket counts alike.
pub fn prime_bucket_count(requested: u32) -> u32 {
    let requested = requested.max(61);
    let mut bits = 6u32;
    while (1u32 << bits) < requested && (bits as usize) < PRIMES_BELOW_POWERS_OF_TWO.len() + 5 {
        bits += 1;
    }
    let index = (bits.saturating_sub(6)) as usize;
    PRIMES_BELOW_POWERS_OF_TWO[index.min(PRIMES_BELOW_POWERS_OF_TWO.len() - 1)]
}

/// A lock-free `Lsn` cell, packing `(file, offset)` into one `u64` so
/// `x_lock_tag`, `flushLsn`, `durableLsn`, and `currLsn` (§4.B, §4.G) can
/// all be advanced with a single CAS rather than a mutex.
#[derive(Debug, Default)]
pub struct AtomicLsn(AtomicU64);

impl AtomicLsn {
    pub fn new(lsn: Lsn) -> Self {
        Self(AtomicU64::new(Self::pack(lsn)))
    }

    fn pack(lsn: Lsn) -> u64 {
        ((lsn.file as u64) << 32) | (lsn.offset as u64)
    }

    fn unpack(word: u64) -> Lsn {
        Lsn {
            file: (word >> 32) as u32,
            offset: word as u32,
        }
    }

    pub fn load(&self, order: Ordering) -> Lsn {
        Self::unpack(self.0.load(order))
    }

    pub fn store(&self, lsn: Lsn, order: Ordering) {
        self.0.store(Self::pack(lsn), order);
    }

    /// Advances the cell to `lsn` only if that is an increase, retrying the
    /// CAS while a concurrent writer is also advancing it — matches
    /// `release`'s "CAS-advance `x_lock_tag`... retrying only if the
    /// observed value is still less" (§4.B).
    pub fn advance_to(&self, lsn: Lsn) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let current_lsn = Self::unpack(current);
            if lsn <= current_lsn {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                Self::pack(lsn),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Returns a stable, process-unique identifier for the calling thread.
///
/// The oldest-LSN tracker and the generational pool's per-thread hint both
/// need *some* integer that identifies "this thread" (§4.A, §4.D, §9
/// "Thread-local storage"); the content of the id is opaque, so we hand out
/// sequential integers lazily rather than depending on OS thread handles.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|cell| {
        let mut id = cell.get();
        if id == 0 {
            id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(id);
        }
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_ordering_is_lexicographic() {
        assert!(Lsn::new(1, 0) > Lsn::new(0, u32::MAX));
        assert!(Lsn::new(1, 5) < Lsn::new(1, 6));
        assert_eq!(Lsn::NULL, Lsn::default());
    }

    #[test]
    fn prime_bucket_count_has_floor_61() {
        assert_eq!(prime_bucket_count(0), 61);
        assert_eq!(prime_bucket_count(10), 61);
        assert_eq!(prime_bucket_count(61), 61);
        assert_eq!(prime_bucket_count(62), 61);
        assert_eq!(prime_bucket_count(1000), 1021);
    }

    #[test]
    fn thread_id_is_stable_within_thread() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert_eq!(a, b);
    }

    #[test]
    fn atomic_lsn_only_advances() {
        let cell = AtomicLsn::new(Lsn::new(0, 10));
        assert!(!cell.advance_to(Lsn::new(0, 5)));
        assert_eq!(cell.load(Ordering::Acquire), Lsn::new(0, 10));
        assert!(cell.advance_to(Lsn::new(0, 20)));
        assert_eq!(cell.load(Ordering::Acquire), Lsn::new(0, 20));
    }

    #[test]
    fn thread_id_differs_across_threads() {
        let a = current_thread_id();
        let b = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(a, b);
    }
}
