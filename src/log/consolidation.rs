//! `ConsolidationArray`: batches concurrent appenders into one insert-latch
//! acquisition per cohort (§4.F).
//!
//! Grounded on `log_core.cpp`'s log insertion consolidation array: the
//! same fetch-add-to-join, swap-to-finalize, last-one-out-runs-epoch-update
//! shape. Its sentinel-arithmetic trick ("publish `Finished - combined` so
//! the last fetch-add to land exactly hits `Finished`") is expressed here
//! as counting a `remaining` field down to zero instead of up to a magic
//! sentinel — same race-free "who's last" property, without requiring
//! every caller to reason about a shifted constant.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use crate::common::Lsn;
use crate::log::error::LogError;

/// A cohort member's join result: which slot it landed in, whether it is
/// the leader responsible for running `acquireBufferSpace`, and the byte
/// offset of this caller's own payload within the eventual consolidated
/// write (§4.F "joinSlot").
#[derive(Debug, Clone, Copy)]
pub struct JoinResult {
    pub slot_index: usize,
    pub my_offset: u64,
    pub is_leader: bool,
}

/// The leader's reservation, shared with every follower once published.
#[derive(Debug, Clone, Copy)]
pub struct SlotReservation {
    pub base_lsn: Lsn,
    pub base_offset: u64,
    pub combined_size: u64,
}

struct ConsolidationSlot {
    /// Accumulation-phase counter: each joiner fetch-adds its size. A
    /// nonnegative prior value means "still accepting joiners, I landed at
    /// offset `prior`"; the leader (prior == 0) swaps this to `-1` to close
    /// the window. A negative prior value means a joiner raced the swap and
    /// must retry on whatever slot is active now.
    join_counter: AtomicI64,
    /// Copy-completion countdown, set to `combined_size` by the leader once
    /// the reservation is known; the member whose subtraction lands it
    /// exactly on zero is the last one out and owns `updateEpochs`.
    remaining: AtomicI64,
    reservation: Mutex<Option<Result<SlotReservation, LogError>>>,
    ready: Condvar,
}

impl ConsolidationSlot {
    fn new() -> Self {
        Self {
            join_counter: AtomicI64::new(0),
            remaining: AtomicI64::new(0),
            reservation: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

pub struct ConsolidationArray {
    slots: Vec<ConsolidationSlot>,
    active: AtomicUsize,
}

impl ConsolidationArray {
    pub fn new(slot_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            slots: (0..slot_count).map(|_| ConsolidationSlot::new()).collect(),
            active: AtomicUsize::new(0),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Joins the currently active slot's cohort. The caller must check
    /// `JoinResult::is_leader`: the leader calls [`lead`](Self::lead); every
    /// other caller calls [`wait_for_leader`](Self::wait_for_leader).
    pub fn join(&self, size: u64) -> JoinResult {
        loop {
            let idx = self.active.load(Ordering::Acquire);
            let slot = &self.slots[idx];
            let prior = slot.join_counter.fetch_add(size as i64, Ordering::AcqRel);
            if prior >= 0 {
                return JoinResult { slot_index: idx, my_offset: prior as u64, is_leader: prior == 0 };
            }
            // The window closed between our load of `active` and our
            // fetch_add; undo and retry against the now-current slot.
            slot.join_counter.fetch_sub(size as i64, Ordering::AcqRel);
            std::hint::spin_loop();
        }
    }

    /// Called only by the cohort leader. Rotates the active slot so new
    /// arrivals land elsewhere, finalizes the combined size, runs
    /// `acquire` (the caller's `acquireBufferSpace`), and publishes the
    /// result for followers waiting in [`wait_for_leader`](Self::wait_for_leader).
    pub fn lead(
        &self,
        join: &JoinResult,
        acquire: impl FnOnce(u64) -> Result<(Lsn, u64), LogError>,
    ) -> Result<SlotReservation, LogError> {
        let slot = &self.slots[join.slot_index];
        let next = (join.slot_index + 1) % self.slots.len();
        self.active.store(next, Ordering::Release);

        let combined = slot.join_counter.swap(-1, Ordering::AcqRel) as u64;
        slot.remaining.store(combined as i64, Ordering::Release);

        let result = acquire(combined).map(|(base_lsn, base_offset)| SlotReservation {
            base_lsn,
            base_offset,
            combined_size: combined,
        });

        *slot.reservation.lock() = Some(result.clone());
        slot.ready.notify_all();
        result
    }

    /// Called by every non-leader cohort member; blocks until the leader
    /// publishes a reservation for `slot_index`.
    pub fn wait_for_leader(&self, slot_index: usize) -> Result<SlotReservation, LogError> {
        let slot = &self.slots[slot_index];
        let mut guard = slot.reservation.lock();
        loop {
            if let Some(result) = guard.clone() {
                return result;
            }
            slot.ready.wait(&mut guard);
        }
    }

    /// Called by every cohort member (leader included) after it has copied
    /// its payload into its sub-range. Returns `true` for whichever member's
    /// call is the last to finish, which then runs `updateEpochs`.
    pub fn finish_copy(&self, slot_index: usize, my_size: u64) -> bool {
        let slot = &self.slots[slot_index];
        let remaining = slot.remaining.fetch_sub(my_size as i64, Ordering::AcqRel) - my_size as i64;
        if remaining == 0 {
            *slot.reservation.lock() = None;
            slot.join_counter.store(0, Ordering::Release);
            true
        } else {
            false
        }
    }
}
