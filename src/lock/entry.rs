//! `LockEntry` (§3): one queue node in a [`LockQueue`](super::queue::LockQueue).

use std::sync::atomic::{AtomicU8, Ordering};

use super::markable::MarkableWord;
use super::mode::LockMode;
use super::pool::PoolHandle;
use crate::common::TransactionId;

/// `{Unused, Obsolete, Active, Waiting}` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unused,
    Obsolete,
    Active,
    Waiting,
}

impl LockState {
    fn to_tag(self) -> u8 {
        match self {
            LockState::Unused => 0,
            LockState::Obsolete => 1,
            LockState::Active => 2,
            LockState::Waiting => 3,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => LockState::Unused,
            1 => LockState::Obsolete,
            2 => LockState::Active,
            _ => LockState::Waiting,
        }
    }
}

/// Atomic cell holding a [`LockState`], separate from the state machine's
/// transition logic so `LockEntry` itself stays a plain data holder.
#[derive(Debug)]
pub struct AtomicLockState(AtomicU8);

impl AtomicLockState {
    pub fn new(state: LockState) -> Self {
        Self(AtomicU8::new(state.to_tag()))
    }

    pub fn load(&self, order: Ordering) -> LockState {
        LockState::from_tag(self.0.load(order))
    }

    pub fn store(&self, state: LockState, order: Ordering) {
        self.0.store(state.to_tag(), order);
    }

    /// Swaps in `state` only if the current value is `expected`; used by
    /// the grant path, which must not clobber a concurrently-recorded
    /// `deadlock_detected_by_others` transition (§4.B step 7).
    pub fn compare_and_set(&self, expected: LockState, new: LockState) -> bool {
        self.0
            .compare_exchange(
                expected.to_tag(),
                new.to_tag(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A lock queue node (§3 "LockEntry"). Allocated from the lock
/// [`GenerationalPool`](super::pool::GenerationalPool) on `acquire`,
/// transitioned `Active → Obsolete` on `release`, and only physically
/// freed once the pool proves no active LSN can still reach it.
#[derive(Debug)]
pub struct LockEntry {
    pub hash: u32,
    pub mode: LockMode,
    pub state: AtomicLockState,
    /// Handle into the xct-shadow pool, not a `TransactionId` directly —
    /// the compatibility scan needs to reach the owner's `blocker` edge
    /// and condvar, not just its id.
    pub owner: PoolHandle,
    pub owner_txn_id: TransactionId,
    pub next: MarkableWord,
}

impl LockEntry {
    pub fn new(hash: u32, mode: LockMode, owner: PoolHandle, owner_txn_id: TransactionId) -> Self {
        Self {
            hash,
            mode,
            state: AtomicLockState::new(LockState::Active),
            owner,
            owner_txn_id,
            next: MarkableWord::null(),
        }
    }

    pub fn is_obsolete(&self) -> bool {
        self.state.load(Ordering::Acquire) == LockState::Obsolete
    }

    pub fn is_held_by(&self, txn_id: TransactionId) -> bool {
        self.owner_txn_id == txn_id
    }
}
