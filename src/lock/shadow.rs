//! `TransactionShadow` (§3, §4.C): lock-owner identity, deadlock-graph
//! edge, and wait condvar.
//!
//! Grounded on `deadlock.rs`'s wait-for-graph idea (`HashMap<TransactionId,
//! HashSet<TransactionId>>`) but inlined as a single edge per shadow
//! (`blocker: Option<PoolHandle>`) rather than a separate adjacency map,
//! because §4.B only ever needs "who is the *one* thing currently blocking
//! me", not the full graph — the cycle check walks that single edge
//! transaction by transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use super::mode::LockMode;
use super::pool::{GenerationalPool, PoolHandle};
use crate::common::{Lsn, TransactionId};

const NIL: PoolHandle = u32::MAX;

/// `{Unused, Active, Waiting}` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XctState {
    Unused,
    Active,
    Waiting,
}

/// The private per-transaction bookkeeping `allocate_lock`/`deallocate_lock`
/// maintain: a small hash map keyed by resource hash (for O(1) "do I
/// already hold a mode on H?") plus insertion order, standing in for a
/// doubly-linked list of held locks — ownership is exclusive to this
/// shadow's thread so a `Mutex` here costs nothing contended (§4.C).
#[derive(Debug, Default)]
struct ShadowLocks {
    order: Vec<PoolHandle>,
    by_hash: HashMap<u32, Vec<PoolHandle>>,
}

/// Lock-owner identity and deadlock-graph node (§3, §4.C).
pub struct TransactionShadow {
    pub txn_id: TransactionId,
    pub thread_id: u64,
    state: Mutex<XctState>,
    blocker: AtomicU32,
    pub deadlock_detected_by_others: AtomicBool,
    read_watermark: Mutex<Lsn>,
    locks: Mutex<ShadowLocks>,
    pub wait_mutex: Mutex<()>,
    pub wait_cond: Condvar,
    generation: AtomicU64,
}

impl TransactionShadow {
    pub fn new(txn_id: TransactionId, thread_id: u64) -> Self {
        Self {
            txn_id,
            thread_id,
            state: Mutex::new(XctState::Active),
            blocker: AtomicU32::new(NIL),
            deadlock_detected_by_others: AtomicBool::new(false),
            read_watermark: Mutex::new(Lsn::NULL),
            locks: Mutex::new(ShadowLocks::default()),
            wait_mutex: Mutex::new(()),
            wait_cond: Condvar::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> XctState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: XctState) {
        *self.state.lock() = state;
    }

    pub fn blocker(&self) -> Option<PoolHandle> {
        match self.blocker.load(Ordering::Acquire) {
            NIL => None,
            h => Some(h),
        }
    }

    pub fn set_blocker(&self, blocker: Option<PoolHandle>) {
        self.blocker
            .store(blocker.unwrap_or(NIL), Ordering::Release);
    }

    pub fn read_watermark(&self) -> Lsn {
        *self.read_watermark.lock()
    }

    /// Monotonic max, matching `updateReadWatermark` (§4.C).
    pub fn update_read_watermark(&self, lsn: Lsn) {
        let mut w = self.read_watermark.lock();
        if lsn > *w {
            *w = lsn;
        }
    }

    /// Splices `handle` into this shadow's private list and hash index.
    /// Called after the entry has already been appended to its
    /// `LockQueue` — this only tracks "locks I own", not queue membership.
    pub fn track_lock(&self, hash: u32, handle: PoolHandle) {
        let mut locks = self.locks.lock();
        locks.order.push(handle);
        locks.by_hash.entry(hash).or_default().push(handle);
    }

    pub fn untrack_lock(&self, hash: u32, handle: PoolHandle) {
        let mut locks = self.locks.lock();
        locks.order.retain(|h| *h != handle);
        if let Some(v) = locks.by_hash.get_mut(&hash) {
            v.retain(|h| *h != handle);
        }
    }

    /// OR/join of this transaction's own Active entries on `hash` (§4.C
    /// `grantedMode`).
    pub fn granted_mode(&self, hash: u32, pool: &GenerationalPool<super::entry::LockEntry>) -> Option<LockMode> {
        let handles = {
            let locks = self.locks.lock();
            locks.by_hash.get(&hash).cloned().unwrap_or_default()
        };
        let mut result: Option<LockMode> = None;
        for h in handles {
            if let Some(mode) = pool.with(h, |e| {
                if !e.is_obsolete() {
                    Some(e.mode)
                } else {
                    None
                }
            }) {
                if let Some(mode) = mode {
                    result = Some(match result {
                        Some(existing) => existing.join(&mode),
                        None => mode,
                    });
                }
            }
        }
        result
    }

    pub fn owned_lock_count(&self) -> usize {
        self.locks.lock().order.len()
    }

    /// Debug-level consistency check for the private list (§4.C
    /// "Consistency ... checked in high debug levels"): every tracked
    /// handle must appear in exactly one hash bucket, and the bucket
    /// index must have no stale entries for the current order.
    #[cfg(debug_assertions)]
    pub fn assert_consistent(&self) {
        let locks = self.locks.lock();
        let mut seen = std::collections::HashSet::new();
        for h in &locks.order {
            assert!(seen.insert(*h), "duplicate handle in private lock list");
        }
        let indexed: usize = locks.by_hash.values().map(|v| v.len()).sum();
        assert_eq!(indexed, locks.order.len(), "hash index out of sync with order");
    }
}

/// Outcome of walking a transaction's `blocker` chain (§4.B "Deadlock
/// check").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCheck {
    NoCycle,
    /// The chain looped back to the probing transaction itself.
    SelfCycle,
    /// The chain looped back to some other transaction already in the
    /// walk; that transaction should be notified rather than this probe
    /// declaring deadlock.
    OtherCycle(PoolHandle),
    /// Depth cap reached (§4.B: "exceeding the cap conservatively declares
    /// deadlock").
    DepthExceeded,
}

/// Hypothetical pre-check used by `LockQueue::compatibility_scan` (§4.B
/// step 3): if the requester were to block on `start`, would that close a
/// cycle back to `target`? Walks `start`'s existing `blocker` chain
/// looking for `target` without installing any new edge.
pub fn chain_leads_to(
    pool: &GenerationalPool<TransactionShadow>,
    start: PoolHandle,
    target: PoolHandle,
    max_depth: usize,
) -> bool {
    let mut current = start;
    for _ in 0..max_depth {
        if current == target {
            return true;
        }
        match pool.with(current, |s| s.blocker()).flatten() {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

/// Walks `start`'s `blocker` chain looking for a cycle (§4.B). `self_handle`
/// is the probing transaction's own pool handle.
pub fn detect_cycle(
    pool: &GenerationalPool<TransactionShadow>,
    self_handle: PoolHandle,
    max_depth: usize,
) -> CycleCheck {
    let mut visited = Vec::with_capacity(max_depth.min(64));
    let mut current = self_handle;
    for _ in 0..max_depth {
        let next = pool.with(current, |shadow| shadow.blocker());
        let next = match next.flatten() {
            Some(h) => h,
            None => return CycleCheck::NoCycle,
        };
        if next == self_handle {
            return CycleCheck::SelfCycle;
        }
        if visited.contains(&next) {
            return CycleCheck::OtherCycle(next);
        }
        visited.push(next);
        current = next;
    }
    CycleCheck::DepthExceeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::pool::PoolConfig;
    use std::sync::Arc;

    fn pool() -> Arc<GenerationalPool<TransactionShadow>> {
        GenerationalPool::new(PoolConfig::default())
    }

    #[test]
    fn read_watermark_is_monotonic() {
        let s = TransactionShadow::new(1, 1);
        s.update_read_watermark(Lsn::new(0, 10));
        s.update_read_watermark(Lsn::new(0, 5));
        assert_eq!(s.read_watermark(), Lsn::new(0, 10));
        s.update_read_watermark(Lsn::new(0, 20));
        assert_eq!(s.read_watermark(), Lsn::new(0, 20));
    }

    #[test]
    fn no_cycle_when_no_blocker() {
        let pool = pool();
        let h = pool.allocate(TransactionShadow::new(1, 1));
        assert_eq!(detect_cycle(&pool, h, 16), CycleCheck::NoCycle);
    }

    #[test]
    fn self_cycle_detected() {
        let pool = pool();
        let a = pool.allocate(TransactionShadow::new(1, 1));
        let b = pool.allocate(TransactionShadow::new(2, 2));
        pool.with(a, |s| s.set_blocker(Some(b)));
        pool.with(b, |s| s.set_blocker(Some(a)));
        assert_eq!(detect_cycle(&pool, a, 16), CycleCheck::SelfCycle);
    }

    #[test]
    fn other_cycle_detected() {
        let pool = pool();
        let a = pool.allocate(TransactionShadow::new(1, 1));
        let b = pool.allocate(TransactionShadow::new(2, 2));
        let c = pool.allocate(TransactionShadow::new(3, 3));
        // a -> b -> c -> b (cycle not reaching a)
        pool.with(a, |s| s.set_blocker(Some(b)));
        pool.with(b, |s| s.set_blocker(Some(c)));
        pool.with(c, |s| s.set_blocker(Some(b)));
        assert_eq!(detect_cycle(&pool, a, 16), CycleCheck::OtherCycle(b));
    }
}
