//! `LockQueue` acquire/release protocol (§4.B) and the bucketed
//! `LockTable` that owns one queue per hash bucket (§3 "LockQueue").
//!
//! Grounded on `RawLockQueue::acquire`/`find`/`delink` (`lock_raw.cpp`) for
//! the append-only, physically-delink-on-traversal discipline, and on
//! `lock_manager.rs`'s timeout-wait shape (though here the wait parks on
//! the *transaction's* condvar, not a queue-global one, per §3
//! "TransactionShadow ... synchronization primitives for sleep/wake").

use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

use super::entry::{LockEntry, LockState};
use super::markable::{MarkableWord, Unpacked};
use super::mode::LockMode;
use super::pool::{GenerationalPool, PoolHandle};
use super::shadow::{chain_leads_to, TransactionShadow};
use crate::common::{prime_bucket_count, AtomicLsn, Lsn, TransactionId};
use crate::lock::error::{LockError, LockResult};

const NIL: PoolHandle = u32::MAX;
const DEADLOCK_DEPTH_CAP: usize = 16;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Hook for §4.B step 4's "on-demand undo": asked whether a blocking
/// transaction is a known recovery loser, and if so, given the chance to
/// roll it back before the compatibility scan is retried. The lock
/// manager has no transaction-table collaborator of its own (out of
/// scope, §1 Non-goals), so this is the seam a caller wires up instead.
pub trait LoserRollback: Send + Sync {
    fn is_pending_loser(&self, txn_id: TransactionId) -> bool;

    /// `Ok(true)`: the loser was rolled back, caller should retry the
    /// compatibility scan. `Ok(false)`: not actually a loser (race lost to
    /// someone else already finishing its rollback). `Err`: latch
    /// acquisition timed out — propagate `LockError::Retry` (§4.B step 4).
    fn undo_on_demand(&self, txn_id: TransactionId) -> LockResult<bool>;
}

/// Bundles the two generational pools and optional loser-rollback hook an
/// `acquire`/`release` call needs, so call sites don't thread three
/// parameters through every call.
pub struct LockContext<'a> {
    pub lock_pool: &'a GenerationalPool<LockEntry>,
    pub xct_pool: &'a GenerationalPool<TransactionShadow>,
    pub loser_rollback: Option<&'a dyn LoserRollback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(PoolHandle),
    /// The check-only path succeeded without retaining an entry (§4.B
    /// step 1, and step 7's "if the caller only wanted a check,
    /// immediately release L").
    CheckedCompatible,
}

#[derive(Debug, Default)]
struct ScanOutcome {
    compatible: bool,
    blocker: Option<PoolHandle>,
    deadlock_against_self: bool,
}

/// Which link a traversal step is about to CAS: the queue's virtual head,
/// or some live entry's `next` word. Needed because the head isn't itself
/// a pool-allocated `LockEntry` (§3: "always-present dummy head").
#[derive(Clone, Copy)]
enum PredLink {
    Head,
    Node(PoolHandle),
}

/// One bucket's lock list (§3 "LockQueue"): an append-only singly-linked
/// chain reached through a virtual head, plus the `x_lock_tag` watermark
/// used for early lock release (ELR).
pub struct LockQueue {
    head: MarkableWord,
    x_lock_tag: AtomicLsn,
}

impl Default for LockQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LockQueue {
    pub fn new() -> Self {
        Self {
            head: MarkableWord::null(),
            x_lock_tag: AtomicLsn::new(Lsn::NULL),
        }
    }

    pub fn x_lock_tag(&self) -> Lsn {
        self.x_lock_tag.load(Ordering::Acquire)
    }

    fn load_link(&self, link: PredLink, lock_pool: &GenerationalPool<LockEntry>) -> Unpacked {
        match link {
            PredLink::Head => self.head.load(Ordering::Acquire),
            PredLink::Node(h) => lock_pool
                .with(h, |e| e.next.load(Ordering::Acquire))
                .unwrap_or(Unpacked {
                    index: NIL,
                    marked: true,
                    aba: 0,
                }),
        }
    }

    fn cas_link(
        &self,
        link: PredLink,
        lock_pool: &GenerationalPool<LockEntry>,
        expected: Unpacked,
        new_index: PoolHandle,
        new_marked: bool,
    ) -> bool {
        match link {
            PredLink::Head => self.head.compare_and_set(expected, new_index, new_marked),
            PredLink::Node(h) => lock_pool
                .with(h, |e| e.next.compare_and_set(expected, new_index, new_marked))
                .unwrap_or(false),
        }
    }

    /// Walks the chain from head, physically delinking any entry whose own
    /// `next` word is mark-bit-set, invoking `on_live` for every entry that
    /// survives the walk in order. Returns the tail's link and its current
    /// snapshot, ready for an append CAS.
    fn walk_delinking(
        &self,
        lock_pool: &GenerationalPool<LockEntry>,
        mut on_live: impl FnMut(PoolHandle),
    ) -> (PredLink, Unpacked) {
        let mut pred = PredLink::Head;
        let mut pred_snapshot = self.load_link(pred, lock_pool);
        loop {
            if pred_snapshot.index == NIL {
                return (pred, pred_snapshot);
            }
            let cur = pred_snapshot.index;
            let cur_next = self.load_link(PredLink::Node(cur), lock_pool);
            if cur_next.marked {
                if self.cas_link(pred, lock_pool, pred_snapshot, cur_next.index, false) {
                    pred_snapshot = self.load_link(pred, lock_pool);
                } else {
                    pred = PredLink::Head;
                    pred_snapshot = self.load_link(pred, lock_pool);
                }
                continue;
            }
            on_live(cur);
            pred = PredLink::Node(cur);
            pred_snapshot = cur_next;
        }
    }

    /// Appends `handle` at the tail (§4.B step 2).
    fn append(&self, lock_pool: &GenerationalPool<LockEntry>, handle: PoolHandle) {
        loop {
            let (pred, pred_snapshot) = self.walk_delinking(lock_pool, |_| {});
            if self.cas_link(pred, lock_pool, pred_snapshot, handle, false) {
                return;
            }
        }
    }

    /// Marks `handle`'s own `next` word for death, then runs a delinking
    /// walk to physically unlink it (§4.B release's "two-step-delink").
    fn delink(&self, lock_pool: &GenerationalPool<LockEntry>, handle: PoolHandle) {
        loop {
            let cur = match lock_pool.with(handle, |e| e.next.load(Ordering::Acquire)) {
                Some(c) => c,
                None => return,
            };
            if cur.marked {
                break;
            }
            if lock_pool
                .with(handle, |e| e.next.compare_and_set(cur, cur.index, true))
                .unwrap_or(true)
            {
                break;
            }
        }
        self.walk_delinking(lock_pool, |_| {});
    }

    /// Compatibility scan against every live entry sharing `hash` (§4.B
    /// step 3). `exclude` is the just-appended entry itself, if any.
    fn compatibility_scan(
        &self,
        lock_pool: &GenerationalPool<LockEntry>,
        xct_pool: &GenerationalPool<TransactionShadow>,
        hash: u32,
        mode: LockMode,
        requester_txn_id: TransactionId,
        requester_handle: PoolHandle,
        exclude: Option<PoolHandle>,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome {
            compatible: true,
            blocker: None,
            deadlock_against_self: false,
        };
        self.walk_delinking(lock_pool, |cur| {
            if Some(cur) == exclude {
                return;
            }
            let info = lock_pool.with(cur, |e| {
                (e.hash, e.mode, e.owner, e.owner_txn_id, e.is_obsolete())
            });
            let (h2, mode2, owner2, owner_txn_id2, obsolete2) = match info {
                Some(v) => v,
                None => return,
            };
            if h2 != hash || obsolete2 || owner_txn_id2 == requester_txn_id {
                return;
            }
            if mode.is_compatible(&mode2) {
                return;
            }
            if chain_leads_to(xct_pool, owner2, requester_handle, DEADLOCK_DEPTH_CAP) {
                outcome.deadlock_against_self = true;
            }
            outcome.compatible = false;
            outcome.blocker = Some(owner2);
        });
        outcome
    }

    /// `acquire` (§4.B). `timeout_ms`: `0` = conditional/no-wait, `< 0` =
    /// wait forever, `> 0` = wait up to that many milliseconds. This folds
    /// separate `wait`/`timeoutMs` parameters into one, since `wait` is
    /// fully determined by whether `timeoutMs == 0` — see DESIGN.md for
    /// this simplification.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &self,
        ctx: &LockContext,
        requester: PoolHandle,
        requester_txn_id: TransactionId,
        hash: u32,
        mode: LockMode,
        timeout_ms: i64,
        check_only: bool,
        keep_entry: bool,
    ) -> LockResult<AcquireOutcome> {
        if check_only && !keep_entry {
            let scan = self.compatibility_scan(
                ctx.lock_pool,
                ctx.xct_pool,
                hash,
                mode,
                requester_txn_id,
                requester,
                None,
            );
            if scan.compatible {
                ctx.xct_pool.with(requester, |s| {
                    s.update_read_watermark(self.x_lock_tag())
                });
                return Ok(AcquireOutcome::CheckedCompatible);
            }
            // Falls through to the full allocate-and-wait path below.
        }

        let entry_handle = ctx
            .lock_pool
            .allocate(LockEntry::new(hash, mode, requester, requester_txn_id));
        self.append(ctx.lock_pool, entry_handle);

        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };

        loop {
            let scan = self.compatibility_scan(
                ctx.lock_pool,
                ctx.xct_pool,
                hash,
                mode,
                requester_txn_id,
                requester,
                Some(entry_handle),
            );

            if scan.deadlock_against_self {
                self.release_internal(ctx, entry_handle, None);
                return Err(LockError::Deadlock {
                    txn_id: requester_txn_id,
                });
            }

            if scan.compatible {
                ctx.lock_pool.with(entry_handle, |e| {
                    e.state.compare_and_set(LockState::Waiting, LockState::Active)
                });
                ctx.xct_pool.with(requester, |s| {
                    s.update_read_watermark(self.x_lock_tag());
                    s.set_blocker(None);
                    s.track_lock(hash, entry_handle);
                });
                if check_only {
                    ctx.xct_pool.with(requester, |s| s.untrack_lock(hash, entry_handle));
                    self.release_internal(ctx, entry_handle, None);
                    return Ok(AcquireOutcome::CheckedCompatible);
                }
                return Ok(AcquireOutcome::Granted(entry_handle));
            }

            let blocker_txn_id = scan
                .blocker
                .and_then(|b| ctx.xct_pool.with(b, |s| s.txn_id));
            if let (Some(rollback), Some(blocker_txn_id)) = (ctx.loser_rollback, blocker_txn_id) {
                if rollback.is_pending_loser(blocker_txn_id) {
                    match rollback.undo_on_demand(blocker_txn_id) {
                        Ok(_) => continue,
                        Err(e) => {
                            self.release_internal(ctx, entry_handle, None);
                            return Err(e);
                        }
                    }
                }
            }

            if timeout_ms == 0 {
                self.release_internal(ctx, entry_handle, None);
                return Err(LockError::ConditionalLockTimeout);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.release_internal(ctx, entry_handle, None);
                    return Err(LockError::LockTimeout { timeout_ms });
                }
            }

            ctx.lock_pool.with(entry_handle, |e| {
                e.state.compare_and_set(LockState::Active, LockState::Waiting)
            });
            ctx.xct_pool.with(requester, |s| s.set_blocker(scan.blocker));
            fence(Ordering::SeqCst);

            let slice = deadline
                .map(|d| d.saturating_duration_since(Instant::now()).min(WAIT_POLL_INTERVAL))
                .unwrap_or(WAIT_POLL_INTERVAL);
            ctx.xct_pool.with(requester, |s| {
                let mut guard = s.wait_mutex.lock();
                s.wait_cond.wait_for(&mut guard, slice);
            });

            let woke_to_deadlock = ctx
                .xct_pool
                .with(requester, |s| {
                    s.deadlock_detected_by_others.swap(false, Ordering::AcqRel)
                })
                .unwrap_or(false);
            if woke_to_deadlock {
                self.release_internal(ctx, entry_handle, None);
                return Err(LockError::Deadlock {
                    txn_id: requester_txn_id,
                });
            }
            // Loop back around and rescan — handles both a direct grant
            // notification and a plain timeout-driven poll uniformly.
        }
    }

    /// `release` (§4.B). `commit_lsn`, if present, is used to advance
    /// `x_lock_tag` when the released mode has a write component (ELR).
    pub fn release(&self, ctx: &LockContext, handle: PoolHandle, commit_lsn: Option<Lsn>) {
        self.release_internal(ctx, handle, commit_lsn);
    }

    fn release_internal(&self, ctx: &LockContext, handle: PoolHandle, commit_lsn: Option<Lsn>) {
        let info = match ctx
            .lock_pool
            .with(handle, |e| (e.hash, e.mode, e.owner))
        {
            Some(v) => v,
            None => return,
        };
        let (hash, mode, owner) = info;

        if let Some(lsn) = commit_lsn {
            if mode.has_write_component() {
                self.x_lock_tag.advance_to(lsn);
            }
        }

        ctx.lock_pool
            .with(handle, |e| e.state.store(LockState::Obsolete, Ordering::Release));
        fence(Ordering::SeqCst);

        // Wake/grant Waiting successors on the same hash that are now
        // compatible with everything else live in the bucket, or declare
        // deadlock and mark them `deadlock_detected_by_others` if this
        // release closed a cycle back to one of them instead (§4.B
        // "release": "grant the lock to waiters it unblocks, or declare
        // deadlock and mark the waiter").
        let mut to_wake: Vec<PoolHandle> = Vec::new();
        let mut to_notify: Vec<PoolHandle> = Vec::new();
        self.walk_delinking(ctx.lock_pool, |cur| {
            if cur == handle {
                return;
            }
            let info = ctx.lock_pool.with(cur, |e| {
                (e.hash, e.mode, e.owner, e.owner_txn_id, e.state.load(Ordering::Acquire))
            });
            if let Some((h2, mode2, owner2, owner_txn_id2, state2)) = info {
                if h2 != hash || state2 != LockState::Waiting {
                    return;
                }
                let scan = self.compatibility_scan(
                    ctx.lock_pool,
                    ctx.xct_pool,
                    h2,
                    mode2,
                    owner_txn_id2,
                    owner2,
                    Some(cur),
                );
                if scan.compatible {
                    ctx.lock_pool
                        .with(cur, |e| e.state.compare_and_set(LockState::Waiting, LockState::Active));
                    ctx.xct_pool.with(owner2, |s| s.set_blocker(None));
                    to_wake.push(owner2);
                } else if scan.deadlock_against_self {
                    ctx.xct_pool.with(owner2, |s| {
                        s.deadlock_detected_by_others.store(true, Ordering::Release)
                    });
                    to_notify.push(owner2);
                }
            }
        });

        ctx.xct_pool.with(owner, |s| s.untrack_lock(hash, handle));
        self.delink(ctx.lock_pool, handle);

        to_notify.extend(to_wake);
        for owner2 in to_notify {
            ctx.xct_pool.with(owner2, |s| {
                let _guard = s.wait_mutex.lock();
                s.wait_cond.notify_all();
            });
        }
    }
}

/// Bucketed lock table: one [`LockQueue`] per `hash mod bucketCount`,
/// where `bucketCount` is rounded per §4.A's prime-below-power-of-two rule
/// (§6 `sm_locktablesize`).
pub struct LockTable {
    buckets: Vec<LockQueue>,
    bucket_count: u32,
}

impl LockTable {
    pub fn new(requested_buckets: u32) -> Self {
        let bucket_count = prime_bucket_count(requested_buckets);
        let buckets = (0..bucket_count).map(|_| LockQueue::new()).collect();
        Self {
            buckets,
            bucket_count,
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    fn bucket_for(&self, hash: u32) -> &LockQueue {
        &self.buckets[(hash % self.bucket_count) as usize]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &self,
        ctx: &LockContext,
        requester: PoolHandle,
        requester_txn_id: TransactionId,
        hash: u32,
        mode: LockMode,
        timeout_ms: i64,
        check_only: bool,
        keep_entry: bool,
    ) -> LockResult<AcquireOutcome> {
        self.bucket_for(hash).acquire(
            ctx,
            requester,
            requester_txn_id,
            hash,
            mode,
            timeout_ms,
            check_only,
            keep_entry,
        )
    }

    pub fn release(&self, ctx: &LockContext, handle: PoolHandle, commit_lsn: Option<Lsn>) {
        let hash = match ctx.lock_pool.with(handle, |e| e.hash) {
            Some(h) => h,
            None => return,
        };
        self.bucket_for(hash).release(ctx, handle, commit_lsn);
    }
}
