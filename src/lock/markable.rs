//! Markable pointer: `{successorIndex, markBit, abaCounter}` packed into
//! one `u64` and updated by a single CAS (§9 "Cyclic structures").
//!
//! Grounded on `test_markable_pointer.cpp`'s `MarkablePointer<T>` API
//! (`is_marked`, `is_null`, `get_aba_stamp`, `get_pointer`, `atomic_cas`)
//! but deliberately not a pointer at all: per the Design Note, the word
//! holds a [`PoolHandle`](super::pool::PoolHandle) — a slab index into a
//! [`GenerationalPool`](super::pool::GenerationalPool) — so traversal never
//! dereferences a raw pointer a concurrent writer might be retiring.

use std::sync::atomic::{AtomicU64, Ordering};

use super::pool::PoolHandle;

const INDEX_BITS: u32 = 32;
const MARK_BITS: u32 = 1;
const ABA_BITS: u32 = 64 - INDEX_BITS - MARK_BITS;
const ABA_MASK: u64 = (1u64 << ABA_BITS) - 1;

const NIL: PoolHandle = u32::MAX;

/// A snapshot of a [`MarkableWord`] at some point in time, as returned by
/// `load` and consumed as the "expected" triple in `compare_and_set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    pub index: PoolHandle,
    pub marked: bool,
    pub aba: u64,
}

impl Unpacked {
    pub fn is_null(&self) -> bool {
        self.index == NIL
    }

    fn pack(self) -> u64 {
        (self.index as u64) | ((self.marked as u64) << INDEX_BITS) | ((self.aba & ABA_MASK) << (INDEX_BITS + MARK_BITS))
    }

    fn unpack(word: u64) -> Self {
        let index = (word & 0xFFFF_FFFF) as u32;
        let marked = ((word >> INDEX_BITS) & 1) != 0;
        let aba = (word >> (INDEX_BITS + MARK_BITS)) & ABA_MASK;
        Self { index, marked, aba }
    }
}

/// The atomically-updatable link word itself: one `next` pointer in a
/// [`LockQueue`](super::queue::LockQueue)'s singly-linked chain.
#[derive(Debug)]
pub struct MarkableWord(AtomicU64);

impl MarkableWord {
    pub fn null() -> Self {
        Self(AtomicU64::new(
            Unpacked {
                index: NIL,
                marked: false,
                aba: 0,
            }
            .pack(),
        ))
    }

    pub fn new(index: PoolHandle, marked: bool) -> Self {
        Self(AtomicU64::new(Unpacked { index, marked, aba: 0 }.pack()))
    }

    pub fn load(&self, order: Ordering) -> Unpacked {
        Unpacked::unpack(self.0.load(order))
    }

    /// CAS from `(expected.index, expected.marked, expected.aba)` to
    /// `(new_index, new_marked, expected.aba + 1)`. The ABA counter always
    /// advances on a successful swap, matching
    /// `MarkablePointer::atomic_cas`'s explicit old/new aba parameters
    /// (here the new aba is derived rather than caller-supplied, since
    /// every mutator of this word wants "increment", never an arbitrary
    /// value).
    pub fn compare_and_set(&self, expected: Unpacked, new_index: PoolHandle, new_marked: bool) -> bool {
        let desired = Unpacked {
            index: new_index,
            marked: new_marked,
            aba: expected.aba.wrapping_add(1),
        };
        self.0
            .compare_exchange(
                expected.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Marks this word for death without changing its index, failing if
    /// the word has changed since `expected` was observed (used by the
    /// delink traversal in `LockQueue::release`/iteration, §4.B).
    pub fn mark(&self, expected: Unpacked) -> bool {
        if expected.marked {
            return true;
        }
        self.compare_and_set(expected, expected.index, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_word_reports_null() {
        let w = MarkableWord::null();
        assert!(w.load(Ordering::Acquire).is_null());
    }

    #[test]
    fn cas_advances_aba_on_success() {
        let w = MarkableWord::new(5, false);
        let before = w.load(Ordering::Acquire);
        assert!(w.compare_and_set(before, 7, false));
        let after = w.load(Ordering::Acquire);
        assert_eq!(after.index, 7);
        assert_eq!(after.aba, before.aba + 1);
    }

    #[test]
    fn cas_fails_on_stale_expected() {
        let w = MarkableWord::new(5, false);
        let stale = w.load(Ordering::Acquire);
        assert!(w.compare_and_set(stale, 7, false));
        // Reusing the now-stale snapshot must fail: aba moved on.
        assert!(!w.compare_and_set(stale, 9, false));
    }

    #[test]
    fn mark_is_idempotent() {
        let w = MarkableWord::new(3, false);
        let before = w.load(Ordering::Acquire);
        assert!(w.mark(before));
        let marked = w.load(Ordering::Acquire);
        assert!(marked.marked);
        assert!(w.mark(marked));
    }
}
