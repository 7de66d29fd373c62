//! S7: two real OS threads each hold an S-lock on their own key and
//! request X on the other's key. Exactly one must see `Deadlock`; the
//! other keeps going and is eventually granted. Once both transactions
//! have released everything (the deadlock loser as if aborting), the
//! table has no conflicting entries left on either key.

use std::sync::{Arc, Barrier};
use std::thread;

use rusty_txncore::lock::{
    AcquireOutcome, LockContext, LockError, LockMode, LockTable, TransactionShadow,
};

#[test]
fn two_threads_deadlock_one_aborts_one_proceeds() {
    let table = Arc::new(LockTable::new(16));
    let lock_pool = rusty_txncore::lock::GenerationalPool::new(Default::default());
    let xct_pool = rusty_txncore::lock::GenerationalPool::new(Default::default());
    let barrier = Arc::new(Barrier::new(2));

    const HASH_A: u32 = 100;
    const HASH_B: u32 = 200;

    let run = |own_hash: u32, other_hash: u32, txn_id: u64, thread_id: u64| {
        let table = Arc::clone(&table);
        let lock_pool = Arc::clone(&lock_pool);
        let xct_pool = Arc::clone(&xct_pool);
        let barrier = Arc::clone(&barrier);
        move || {
            let shadow = xct_pool.allocate(TransactionShadow::new(txn_id, thread_id));
            let ctx = LockContext {
                lock_pool: &lock_pool,
                xct_pool: &xct_pool,
                loser_rollback: None,
            };

            let own_handle = match table
                .acquire(&ctx, shadow, txn_id, own_hash, LockMode::S, 0, false, false)
                .expect("uncontended S grant on own key")
            {
                AcquireOutcome::Granted(h) => h,
                _ => panic!("expected Granted"),
            };

            barrier.wait();

            let result = table.acquire(&ctx, shadow, txn_id, other_hash, LockMode::X, 5_000, false, false);
            (shadow, own_handle, result)
        }
    };

    let t1 = thread::spawn(run(HASH_A, HASH_B, 1, 1));
    let t2 = thread::spawn(run(HASH_B, HASH_A, 2, 2));

    let (shadow1, own1, result1) = t1.join().unwrap();
    let (shadow2, own2, result2) = t2.join().unwrap();

    let deadlocks = [&result1, &result2]
        .iter()
        .filter(|r| matches!(r, Err(LockError::Deadlock { .. })))
        .count();
    let grants = [&result1, &result2]
        .iter()
        .filter(|r| matches!(r, Ok(AcquireOutcome::Granted(_))))
        .count();
    assert_eq!(deadlocks, 1, "exactly one side should detect the cycle");
    assert_eq!(grants, 1, "the other side should proceed to a grant");

    let ctx = LockContext {
        lock_pool: &lock_pool,
        xct_pool: &xct_pool,
        loser_rollback: None,
    };

    // Simulate both transactions aborting/committing and releasing every
    // lock they hold, including the deadlock loser's original S-lock.
    table.release(&ctx, own1, None);
    table.release(&ctx, own2, None);
    if let Ok(AcquireOutcome::Granted(h)) = result1 {
        table.release(&ctx, h, None);
    }
    if let Ok(AcquireOutcome::Granted(h)) = result2 {
        table.release(&ctx, h, None);
    }

    let _ = (shadow1, shadow2);

    // With everything released, a fresh conditional request on either key
    // must find the queue empty of conflicting entries.
    let probe = xct_pool.allocate(TransactionShadow::new(99, 99));
    let probe_ctx = LockContext {
        lock_pool: &lock_pool,
        xct_pool: &xct_pool,
        loser_rollback: None,
    };
    assert_eq!(
        table
            .acquire(&probe_ctx, probe, 99, HASH_A, LockMode::X, 0, true, false)
            .unwrap(),
        AcquireOutcome::CheckedCompatible
    );
    assert_eq!(
        table
            .acquire(&probe_ctx, probe, 99, HASH_B, LockMode::X, 0, true, false)
            .unwrap(),
        AcquireOutcome::CheckedCompatible
    );
}
