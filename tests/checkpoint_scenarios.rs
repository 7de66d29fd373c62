//! End-to-end checkpoint reconstruction scenarios (S1-S6) against the
//! public API, as distinct from the implementation-level unit tests
//! alongside `CheckpointReconstructor` itself.

use rusty_txncore::common::Lsn;
use rusty_txncore::recovery::{
    BufTabEntry, CheckpointReconstructor, CheckpointableRecord, XctCheckpointState,
};

fn lsn(n: u32) -> Lsn {
    Lsn::new(0, n)
}

#[test]
fn s1_empty_checkpoint() {
    let tables = CheckpointReconstructor::reconstruct(Vec::new());
    assert_eq!(tables.buf_tab.len(), 0);
    assert_eq!(tables.xct_tab.len(), 0);
    assert_eq!(tables.highest_tid, None);
    assert_eq!(tables.min_rec_lsn, None);
    assert_eq!(tables.min_xct_lsn, None);
}

#[test]
fn s2_one_dirty_uncommitted_update() {
    let records = vec![CheckpointableRecord::PageUpdate {
        txn_id: 1,
        page_id: 1,
        lsn: lsn(1),
        undo_next: None,
    }];
    let tables = CheckpointReconstructor::reconstruct(records);
    assert_eq!(tables.buf_tab[&1], BufTabEntry { rec_lsn: lsn(1), page_lsn: lsn(1) });
    assert_eq!(tables.xct_tab[&1].first_lsn, lsn(1));
    assert_eq!(tables.xct_tab[&1].last_lsn, lsn(1));
    assert_eq!(tables.xct_tab[&1].state, XctCheckpointState::Active);
    assert_eq!(tables.highest_tid, Some(1));
    assert_eq!(tables.min_rec_lsn, Some(lsn(1)));
    assert_eq!(tables.min_xct_lsn, Some(lsn(1)));
}

#[test]
fn s3_two_updates_committed() {
    let records = vec![
        CheckpointableRecord::Commit { txn_id: 1, lsn: lsn(3) },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(2), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(1), undo_next: None },
    ];
    let tables = CheckpointReconstructor::reconstruct(records);
    assert_eq!(tables.buf_tab[&1], BufTabEntry { rec_lsn: lsn(1), page_lsn: lsn(2) });
    assert!(tables.xct_tab.is_empty());
    assert_eq!(tables.min_rec_lsn, Some(lsn(1)));
    assert_eq!(tables.min_xct_lsn, None);
}

#[test]
fn s4_partial_rollback() {
    let records = vec![
        CheckpointableRecord::Commit { txn_id: 1, lsn: lsn(5) },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(4), undo_next: Some(lsn(1)) },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(3), undo_next: Some(lsn(2)) },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(2), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(1), undo_next: None },
    ];
    let tables = CheckpointReconstructor::reconstruct(records);
    assert!(tables.xct_tab.is_empty());
    assert_eq!(tables.buf_tab[&1], BufTabEntry { rec_lsn: lsn(1), page_lsn: lsn(4) });
}

#[test]
fn s5_two_concurrent_one_commits() {
    let records = vec![
        CheckpointableRecord::Commit { txn_id: 2, lsn: lsn(5) },
        CheckpointableRecord::PageUpdate { txn_id: 2, page_id: 4, lsn: lsn(4), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 2, page_id: 3, lsn: lsn(3), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 2, lsn: lsn(2), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(1), undo_next: None },
    ];
    let tables = CheckpointReconstructor::reconstruct(records);
    assert_eq!(tables.buf_tab.len(), 4);
    assert_eq!(tables.xct_tab.len(), 1);
    assert_eq!(tables.xct_tab[&1].first_lsn, lsn(1));
    assert_eq!(tables.xct_tab[&1].last_lsn, lsn(2));
    assert_eq!(tables.highest_tid, Some(2));
}

#[test]
fn s6_cleaner_lost_update_tie_is_dirty() {
    let records = vec![
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 2, lsn: lsn(4), undo_next: None },
        CheckpointableRecord::PageWrite { page_id: 2, clean_lsn: lsn(3) },
        CheckpointableRecord::PageWrite { page_id: 1, clean_lsn: lsn(3) },
        CheckpointableRecord::Other { txn_id: 1, lsn: lsn(3) },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(2), undo_next: None },
        CheckpointableRecord::PageUpdate { txn_id: 1, page_id: 1, lsn: lsn(1), undo_next: None },
    ];
    let tables = CheckpointReconstructor::reconstruct(records);
    assert!(!tables.buf_tab.contains_key(&1));
    assert_eq!(tables.buf_tab[&2], BufTabEntry { rec_lsn: lsn(4), page_lsn: lsn(4) });
}
