//! `CheckpointReconstructor` (§4.H): backward log scan rebuilding
//! `bufTab`, `xctTab`, and the scalar summaries a checkpoint record needs.
//!
//! A pure function over an iterator of already-decoded records, with no
//! dependency on a concrete page or B-tree type (§1 Non-goals) — callers
//! own turning their log's actual record stream into [`CheckpointableRecord`]
//! values, in backward (most-recent-first) order, the same direction
//! `log_core.cpp`'s recovery scan walks. The dirty-page tie rule ("clean-
//! lsn equal to page-lsn ⇒ dirty") is the explicit Open Question
//! resolution from §9, codified here rather than left implicit.

use std::collections::{HashMap, HashSet};

use crate::common::{Lsn, PageId, TransactionId};

/// One decoded log record, reduced to the fields the reconstructor's
/// algorithm actually inspects (§4.H).
#[derive(Debug, Clone)]
pub enum CheckpointableRecord {
    /// A page-modifying record (including ordinary updates and
    /// compensations — §4.H: "Compensation records are treated as updates
    /// for dirty-page accounting").
    PageUpdate {
        txn_id: TransactionId,
        page_id: PageId,
        lsn: Lsn,
        /// Set only for compensation records; respected when
        /// reconstructing an aborting transaction's undo cursor.
        undo_next: Option<Lsn>,
    },
    Commit { txn_id: TransactionId, lsn: Lsn },
    Abort { txn_id: TransactionId, lsn: Lsn },
    /// Any other transactional record that isn't page-modifying or
    /// terminal (e.g. a begin or a dummy/dummy-like record) but still
    /// belongs to a transaction's undo chain.
    Other { txn_id: TransactionId, lsn: Lsn },
    /// A cleaner's page-write event, advancing the page's clean-LSN.
    PageWrite { page_id: PageId, clean_lsn: Lsn },
}

impl CheckpointableRecord {
    fn lsn(&self) -> Lsn {
        match self {
            CheckpointableRecord::PageUpdate { lsn, .. } => *lsn,
            CheckpointableRecord::Commit { lsn, .. } => *lsn,
            CheckpointableRecord::Abort { lsn, .. } => *lsn,
            CheckpointableRecord::Other { lsn, .. } => *lsn,
            CheckpointableRecord::PageWrite { clean_lsn, .. } => *clean_lsn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufTabEntry {
    pub rec_lsn: Lsn,
    pub page_lsn: Lsn,
}

/// A transaction's status as of the checkpoint (§3 "CheckpointTables":
/// `xctTab: TransactionId → (firstLsn, lastLsn, lockList, state)"). A
/// commit or abort record removes the transaction's entry entirely
/// (§4.H), so any entry the reconstructor hands back describes a
/// transaction still in flight at scan time; `Active` is the only value
/// a pure log scan can ever assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XctCheckpointState {
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XctTabEntry {
    pub first_lsn: Lsn,
    pub last_lsn: Lsn,
    /// Resource hashes this transaction held locks on, as of the
    /// checkpoint. The reconstructor itself never populates this — a pure
    /// log scan has no visibility into the live `LockTable` — so it is
    /// always empty here; a caller combining this with component B's
    /// state fills it in afterward.
    pub lock_list: Vec<u32>,
    pub undo_next: Option<Lsn>,
    pub state: XctCheckpointState,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointTables {
    pub buf_tab: HashMap<PageId, BufTabEntry>,
    pub xct_tab: HashMap<TransactionId, XctTabEntry>,
    pub bkp_path: Option<String>,
    pub highest_tid: Option<TransactionId>,
    pub min_rec_lsn: Option<Lsn>,
    pub min_xct_lsn: Option<Lsn>,
}

pub struct CheckpointReconstructor;

impl CheckpointReconstructor {
    /// Replays `records` (already in backward, tail-to-start order) per
    /// §4.H, producing the tables a checkpoint record would capture.
    pub fn reconstruct(records: impl IntoIterator<Item = CheckpointableRecord>) -> CheckpointTables {
        let mut buf_tab: HashMap<PageId, BufTabEntry> = HashMap::new();
        let mut xct_tab: HashMap<TransactionId, XctTabEntry> = HashMap::new();
        let mut ended: HashSet<TransactionId> = HashSet::new();
        let mut clean_lsn: HashMap<PageId, Lsn> = HashMap::new();
        let mut highest_tid: Option<TransactionId> = None;

        for record in records {
            let lsn = record.lsn();
            match &record {
                CheckpointableRecord::PageUpdate {
                    txn_id,
                    page_id,
                    lsn,
                    undo_next,
                } => {
                    highest_tid = Some(highest_tid.map_or(*txn_id, |h| h.max(*txn_id)));
                    let entry = buf_tab.entry(*page_id).or_insert(BufTabEntry {
                        rec_lsn: *lsn,
                        page_lsn: *lsn,
                    });
                    if entry.rec_lsn > *lsn {
                        entry.rec_lsn = *lsn;
                    }
                    if !ended.contains(txn_id) {
                        record_txn_sighting(&mut xct_tab, *txn_id, *lsn, *undo_next);
                    }
                }
                CheckpointableRecord::Commit { txn_id, lsn: _ } | CheckpointableRecord::Abort { txn_id, lsn: _ } => {
                    highest_tid = Some(highest_tid.map_or(*txn_id, |h| h.max(*txn_id)));
                    ended.insert(*txn_id);
                    xct_tab.remove(txn_id);
                }
                CheckpointableRecord::Other { txn_id, lsn } => {
                    highest_tid = Some(highest_tid.map_or(*txn_id, |h| h.max(*txn_id)));
                    if !ended.contains(txn_id) {
                        record_txn_sighting(&mut xct_tab, *txn_id, *lsn, None);
                    }
                }
                CheckpointableRecord::PageWrite { page_id, clean_lsn: c } => {
                    clean_lsn.entry(*page_id).or_insert(*c);
                }
            }
            let _ = lsn;
        }

        // Cleaner-lost-update rule (§4.H, §9 Open Question resolution):
        // a page remains dirty unless its latest page-lsn is *strictly
        // less than* the clean-lsn advertised for it; a tie is
        // conservatively dirty.
        buf_tab.retain(|page_id, entry| match clean_lsn.get(page_id) {
            Some(c) => !(entry.page_lsn < *c),
            None => true,
        });

        let min_rec_lsn = buf_tab.values().map(|e| e.rec_lsn).min();
        let min_xct_lsn = xct_tab.values().map(|e| e.first_lsn).min();

        CheckpointTables {
            buf_tab,
            xct_tab,
            bkp_path: None,
            highest_tid,
            min_rec_lsn,
            min_xct_lsn,
        }
    }
}

fn record_txn_sighting(
    xct_tab: &mut HashMap<TransactionId, XctTabEntry>,
    txn_id: TransactionId,
    lsn: Lsn,
    undo_next: Option<Lsn>,
) {
    match xct_tab.get_mut(&txn_id) {
        Some(entry) => {
            // Backward scan: each later sighting is an *older* record.
            if lsn < entry.first_lsn {
                entry.first_lsn = lsn;
            }
            if undo_next.is_some() {
                entry.undo_next = undo_next;
            }
        }
        None => {
            xct_tab.insert(
                txn_id,
                XctTabEntry {
                    first_lsn: lsn,
                    last_lsn: lsn,
                    lock_list: Vec::new(),
                    undo_next,
                    state: XctCheckpointState::Active,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        assert_eq!(
            tables.buf_tab[&1],
            BufTabEntry {
                rec_lsn: lsn(1),
                page_lsn: lsn(1)
            }
        );
        assert_eq!(tables.xct_tab[&1].first_lsn, lsn(1));
        assert_eq!(tables.xct_tab[&1].last_lsn, lsn(1));
        assert_eq!(tables.xct_tab[&1].state, XctCheckpointState::Active);
        assert_eq!(tables.highest_tid, Some(1));
        assert_eq!(tables.min_rec_lsn, Some(lsn(1)));
        assert_eq!(tables.min_xct_lsn, Some(lsn(1)));
    }

    #[test]
    fn s3_two_updates_committed() {
        // Backward order: commit, lsn2, lsn1.
        let records = vec![
            CheckpointableRecord::Commit { txn_id: 1, lsn: lsn(3) },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(2),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(1),
                undo_next: None,
            },
        ];
        let tables = CheckpointReconstructor::reconstruct(records);
        assert_eq!(
            tables.buf_tab[&1],
            BufTabEntry {
                rec_lsn: lsn(1),
                page_lsn: lsn(2)
            }
        );
        assert!(tables.xct_tab.is_empty());
        assert_eq!(tables.min_rec_lsn, Some(lsn(1)));
        assert_eq!(tables.min_xct_lsn, None);
    }

    #[test]
    fn s4_partial_rollback() {
        let records = vec![
            CheckpointableRecord::Commit { txn_id: 1, lsn: lsn(5) },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(4),
                undo_next: Some(lsn(1)),
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(3),
                undo_next: Some(lsn(2)),
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(2),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(1),
                undo_next: None,
            },
        ];
        let tables = CheckpointReconstructor::reconstruct(records);
        assert!(tables.xct_tab.is_empty());
        assert_eq!(
            tables.buf_tab[&1],
            BufTabEntry {
                rec_lsn: lsn(1),
                page_lsn: lsn(4)
            }
        );
    }

    #[test]
    fn s5_two_concurrent_one_commits() {
        let records = vec![
            CheckpointableRecord::Commit { txn_id: 2, lsn: lsn(5) },
            CheckpointableRecord::PageUpdate {
                txn_id: 2,
                page_id: 4,
                lsn: lsn(4),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 2,
                page_id: 3,
                lsn: lsn(3),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 2,
                lsn: lsn(2),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(1),
                undo_next: None,
            },
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
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 2,
                lsn: lsn(4),
                undo_next: None,
            },
            CheckpointableRecord::PageWrite {
                page_id: 2,
                clean_lsn: lsn(3),
            },
            CheckpointableRecord::PageWrite {
                page_id: 1,
                clean_lsn: lsn(3),
            },
            CheckpointableRecord::Other { txn_id: 1, lsn: lsn(3) },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(2),
                undo_next: None,
            },
            CheckpointableRecord::PageUpdate {
                txn_id: 1,
                page_id: 1,
                lsn: lsn(1),
                undo_next: None,
            },
        ];
        let tables = CheckpointReconstructor::reconstruct(records);
        // Page 1's latest write (lsn2) is strictly before its clean-lsn
        // (lsn3): clean, dropped.
        assert!(!tables.buf_tab.contains_key(&1));
        // Page 2's only write (lsn4) is not before its clean-lsn (lsn3):
        // stays dirty, rec == page == lsn4.
        assert_eq!(
            tables.buf_tab[&2],
            BufTabEntry {
                rec_lsn: lsn(4),
                page_lsn: lsn(4)
            }
        );
    }
}
