//! RAW-style lock manager (§1, §3, §4.A–§4.D): per-bucket singly-linked
//! lock queues with lock-free traversal, deadlock detection via blocker-
//! chain walk, and epoch-based reclamation of lock/xct objects.
//!
//! Grounded overall on `transaction/lock_manager.rs` and `deadlock.rs` for
//! module shape and error-handling idiom, and on `src/sm/lock_raw.{h,cpp}`
//! / `log_lsn_tracker.{h,cpp}` for the RAW algorithm itself (see
//! DESIGN.md for the full grounding ledger).

pub mod entry;
pub mod error;
pub mod markable;
pub mod mode;
pub mod pool;
pub mod queue;
pub mod shadow;

pub use entry::{LockEntry, LockState};
pub use error::{LockError, LockResult};
pub use mode::{KeyMode, LockMode, RangeMode};
pub use pool::{GenerationalPool, PoolConfig, PoolHandle, RetirementClock, SyntheticClock};
pub use queue::{AcquireOutcome, LockContext, LockQueue, LockTable, LoserRollback};
pub use shadow::{detect_cycle, CycleCheck, TransactionShadow, XctState};
