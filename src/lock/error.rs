//! Lock-subsystem error taxonomy (§7 subset: Deadlock, LockTimeout,
//! ConditionalLockTimeout, plus the on-demand-undo retry signal).
//!
//! Grounded on `transaction/error.rs`'s grouped-variant, helper-constructor
//! convention (`lock_timeout`, `deadlock`, ...).

use thiserror::Error;

use crate::common::TransactionId;

pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// Detected by the cycle check; caller must abort (§4.B "Deadlock
    /// check", §7).
    #[error("deadlock detected: transaction {txn_id} waits on a cycle")]
    Deadlock { txn_id: TransactionId },

    /// The wait timer expired (§4.B step 6, §7).
    #[error("lock wait timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: i64 },

    /// Immediate return with the entry retained so the caller can retry
    /// after releasing its page latch (§4.B step 5, §7).
    #[error("conditional lock request could not be granted immediately")]
    ConditionalLockTimeout,

    /// On-demand undo's latch acquisition on the loser transaction timed
    /// out; the caller should retry rather than the queue guessing at the
    /// loser's state (§4.B step 4).
    #[error("on-demand undo latch acquisition timed out, retry")]
    Retry,

    /// Invariant violation or unexpected internal state; fatal (§7).
    #[error("internal lock manager error: {0}")]
    Internal(String),
}

impl LockError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LockError::ConditionalLockTimeout | LockError::Retry
        )
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, LockError::Deadlock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_is_not_retriable() {
        let e = LockError::Deadlock { txn_id: 1 };
        assert!(e.is_deadlock());
        assert!(!e.is_retriable());
    }

    #[test]
    fn conditional_timeout_is_retriable() {
        assert!(LockError::ConditionalLockTimeout.is_retriable());
    }
}
