//! Crate-level error type composing each subsystem's error taxonomy.
//!
//! Mirrors `transaction/error.rs`'s convention of a single
//! `thiserror`-derived enum per concern, except here each subsystem (lock,
//! log, recovery) keeps its own enum and this type only composes them for
//! callers that cross subsystem boundaries.

use thiserror::Error;

use crate::lock::LockError;
use crate::log::LogError;
use crate::recovery::RecoveryError;

pub type Result<T> = std::result::Result<T, TxnCoreError>;

#[derive(Debug, Error)]
pub enum TxnCoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}
