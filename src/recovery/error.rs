//! Recovery-subsystem error taxonomy (§7 subset relevant to checkpoint
//! reconstruction and master-record handling).

use thiserror::Error;

pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("malformed master record filename: {0}")]
    BadMasterRecordName(String),

    #[error("master record version {0} is newer than this binary supports")]
    UnsupportedMasterRecordVersion(u32),

    #[error("no master record found")]
    NoMasterRecord,

    #[error("internal recovery error: {0}")]
    Internal(String),
}
