//! Log-subsystem error taxonomy (§7 subset: OutOfLogSpace, BadCompensation,
//! EOF, Internal).

use thiserror::Error;

pub type LogResult<T> = std::result::Result<T, LogError>;

#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// Reservation denied; propagates through `insert` after the cohort
    /// copy (§4.G "acquireBufferSpace", §7).
    #[error("out of log space")]
    OutOfLogSpace,

    /// Compensation target is already durable, split across a segment
    /// boundary, or already marked as an undoable CLR (§4.G "compensate",
    /// §7).
    #[error("bad compensation request: {0}")]
    BadCompensation(String),

    /// Fetch past `currLsn`, or into an unopened partition that cannot be
    /// the target (§4.G "Fetch", §7).
    #[error("log read past end of file: {0}")]
    Eof(String),

    /// Invariant violation or unexpected OS error; fatal (§7).
    #[error("internal log error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Internal(e.to_string())
    }
}

impl LogError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, LogError::OutOfLogSpace)
    }
}
