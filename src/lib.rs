// rusty-txncore - RAW-style lock manager, segmented write-ahead log, and
// checkpoint recovery substrate for a transactional storage engine.

pub mod common;
pub mod error;
pub mod lock;
pub mod log;
pub mod options;
pub mod recovery;

pub use error::{Result, TxnCoreError};
pub use options::{OptionValue, Options};
