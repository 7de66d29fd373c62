//! Checkpoint reconstruction, oldest-LSN tracking, and master-record
//! bookkeeping (§4.A, §4.H).

pub mod checkpoint;
pub mod error;
pub mod master;
pub mod oldest_lsn;

pub use checkpoint::{
    BufTabEntry, CheckpointReconstructor, CheckpointTables, CheckpointableRecord, XctCheckpointState,
    XctTabEntry,
};
pub use error::{RecoveryError, RecoveryResult};
pub use master::{encode_filename, newest, parse_filename, MasterRecordName};
pub use oldest_lsn::OldestLsnTracker;
