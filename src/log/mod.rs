//! Write-ahead log: record framing, consolidation-array batched appends,
//! partition lifecycle, and the core buffer/flush/compensate/fetch engine
//! (§3, §4.E–§4.G).

pub mod consolidation;
pub mod core;
pub mod error;
pub mod partition;
pub mod record;

pub use consolidation::{ConsolidationArray, JoinResult, SlotReservation};
pub use core::{LogCore, LogCoreConfig};
pub use error::{LogError, LogResult};
pub use partition::{Partition, PartitionState};
pub use record::{CompensationInfo, Epoch, LogRecord, RecordKind, SecondPage};
