//! On-disk log record framing and the in-memory `Epoch` tracker (§4.E).
//!
//! Grounded on `transaction/wal_manager.rs`'s `WALEntry` (serde-tagged enum,
//! length-prefixed framing written with `serde_json`) generalized to carry
//! the fields §4.E requires that `WALEntry` doesn't: a `pagePrev` chain, a
//! trailing self-describing LSN, and a CRC32C trailer checksum (§6
//! "corruption detection"). Multi-byte trailer fields are big-endian per §6
//! so a lexicographic byte compare of two trailers agrees with LSN order.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};

use crate::common::{Lsn, PageId, TransactionId};
use crate::log::error::{LogError, LogResult};

/// 8-byte length prefix + 8-byte LSN + 4-byte CRC32C trailer.
pub const TRAILER_LEN: usize = 8 + 4;
pub const HEADER_LEN: usize = 8;
/// Fixed-width CLR marker immediately after the length prefix: 1-byte
/// present flag + 8-byte packed `undo_lsn`. Kept out of the JSON body and
/// at a constant offset so `compensate` can flip it in place without ever
/// changing a record's framed length (§4.G "compensate", §8 invariant 7).
pub const COMP_MARKER_LEN: usize = 1 + 8;

/// Record payload discriminant. A closed set rather than the dynamic
/// dispatch the upstream WAL entries might suggest — §9 Design Note: "use a
/// closed variant set parameterized by record kind rather than trait
/// objects."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Begin,
    Commit,
    Abort,
    Update,
    Compensation,
    Checkpoint,
    /// Terminates every partition (§4.E, §4.G "state machine per partition
    /// file"); recognized by this tag alone, carries no payload.
    Skip,
}

/// A compensation record's target: the LSN it compensates for and the LSN
/// undo traversal should continue at instead of `prev_lsn` (§4.G
/// "compensate", §8 invariant 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationInfo {
    pub undo_lsn: Lsn,
}

/// Extra fields carried by a record touching two pages at once (§4.E
/// "multi-page records").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondPage {
    pub page_id: PageId,
    pub page_prev: Lsn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub txn_id: TransactionId,
    /// Prior record of the same transaction, for undo-chain traversal.
    pub prev_lsn: Lsn,
    /// Prior record touching the same page, for per-page recovery.
    pub page_prev: Lsn,
    pub page_id: Option<PageId>,
    pub payload: Vec<u8>,
    /// Carried at a fixed offset in the frame rather than in the JSON
    /// body (see [`COMP_MARKER_LEN`]) so `compensate` can set it in place.
    #[serde(skip)]
    pub compensation: Option<CompensationInfo>,
    pub second_page: Option<SecondPage>,
}

impl LogRecord {
    pub fn skip(txn_id: TransactionId) -> Self {
        Self {
            kind: RecordKind::Skip,
            txn_id,
            prev_lsn: Lsn::NULL,
            page_prev: Lsn::NULL,
            page_id: None,
            payload: Vec::new(),
            compensation: None,
            second_page: None,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.kind == RecordKind::Skip
    }

    /// A compensation record is never itself undoable (§4.G "compensate":
    /// "verify it is not itself an undoable CLR").
    pub fn is_undoable(&self) -> bool {
        matches!(self.kind, RecordKind::Update) && self.compensation.is_none()
    }

    /// Encodes this record's JSON body alone — never includes
    /// `compensation`, which lives in the fixed-width marker instead.
    fn encode_body(&self) -> LogResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| LogError::Internal(format!("failed to encode log record: {e}")))
    }

    fn encode_comp_marker(&self) -> [u8; COMP_MARKER_LEN] {
        let mut marker = [0u8; COMP_MARKER_LEN];
        if let Some(info) = &self.compensation {
            marker[0] = 1;
            marker[1..9].copy_from_slice(&pack_lsn(info.undo_lsn));
        }
        marker
    }

    fn decode_comp_marker(marker: &[u8]) -> Option<CompensationInfo> {
        if marker[0] == 0 {
            None
        } else {
            Some(CompensationInfo {
                undo_lsn: unpack_lsn(marker[1..9].try_into().unwrap()),
            })
        }
    }

    /// Frames this record for append at `lsn`: `[len:u64 BE][compMarker:9
    /// bytes][body][lsn:u64 BE][crc32c:u32 BE]`, then pads to an 8-byte
    /// boundary. The CRC covers the length prefix, marker, and body but not
    /// the lsn/crc trailer itself, so `decode` can verify before trusting
    /// the claimed length. The marker's fixed width means `compensate` can
    /// flip it without ever resizing the frame.
    pub fn encode(&self, lsn: Lsn) -> LogResult<Vec<u8>> {
        let body = self.encode_body()?;
        let unpadded_len = HEADER_LEN + COMP_MARKER_LEN + body.len() + TRAILER_LEN;
        let mut out = Vec::with_capacity(unpadded_len.next_multiple_of(8));
        out.extend_from_slice(&(unpadded_len as u64).to_be_bytes());
        out.extend_from_slice(&self.encode_comp_marker());
        out.extend_from_slice(&body);
        let checksum = crc32c(&out);
        out.extend_from_slice(&pack_lsn(lsn));
        out.extend_from_slice(&checksum.to_be_bytes());
        while out.len() % 8 != 0 {
            out.push(0);
        }
        Ok(out)
    }

    /// Decodes a record framed by [`encode`], returning the record and the
    /// LSN it self-identifies as. Verifies the trailer checksum against the
    /// header+marker+body bytes before trusting anything (§6 "corruption
    /// detection").
    pub fn decode(bytes: &[u8]) -> LogResult<(LogRecord, Lsn)> {
        let min_len = HEADER_LEN + COMP_MARKER_LEN + TRAILER_LEN;
        if bytes.len() < min_len {
            return Err(LogError::Eof("record shorter than minimum frame".into()));
        }
        let claimed_len = u64::from_be_bytes(bytes[0..HEADER_LEN].try_into().unwrap()) as usize;
        if claimed_len > bytes.len() || claimed_len < min_len {
            return Err(LogError::Internal(format!(
                "corrupt record: claimed length {claimed_len} outside buffer of {}",
                bytes.len()
            )));
        }
        let body_end = claimed_len - TRAILER_LEN;
        let marker = &bytes[HEADER_LEN..HEADER_LEN + COMP_MARKER_LEN];
        let body = &bytes[HEADER_LEN + COMP_MARKER_LEN..body_end];
        let trailer = &bytes[body_end..claimed_len];
        let lsn = unpack_lsn(trailer[0..8].try_into().unwrap());
        let stored_checksum = u32::from_be_bytes(trailer[8..12].try_into().unwrap());
        let actual_checksum = crc32c(&bytes[0..body_end]);
        if stored_checksum != actual_checksum {
            return Err(LogError::Internal(format!(
                "checksum mismatch at {lsn}: stored {stored_checksum:#x}, computed {actual_checksum:#x}"
            )));
        }
        let mut record: LogRecord = serde_json::from_slice(body)
            .map_err(|e| LogError::Internal(format!("failed to decode log record at {lsn}: {e}")))?;
        record.compensation = Self::decode_comp_marker(marker);
        Ok((record, lsn))
    }

    /// Flips the fixed-width CLR marker of an already-framed record in
    /// place (`buffer[frame_start..]`) and recomputes the trailer checksum
    /// over the affected prefix, without touching the body bytes or
    /// changing the frame's length. Used by `compensate` so turning a
    /// record into a CLR never disturbs neighboring records in the buffer.
    pub fn patch_comp_marker_in_place(buffer: &mut [u8], frame_start: usize, undo_lsn: Lsn) -> LogResult<()> {
        if buffer.len() < frame_start + HEADER_LEN {
            return Err(LogError::Internal("frame_start out of range for comp marker patch".into()));
        }
        let claimed_len = u64::from_be_bytes(
            buffer[frame_start..frame_start + HEADER_LEN].try_into().unwrap(),
        ) as usize;
        let body_end = frame_start
            + claimed_len
                .checked_sub(TRAILER_LEN)
                .ok_or_else(|| LogError::Internal("corrupt frame length during comp patch".into()))?;
        let marker_start = frame_start + HEADER_LEN;
        buffer[marker_start] = 1;
        buffer[marker_start + 1..marker_start + 9].copy_from_slice(&pack_lsn(undo_lsn));
        let checksum = crc32c(&buffer[frame_start..body_end]);
        buffer[body_end + 8..body_end + 12].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}

fn pack_lsn(lsn: Lsn) -> [u8; 8] {
    let word = ((lsn.file as u64) << 32) | (lsn.offset as u64);
    word.to_be_bytes()
}

fn unpack_lsn(bytes: [u8; 8]) -> Lsn {
    let word = u64::from_be_bytes(bytes);
    Lsn::new((word >> 32) as u32, word as u32)
}

/// A contiguous range of the circular log buffer, anchored to the LSN of its
/// first byte (§4.E). Bytes wrap modulo `segSize`; `base_lsn` is the LSN that
/// `base_offset` (byte 0 of this epoch, not of the buffer) corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    pub base_lsn: Lsn,
    pub base_offset: u64,
    pub start: usize,
    pub end: usize,
}

impl Epoch {
    pub fn new(base_lsn: Lsn, base_offset: u64, start: usize) -> Self {
        Self { base_lsn, base_offset, start, end: start }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The LSN of the byte at buffer offset `pos`, which must fall within
    /// `[start, end)`.
    pub fn lsn_at(&self, pos: usize) -> Lsn {
        debug_assert!(pos >= self.start && pos <= self.end);
        Lsn::new(self.base_lsn.file, self.base_lsn.offset + (pos - self.start) as u32)
    }

    /// Starts the next epoch after a wrap that stays within the same
    /// partition: `baseLsn += segSize` (§4.E).
    pub fn next_within_partition(&self, seg_size: usize) -> Self {
        Self::new(self.base_lsn.advance(seg_size as u32), self.base_offset + seg_size as u64, 0)
    }

    /// Starts the next epoch after a wrap that crosses into a new partition
    /// file: base resets to that partition's first LSN (§4.E).
    pub fn next_across_partition(&self) -> Self {
        Self::new(self.base_lsn.next_partition(), self.base_offset, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        LogRecord {
            kind: RecordKind::Update,
            txn_id: 7,
            prev_lsn: Lsn::new(0, 100),
            page_prev: Lsn::new(0, 50),
            page_id: Some(42),
            payload: vec![1, 2, 3, 4],
            compensation: None,
            second_page: None,
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let record = sample();
        let lsn = Lsn::new(0, 200);
        let bytes = record.encode(lsn).unwrap();
        assert_eq!(bytes.len() % 8, 0);
        let (decoded, decoded_lsn) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded_lsn, lsn);
    }

    #[test]
    fn decode_rejects_corrupted_body() {
        let record = sample();
        let mut bytes = record.encode(Lsn::new(0, 200)).unwrap();
        let mutate_at = HEADER_LEN + 2;
        bytes[mutate_at] ^= 0xFF;
        assert!(matches!(LogRecord::decode(&bytes), Err(LogError::Internal(_))));
    }

    #[test]
    fn skip_record_is_recognized() {
        let record = LogRecord::skip(0);
        assert!(record.is_skip());
        assert!(!record.is_undoable());
    }

    #[test]
    fn compensation_record_is_not_undoable() {
        let mut record = sample();
        record.compensation = Some(CompensationInfo { undo_lsn: Lsn::new(0, 50) });
        assert!(!record.is_undoable());
    }

    #[test]
    fn compensation_marker_does_not_change_frame_length() {
        let lsn = Lsn::new(0, 200);
        let plain = sample().encode(lsn).unwrap();

        let mut compensated = sample();
        compensated.compensation = Some(CompensationInfo { undo_lsn: Lsn::new(0, 50) });
        let compensated = compensated.encode(lsn).unwrap();

        assert_eq!(plain.len(), compensated.len());

        let (decoded, _) = LogRecord::decode(&compensated).unwrap();
        assert_eq!(decoded.compensation, Some(CompensationInfo { undo_lsn: Lsn::new(0, 50) }));
    }

    #[test]
    fn patch_comp_marker_in_place_preserves_length_and_trailing_bytes() {
        let lsn = Lsn::new(0, 200);
        let mut buffer = sample().encode(lsn).unwrap();
        let original_len = buffer.len();
        buffer.extend_from_slice(&[0xAB; 16]);

        LogRecord::patch_comp_marker_in_place(&mut buffer, 0, Lsn::new(0, 99)).unwrap();

        assert_eq!(buffer.len(), original_len + 16);
        assert_eq!(&buffer[original_len..], &[0xAB; 16]);
        let (decoded, decoded_lsn) = LogRecord::decode(&buffer).unwrap();
        assert_eq!(decoded_lsn, lsn);
        assert_eq!(decoded.compensation, Some(CompensationInfo { undo_lsn: Lsn::new(0, 99) }));
    }

    #[test]
    fn epoch_within_partition_wrap_advances_base_lsn() {
        let epoch = Epoch::new(Lsn::new(0, 0), 0, 0);
        let next = epoch.next_within_partition(1024);
        assert_eq!(next.base_lsn, Lsn::new(0, 1024));
        assert_eq!(next.base_offset, 1024);
        assert_eq!(next.start, 0);
    }

    #[test]
    fn epoch_across_partition_wrap_resets_to_next_file() {
        let epoch = Epoch::new(Lsn::new(0, 900), 900, 100);
        let next = epoch.next_across_partition();
        assert_eq!(next.base_lsn, Lsn::new(1, 0));
        assert_eq!(next.start, 0);
    }
}
