//! Master-record filename encoding (§6 "LSN-in-filename", `[SUPPLEMENT]` in
//! SPEC_FULL.md). A master record's filename embeds its checkpoint's
//! master-LSN and minimum-checkpoint-rec-LSN so recovery can pick the
//! right (most recent, not-too-new) one without reading file contents.
//!
//! Format: `chk_<masterLsn>_<minRecLsn>` with each LSN as fixed-width hex
//! (`%08x_%08x` per field), chosen so lexicographic filename sort agrees
//! with numeric LSN order — the same property §6's big-endian rule gives
//! binary fields, applied to text instead since a filename has no byte
//! layout to be endian about.

use crate::common::Lsn;
use crate::recovery::error::RecoveryError;

const PREFIX: &str = "chk_";
const CURRENT_VERSION: u32 = 1;

fn format_lsn(lsn: Lsn) -> String {
    format!("{:08x}-{:08x}", lsn.file, lsn.offset)
}

fn parse_lsn(s: &str) -> Result<Lsn, RecoveryError> {
    let (file_hex, offset_hex) = s
        .split_once('-')
        .ok_or_else(|| RecoveryError::BadMasterRecordName(s.to_string()))?;
    let file = u32::from_str_radix(file_hex, 16)
        .map_err(|_| RecoveryError::BadMasterRecordName(s.to_string()))?;
    let offset = u32::from_str_radix(offset_hex, 16)
        .map_err(|_| RecoveryError::BadMasterRecordName(s.to_string()))?;
    Ok(Lsn::new(file, offset))
}

/// Builds the filename for a master record at `master_lsn` whose
/// checkpoint's minimum dirty-page record LSN is `min_rec_lsn`.
pub fn encode_filename(master_lsn: Lsn, min_rec_lsn: Lsn) -> String {
    format!(
        "{PREFIX}v{CURRENT_VERSION}_{}_{}",
        format_lsn(master_lsn),
        format_lsn(min_rec_lsn)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterRecordName {
    pub version: u32,
    pub master_lsn: Lsn,
    pub min_rec_lsn: Lsn,
}

/// Parses a master record filename, rejecting any whose embedded version
/// is newer than this binary's (§6: "recovery rejects files whose
/// embedded version is newer than the current binary").
pub fn parse_filename(name: &str) -> Result<MasterRecordName, RecoveryError> {
    let rest = name
        .strip_prefix(PREFIX)
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    let rest = rest
        .strip_prefix('v')
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    let mut parts = rest.splitn(2, '_');
    let version_str = parts
        .next()
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    let version: u32 = version_str
        .parse()
        .map_err(|_| RecoveryError::BadMasterRecordName(name.to_string()))?;
    if version > CURRENT_VERSION {
        return Err(RecoveryError::UnsupportedMasterRecordVersion(version));
    }
    let lsn_part = parts
        .next()
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    let mut lsn_fields = lsn_part.splitn(2, '_');
    let master_field = lsn_fields
        .next()
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    let min_rec_field = lsn_fields
        .next()
        .ok_or_else(|| RecoveryError::BadMasterRecordName(name.to_string()))?;
    Ok(MasterRecordName {
        version,
        master_lsn: parse_lsn(master_field)?,
        min_rec_lsn: parse_lsn(min_rec_field)?,
    })
}

/// Chooses the newest master record by `master_lsn`, as recovery startup
/// would when scanning a directory listing (§6).
pub fn newest<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<MasterRecordName> {
    names
        .into_iter()
        .filter_map(|n| parse_filename(n).ok())
        .max_by_key(|m| m.master_lsn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let name = encode_filename(Lsn::new(2, 300), Lsn::new(1, 10));
        let parsed = parse_filename(&name).unwrap();
        assert_eq!(parsed.master_lsn, Lsn::new(2, 300));
        assert_eq!(parsed.min_rec_lsn, Lsn::new(1, 10));
    }

    #[test]
    fn rejects_future_version() {
        let bogus = format!("chk_v{}_00000002-0000012c_00000001-0000000a", CURRENT_VERSION + 1);
        assert!(matches!(
            parse_filename(&bogus),
            Err(RecoveryError::UnsupportedMasterRecordVersion(_))
        ));
    }

    #[test]
    fn rejects_malformed_name() {
        assert!(parse_filename("not_a_checkpoint").is_err());
    }

    #[test]
    fn newest_picks_highest_master_lsn() {
        let a = encode_filename(Lsn::new(1, 0), Lsn::new(1, 0));
        let b = encode_filename(Lsn::new(3, 0), Lsn::new(2, 0));
        let c = encode_filename(Lsn::new(2, 0), Lsn::new(1, 0));
        let picked = newest([a.as_str(), b.as_str(), c.as_str()]).unwrap();
        assert_eq!(picked.master_lsn, Lsn::new(3, 0));
    }
}
