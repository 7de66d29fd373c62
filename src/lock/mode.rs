//! Ordered-key-value lock lattice (§3 "LockEntry", `{N, IS, IX, S, SIX,
//! X}×{N, S, X}`).
//!
//! `transaction/types.rs`'s `LockMode` is a flat six-variant enum with its
//! own compatibility table; that doesn't have the two independent
//! dimensions (range intention mode, key mode) the OKVL lattice needs, so
//! this is a from-scratch lattice rather than a generalization of that
//! enum. The compatibility tables themselves are the standard
//! multi-granularity intention-lock matrices, applied independently per
//! dimension — see DESIGN.md for why a per-dimension product is used
//! instead of a single packed 18-entry matrix.

use std::fmt;

/// Range-granularity component of an OKVL mode: the usual intention-lock
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeMode {
    N,
    IS,
    IX,
    S,
    SIX,
    X,
}

/// Key-granularity component of an OKVL mode: a plain three-value lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyMode {
    N,
    S,
    X,
}

impl RangeMode {
    fn index(self) -> usize {
        match self {
            RangeMode::N => 0,
            RangeMode::IS => 1,
            RangeMode::IX => 2,
            RangeMode::S => 3,
            RangeMode::SIX => 4,
            RangeMode::X => 5,
        }
    }

    fn from_index(i: usize) -> Self {
        match i {
            0 => RangeMode::N,
            1 => RangeMode::IS,
            2 => RangeMode::IX,
            3 => RangeMode::S,
            4 => RangeMode::SIX,
            _ => RangeMode::X,
        }
    }
}

#[rustfmt::skip]
const RANGE_COMPATIBLE: [[bool; 6]; 6] = [
    // N      IS     IX     S      SIX    X
    [ true,  true,  true,  true,  true,  true  ], // N
    [ true,  true,  true,  true,  true,  false ], // IS
    [ true,  true,  true,  false, false, false ], // IX
    [ true,  true,  false, true,  false, false ], // S
    [ true,  true,  false, false, false, false ], // SIX
    [ true,  false, false, false, false, false ], // X
];

#[rustfmt::skip]
const RANGE_COMBINE: [[usize; 6]; 6] = [
    [0, 1, 2, 3, 4, 5],
    [1, 1, 2, 3, 4, 5],
    [2, 2, 2, 4, 4, 5],
    [3, 3, 4, 3, 4, 5],
    [4, 4, 4, 4, 4, 5],
    [5, 5, 5, 5, 5, 5],
];

impl RangeMode {
    pub fn is_compatible(self, other: RangeMode) -> bool {
        RANGE_COMPATIBLE[self.index()][other.index()]
    }

    pub fn combine(self, other: RangeMode) -> RangeMode {
        RangeMode::from_index(RANGE_COMBINE[self.index()][other.index()])
    }
}

impl KeyMode {
    fn index(self) -> usize {
        match self {
            KeyMode::N => 0,
            KeyMode::S => 1,
            KeyMode::X => 2,
        }
    }

    pub fn is_compatible(self, other: KeyMode) -> bool {
        !(self == KeyMode::X && other != KeyMode::N) && !(other == KeyMode::X && self != KeyMode::N)
    }

    pub fn combine(self, other: KeyMode) -> KeyMode {
        match self.index().max(other.index()) {
            0 => KeyMode::N,
            1 => KeyMode::S,
            _ => KeyMode::X,
        }
    }

    pub fn has_read_component(self) -> bool {
        matches!(self, KeyMode::S | KeyMode::X)
    }

    pub fn has_write_component(self) -> bool {
        matches!(self, KeyMode::X)
    }
}

/// A full OKVL mode: a range-granularity intention mode plus a
/// key-granularity mode, as held by one `LockEntry` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockMode {
    pub range: RangeMode,
    pub key: KeyMode,
}

impl LockMode {
    pub const fn new(range: RangeMode, key: KeyMode) -> Self {
        Self { range, key }
    }

    /// Plain exclusive key lock with IX range intention — the common case
    /// for a B-tree-style point update, used throughout the tests.
    pub const X: LockMode = LockMode::new(RangeMode::IX, KeyMode::X);
    /// Plain shared key lock with IS range intention.
    pub const S: LockMode = LockMode::new(RangeMode::IS, KeyMode::S);
    pub const N: LockMode = LockMode::new(RangeMode::N, KeyMode::N);

    /// Two modes are compatible iff both dimensions are independently
    /// compatible (§4.B step 3's "mode does not grant" check).
    pub fn is_compatible(&self, other: &LockMode) -> bool {
        self.range.is_compatible(other.range) && self.key.is_compatible(other.key)
    }

    /// Lattice join: the weakest mode that dominates both inputs, used by
    /// `TransactionShadow::granted_mode` to fold a transaction's Active
    /// entries on one hash into a single effective mode (§4.C).
    pub fn join(&self, other: &LockMode) -> LockMode {
        LockMode {
            range: self.range.combine(other.range),
            key: self.key.combine(other.key),
        }
    }

    /// Whether this mode has a read component, used by invariant 3's
    /// read-watermark bookkeeping (§8).
    pub fn has_read_component(&self) -> bool {
        self.key.has_read_component()
    }

    /// Whether this mode has a dirty/write component, used by `release`'s
    /// `x_lock_tag` advance rule (§4.B "release").
    pub fn has_write_component(&self) -> bool {
        self.key.has_write_component()
    }
}

impl fmt::Display for RangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RangeMode::N => "N",
            RangeMode::IS => "IS",
            RangeMode::IX => "IX",
            RangeMode::S => "S",
            RangeMode::SIX => "SIX",
            RangeMode::X => "X",
        };
        f.write_str(s)
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyMode::N => "N",
            KeyMode::S => "S",
            KeyMode::X => "X",
        };
        f.write_str(s)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.range, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_incompatible_with_itself() {
        assert!(!LockMode::X.is_compatible(&LockMode::X));
    }

    #[test]
    fn s_compatible_with_s() {
        assert!(LockMode::S.is_compatible(&LockMode::S));
    }

    #[test]
    fn n_compatible_with_everything() {
        assert!(LockMode::N.is_compatible(&LockMode::X));
        assert!(LockMode::X.is_compatible(&LockMode::N));
    }

    #[test]
    fn join_of_is_and_ix_is_ix() {
        let a = LockMode::new(RangeMode::IS, KeyMode::N);
        let b = LockMode::new(RangeMode::IX, KeyMode::N);
        assert_eq!(a.join(&b).range, RangeMode::IX);
    }

    #[test]
    fn join_of_s_and_x_key_is_x() {
        let a = LockMode::new(RangeMode::N, KeyMode::S);
        let b = LockMode::new(RangeMode::N, KeyMode::X);
        assert_eq!(a.join(&b).key, KeyMode::X);
    }

    #[test]
    fn read_write_components() {
        assert!(LockMode::S.has_read_component());
        assert!(!LockMode::S.has_write_component());
        assert!(LockMode::X.has_write_component());
    }
}
