//! Read-only typed key/value options bag (component I, §6).
//!
//! Modeled on `sm_options.h`'s typed getters (`get_int_option`,
//! `get_bool_option`, `get_string_option`) and on the plain `Config`
//! struct (`src/lib.rs`) for the "sane defaults, override by key" idiom.
//! Unlike `Config`, this is a generic bag rather than a fixed struct,
//! because the set of recognized keys spans three independent subsystems
//! (lock pool, log buffer, GC) that should not need to agree on one struct
//! shape.

use std::collections::HashMap;

/// A single option value, one of three primitive views.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Read-only typed key/value bag consumed by the lock pool, the log buffer,
/// and the generational-pool reclaimer (§6 table).
#[derive(Debug, Clone, Default)]
pub struct Options {
    values: HashMap<String, OptionValue>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), OptionValue::Int(value));
        self
    }

    pub fn set_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.values.insert(key.into(), OptionValue::Bool(value));
        self
    }

    pub fn set_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(key.into(), OptionValue::Str(value.into()));
        self
    }

    /// Returns the int value for `key`, or `default` if absent or of the
    /// wrong type.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(OptionValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(OptionValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.values.get(key) {
            Some(OptionValue::Str(v)) => v.as_str(),
            _ => default,
        }
    }
}

/// Well-known option keys recognized by the core (§6 table). Collaborators
/// outside the hard core (archiver, volume manager) may define their own
/// keys in the same bag; the core only ever reads these.
pub mod keys {
    pub const LOG_BUFFER_SIZE: &str = "sm_logbufsize";
    pub const LOG_SIZE_PAGES: &str = "sm_logsize";
    pub const LOCK_TABLE_SIZE: &str = "sm_locktablesize";
    pub const LOCK_POOL_INIT_SEGMENTS: &str = "sm_rawlock_lockpool_initseg";
    pub const LOCK_POOL_SEGMENT_SIZE: &str = "sm_rawlock_lockpool_segsize";
    pub const XCT_POOL_INIT_SEGMENTS: &str = "sm_rawlock_xctpool_initseg";
    pub const XCT_POOL_SEGMENT_SIZE: &str = "sm_rawlock_xctpool_segsize";
    pub const GC_INTERVAL_MS: &str = "sm_rawlock_gc_interval_ms";
    pub const GC_GENERATION_COUNT: &str = "sm_rawlock_gc_generation_count";
    pub const GC_FREE_SEGMENT_COUNT: &str = "sm_rawlock_gc_free_segment_count";
    pub const GC_MAX_SEGMENT_COUNT: &str = "sm_rawlock_gc_max_segment_count";
    pub const SHUTDOWN_CLEAN: &str = "sm_shutdown_clean";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        let opts = Options::new();
        assert_eq!(opts.get_int(keys::LOCK_TABLE_SIZE, 61), 61);
        assert!(opts.get_bool(keys::SHUTDOWN_CLEAN, true));
    }

    #[test]
    fn overrides_are_typed() {
        let opts = Options::new()
            .set_int(keys::LOCK_TABLE_SIZE, 4096)
            .set_bool(keys::SHUTDOWN_CLEAN, false);
        assert_eq!(opts.get_int(keys::LOCK_TABLE_SIZE, 61), 4096);
        assert!(!opts.get_bool(keys::SHUTDOWN_CLEAN, true));
        // Wrong-type lookup falls back to default rather than panicking.
        assert_eq!(opts.get_int(keys::SHUTDOWN_CLEAN, 7), 7);
    }
}
