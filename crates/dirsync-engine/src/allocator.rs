//! Numeric identifier allocation.
//!
//! Each identifier class gets one explicitly owned allocator for the run;
//! the orchestrator is handed the allocator, never ambient state. An
//! allocated value is registered into the used set before it is returned,
//! so two allocations within one run can never collide.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SyncError, SyncResult};

/// The class of identifier an allocator fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdClass {
    /// Numeric user identifiers.
    Uid,
    /// Numeric group identifiers.
    Gid,
    /// Security-identifier suffixes.
    Sid,
}

impl IdClass {
    /// Get the string representation used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IdClass::Uid => "uid",
            IdClass::Gid => "gid",
            IdClass::Sid => "sid",
        }
    }
}

impl fmt::Display for IdClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gap-filling allocator over a set of already-used numeric identifiers.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    class: IdClass,
    floor: i64,
    ceiling: Option<i64>,
    used: BTreeSet<i64>,
}

impl IdAllocator {
    /// Create an allocator with nothing in use.
    #[must_use]
    pub fn new(class: IdClass, floor: i64) -> Self {
        Self {
            class,
            floor,
            ceiling: None,
            used: BTreeSet::new(),
        }
    }

    /// Set an inclusive upper bound on allocatable values.
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: i64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    /// Register an externally assigned value so it is never handed out.
    pub fn reserve(&mut self, value: i64) {
        self.used.insert(value);
    }

    /// Register many values at once.
    pub fn reserve_all(&mut self, values: impl IntoIterator<Item = i64>) {
        self.used.extend(values);
    }

    /// Register values parsed from raw directory attribute strings, warning
    /// on anything that is not numeric.
    pub fn reserve_raw<'a>(&mut self, values: impl IntoIterator<Item = &'a str>) {
        for raw in values {
            match raw.parse::<i64>() {
                Ok(v) => {
                    self.used.insert(v);
                }
                Err(_) => {
                    warn!(class = %self.class, value = raw, "Ignoring non-numeric identifier");
                }
            }
        }
    }

    /// Number of registered values.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    /// Return the lowest unused value at or above the floor and register it.
    ///
    /// Scans the sorted used set once, so the cost is proportional to the
    /// number of used values at or above the floor, never a remote probe
    /// per candidate.
    pub fn next_available(&mut self) -> SyncResult<i64> {
        let mut candidate = self.floor;
        for &value in self.used.range(self.floor..) {
            if value > candidate {
                break;
            }
            candidate = value + 1;
        }
        if self.ceiling.is_some_and(|c| candidate > c) {
            return Err(SyncError::IdentifierSpaceExhausted { class: self.class });
        }
        self.used.insert(candidate);
        Ok(candidate)
    }
}

/// Security-identifier allocator: a configured prefix composed with
/// gap-filled numeric suffixes.
#[derive(Debug, Clone)]
pub struct SidAllocator {
    prefix: String,
    inner: IdAllocator,
}

impl SidAllocator {
    /// Create an allocator for the given SID prefix.
    pub fn new(prefix: impl Into<String>, floor: i64) -> Self {
        Self {
            prefix: prefix.into(),
            inner: IdAllocator::new(IdClass::Sid, floor),
        }
    }

    /// Register SID values read from the directory. Values that do not
    /// carry the configured prefix followed by a numeric suffix are logged
    /// and ignored.
    pub fn reserve_sids<'a>(&mut self, values: impl IntoIterator<Item = &'a str>) {
        for raw in values {
            match raw
                .strip_prefix(&self.prefix)
                .and_then(|s| s.parse::<i64>().ok())
            {
                Some(suffix) => self.inner.reserve(suffix),
                None => {
                    warn!(value = raw, "Found an unexpected SID value");
                }
            }
        }
    }

    /// Compose the next available SID.
    pub fn next_sid(&mut self) -> SyncResult<String> {
        let suffix = self.inner.next_available()?;
        Ok(format!("{}{}", self.prefix, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_gaps_above_floor() {
        let mut alloc = IdAllocator::new(IdClass::Gid, 200);
        alloc.reserve_all([200, 202, 190, 201, 204]);
        assert_eq!(alloc.next_available().unwrap(), 203);
        assert_eq!(alloc.next_available().unwrap(), 205);
    }

    #[test]
    fn test_returns_floor_when_unused() {
        let mut alloc = IdAllocator::new(IdClass::Uid, 1000);
        alloc.reserve_all([10, 500, 2000]);
        assert_eq!(alloc.next_available().unwrap(), 1000);
    }

    #[test]
    fn test_sequential_allocations_never_collide() {
        let mut alloc = IdAllocator::new(IdClass::Uid, 100);
        alloc.reserve_all([100, 101, 103]);
        let a = alloc.next_available().unwrap();
        let b = alloc.next_available().unwrap();
        let c = alloc.next_available().unwrap();
        assert_eq!((a, b, c), (102, 104, 105));
    }

    #[test]
    fn test_minimality_property() {
        // Returned value is >= floor, not in used, and minimal.
        let used = [3, 4, 7, 9, 12];
        for floor in 0..15 {
            let mut alloc = IdAllocator::new(IdClass::Uid, floor);
            alloc.reserve_all(used);
            let got = alloc.next_available().unwrap();
            assert!(got >= floor);
            assert!(!used.contains(&got));
            for candidate in floor..got {
                assert!(used.contains(&candidate), "floor {floor} got {got}");
            }
        }
    }

    #[test]
    fn test_ceiling_exhaustion() {
        let mut alloc = IdAllocator::new(IdClass::Sid, 10).with_ceiling(11);
        alloc.reserve_all([10, 11]);
        let err = alloc.next_available().unwrap_err();
        assert!(matches!(
            err,
            SyncError::IdentifierSpaceExhausted { class: IdClass::Sid }
        ));
    }

    #[test]
    fn test_reserve_raw_skips_garbage() {
        let mut alloc = IdAllocator::new(IdClass::Uid, 0);
        alloc.reserve_raw(["12", "x13", "14"]);
        assert_eq!(alloc.in_use(), 2);
    }

    #[test]
    fn test_sid_allocation() {
        let prefix = "S-1-5-21-1111111111-2222222222-3333333333-";
        let mut alloc = SidAllocator::new(prefix, 1000);
        alloc.reserve_sids([
            format!("{prefix}1000").as_str(),
            format!("{prefix}1002").as_str(),
            "S-1-5-21-9-9-9-500",
        ]);
        assert_eq!(alloc.next_sid().unwrap(), format!("{prefix}1001"));
        assert_eq!(alloc.next_sid().unwrap(), format!("{prefix}1003"));
    }
}
