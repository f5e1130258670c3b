//! Error taxonomy: fatal consistency violations vs. recoverable anomalies.
//!
//! Fatal errors ([`TriggerError`]) indicate a broken invariant in upstream
//! data or in the algorithm itself and abort the sector invocation through
//! the usual `?` chain. Recoverable anomalies ([`Anomaly`]) are clamped or
//! truncated at the point of detection, logged, and collected into a side
//! channel returned with the result; processing continues deterministically.

use crate::types::Subsystem;
use serde::Serialize;
use thiserror::Error;

/// Result type for sector processing.
pub type Result<T, E = TriggerError> = std::result::Result<T, E>;

/// Fatal consistency violations. Never silently continued from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("{subsystem} link {link} outside [0, {max})")]
    LinkOutOfRange {
        subsystem: Subsystem,
        link: i32,
        max: i32,
    },

    #[error("link {link} holds {count} {subsystem} hits, capacity is {capacity}")]
    LinkCapacityExceeded {
        subsystem: Subsystem,
        link: i32,
        count: usize,
        capacity: usize,
    },

    #[error("zone {zone} station {station}: theta-duplicates disagree on phi ({left} != {right})")]
    DuplicatePhiMismatch {
        zone: usize,
        station: i32,
        left: i32,
        right: i32,
    },

    #[error("zone {zone} station {station}: {diffs} phi differences recorded for {roads} roads")]
    PhiDiffCountMismatch {
        zone: usize,
        station: i32,
        diffs: usize,
        roads: usize,
    },

    #[error("road in zone {zone} carries corrupt fields: {reason}")]
    CorruptRoad { zone: usize, reason: String },

    #[error("zone {zone}: road matched no hits with fixed-precision phi enabled")]
    EmptyTrack { zone: usize },
}

/// A recoverable anomaly: logged where it happens and collected alongside
/// the computed result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Anomaly {
    /// CLCT pattern outside 0 - 10, clamped to 10
    CorruptPattern { was: i32, now: i32 },
    /// LCT quality 0, clamped to 1
    CorruptQuality { was: i32, now: i32 },
    /// More hits in one chamber than the firmware can carry; truncated
    ChamberOverflow {
        subsystem: Subsystem,
        link: i32,
        count: usize,
    },
    /// A primitive identifier or payload field outside its nominal range
    FieldOutOfRange {
        subsystem: Subsystem,
        field: &'static str,
        value: i32,
    },
    /// Parallel configuration vectors of unequal length, degraded to the
    /// shortest common length
    ConfigLengthMismatch { expected: usize, actual: usize },
}
