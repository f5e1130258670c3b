//! Fundamental types used across the entire workspace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Fixed dimensions of the trigger logic space
// ---------------------------------------------------------------------------

/// Number of pattern-matching zones per sector.
pub const NUM_ZONES: usize = 4;

/// Number of detector stations per zone.
pub const NUM_STATIONS: usize = 4;

/// CSC input links: 18 in ME1, 9x3 in ME2,3,4, 9 from the neighbor sector.
/// Arranged as 6 stations x 9 chambers per station.
pub const NUM_CSC_LINKS: i32 = 6 * 9;

/// RPC input links: 6x2 in RE1,2, 12x2 in RE3,4, 6 from the neighbor sector.
/// Arranged as 7 subsectors x 8 chambers per subsector (8 with iRPC).
pub const NUM_RPC_LINKS: i32 = 7 * 8;

/// GEM input links: 6 in GE1/1, 3 in GE2/1, 2 from the neighbor sector.
/// Arranged as 6 stations x 9 chambers per station, mimicking CSC.
pub const NUM_GEM_LINKS: i32 = 6 * 9;

/// 9-bit sentinel recorded when no hit qualifies for a road in a station.
pub const INVALID_PH_DIFF: i32 = 0x1ff;

/// Bit width of full-precision integer phi.
pub const BW_FPH: i32 = 13;

/// log2 of the input rank count; sets the reduced-precision phi shift.
pub const BPOW: i32 = 7;

/// Per-link hit sequences, keyed by link index. `BTreeMap` so every scan
/// over links follows one documented total order: link ascending.
pub type LinkMap = BTreeMap<i32, Vec<TriggerPrimitive>>;

/// One slot per zone.
pub type ZoneArray<T> = [T; NUM_ZONES];

// ---------------------------------------------------------------------------
// Subsystems and detector addressing
// ---------------------------------------------------------------------------

/// The three muon subsystems feeding the endcap trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subsystem {
    Csc,
    Rpc,
    Gem,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Csc => write!(f, "CSC"),
            Subsystem::Rpc => write!(f, "RPC"),
            Subsystem::Gem => write!(f, "GEM"),
        }
    }
}

/// Geometric address of the chamber a primitive came from.
///
/// Field semantics are per subsystem: `sector` is the trigger sector for
/// CSC and the native 60-degree sector for RPC; `subsector` and `roll`
/// are only populated where the subsystem has them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorId {
    /// 1 = positive endcap, 2 = negative endcap
    pub endcap: i32,
    /// 1 - 6
    pub sector: i32,
    /// RPC: 1 - 6 (10 degrees in phi, staggered in z); unused elsewhere
    pub subsector: i32,
    /// 1 - 4
    pub station: i32,
    pub ring: i32,
    pub chamber: i32,
    /// RPC/GEM eta partition; unused for CSC
    pub roll: i32,
}

// ---------------------------------------------------------------------------
// Per-subsystem payloads
// ---------------------------------------------------------------------------

/// CSC LCT payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CscData {
    /// Chamber ID within the trigger sector, 1 - 9
    pub csc_id: i32,
    /// Key half-strip
    pub strip: i32,
    /// Key wiregroup
    pub wire: i32,
    /// CLCT pattern number, 0 - 10
    pub pattern: i32,
    /// LCT quality, 1 - 15
    pub quality: i32,
    pub bx: i32,
    pub valid: bool,
}

/// RPC cluster payload. `strip` is the cluster centre.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcData {
    pub strip: i32,
    pub strip_low: i32,
    pub strip_hi: i32,
    pub bx: i32,
    pub valid: bool,
}

/// GEM pad-cluster payload. `pad` is the cluster centre.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemData {
    pub pad: i32,
    pub pad_low: i32,
    pub pad_hi: i32,
    pub layer: i32,
    pub bx: i32,
    /// ME0 stub delivered through the GEM path
    pub is_me0: bool,
}

/// Closed sum over the subsystem payloads; selection dispatches one
/// handler per variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitivePayload {
    Csc(CscData),
    Rpc(RpcData),
    Gem(GemData),
}

/// One raw detector hit or cluster, as delivered by the unpackers.
///
/// Immutable once selected, except for the explicitly patched fields:
/// pattern/quality clamps, RPC validity invalidation and the synthesized
/// wire swaps applied by selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPrimitive {
    pub id: DetectorId,
    pub payload: PrimitivePayload,
}

impl TriggerPrimitive {
    pub fn subsystem(&self) -> Subsystem {
        match self.payload {
            PrimitivePayload::Csc(_) => Subsystem::Csc,
            PrimitivePayload::Rpc(_) => Subsystem::Rpc,
            PrimitivePayload::Gem(_) => Subsystem::Gem,
        }
    }

    pub fn bx(&self) -> i32 {
        match self.payload {
            PrimitivePayload::Csc(d) => d.bx,
            PrimitivePayload::Rpc(d) => d.bx,
            PrimitivePayload::Gem(d) => d.bx,
        }
    }

    pub fn csc(&self) -> Option<&CscData> {
        match &self.payload {
            PrimitivePayload::Csc(d) => Some(d),
            _ => None,
        }
    }

    pub fn rpc(&self) -> Option<&RpcData> {
        match &self.payload {
            PrimitivePayload::Rpc(d) => Some(d),
            _ => None,
        }
    }

    pub fn gem(&self) -> Option<&GemData> {
        match &self.payload {
            PrimitivePayload::Gem(d) => Some(d),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Converted hits
// ---------------------------------------------------------------------------

/// A selected hit after coordinate conversion, flattened into the form the
/// matcher consumes: integer phi/theta, firmware zone code, and the
/// history/tiebreak segment words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvHit {
    pub subsystem: Subsystem,
    pub station: i32,
    pub ring: i32,
    /// Station axis of the link address (link / 9)
    pub pc_station: i32,
    /// Chamber axis of the link address (link % 9)
    pub pc_chamber: i32,
    pub strip: i32,
    pub wire: i32,
    pub pattern: i32,
    pub quality: i32,
    pub bx: i32,
    /// RPC cluster bounds; zero for CSC
    pub strip_low: i32,
    pub strip_hi: i32,
    /// Full-precision integer phi (13-bit)
    pub phi_fp: i32,
    pub theta_fp: i32,
    /// Zone membership bitmask, bit i set when the hit belongs to zone i
    pub fs_zone_code: i32,
    /// Segment word: chamber/segment index, bx history in bits 4 - 5
    pub fs_segment: i32,
    /// Best-track segment word: bx history in bits 5 - 6
    pub bt_segment: i32,
    pub valid: bool,
}

impl Default for ConvHit {
    fn default() -> Self {
        Self {
            subsystem: Subsystem::Csc,
            station: 1,
            ring: 1,
            pc_station: 0,
            pc_chamber: 0,
            strip: 0,
            wire: 0,
            pattern: 0,
            quality: 0,
            bx: 0,
            strip_low: 0,
            strip_hi: 0,
            phi_fp: 0,
            theta_fp: 0,
            fs_zone_code: 0,
            fs_segment: 0,
            bt_segment: 0,
            valid: true,
        }
    }
}

impl ConvHit {
    /// True when `other` differs at most in wire/theta. Wire is
    /// deliberately excluded from the comparison so the synthesized
    /// theta-duplicates travel together into a track.
    pub fn is_duplicate_of(&self, other: &ConvHit) -> bool {
        self.subsystem == other.subsystem
            && self.pc_station == other.pc_station
            && self.pc_chamber == other.pc_chamber
            && self.ring == other.ring
            && self.strip == other.strip
            && self.pattern == other.pattern
            && self.bx == other.bx
            && self.strip_low == other.strip_low
            && self.strip_hi == other.strip_hi
    }
}

// ---------------------------------------------------------------------------
// Roads and tracks
// ---------------------------------------------------------------------------

/// A coarse pattern match from the upstream pattern-recognition stage.
/// Opaque to this crate except for the fields matching reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Road {
    pub endcap: i32,
    pub sector: i32,
    pub sector_idx: i32,
    pub bx: i32,
    pub zone: usize,
    /// Pattern rank / quality code
    pub quality_code: i32,
    /// Winner pattern offset
    pub winner: i32,
    /// Pattern key phi (reduced precision, 5 low bits dropped)
    pub key_zhit: i32,
}

/// One assembled trigger track: the road's identity plus its matched hits,
/// stable-sorted by station. Created fresh per road and never mutated
/// after assembly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub endcap: i32,
    pub sector: i32,
    pub sector_idx: i32,
    pub bx: i32,
    pub zone: usize,
    pub rank: i32,
    pub winner: i32,
    pub hits: Vec<ConvHit>,
}
