//! Sector pipeline orchestrator: the full trigger cycle for one
//! (endcap, sector, bx) invocation.
//!
//! # Processing steps per invocation
//! 1. Select CSC/RPC/GEM primitives into per-link maps
//! 2. Merge the three subsystems (CSC > GEM > RPC)
//! 3. Convert merged hits through the geometry seam
//! 4. Match roads to hits per (zone, station)
//! 5. Assemble per-zone tracks
//!
//! Every invocation owns its state and is independent of every other;
//! hosts may run one invocation per sector per event in parallel.

use crate::{
    error::{Anomaly, Result},
    matching::PrimitiveMatching,
    selection::PrimitiveSelection,
    types::{ConvHit, LinkMap, PrimitivePayload, Road, Track, TriggerPrimitive, ZoneArray},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration of one sector processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectorConfig {
    /// Verbosity of algorithm tracing (0 = quiet)
    pub verbose: u8,
    /// 1 = positive endcap, 2 = negative endcap
    pub endcap: i32,
    /// Trigger sector, 1 - 6
    pub sector: i32,
    /// Bunch crossing this invocation processes
    pub bx: i32,
    /// Per-subsystem shift applied to primitive bx before comparison
    pub bx_shift_csc: i32,
    pub bx_shift_rpc: i32,
    pub bx_shift_gem: i32,
    /// Borrow edge chambers from the adjacent sector
    pub include_neighbor: bool,
    /// Synthesize (strip, wire) combinations for two-LCT chambers
    pub duplicate_theta: bool,
    /// Reproduce the historical ME1/1 4-duplicate firmware defect
    pub bug_me11_dupes: bool,
    /// Full-precision phi windows in matching; an unmatched road becomes
    /// a hard invariant violation
    pub fix_zone_phi: bool,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            endcap: 1,
            sector: 1,
            bx: 0,
            bx_shift_csc: 0,
            bx_shift_rpc: 0,
            bx_shift_gem: 0,
            include_neighbor: true,
            duplicate_theta: true,
            bug_me11_dupes: false,
            fix_zone_phi: true,
        }
    }
}

impl SectorConfig {
    /// Flat sector index over both endcaps, 0 - 11.
    pub fn sector_idx(&self) -> i32 {
        (self.endcap - 1) * 6 + (self.sector - 1)
    }
}

// ---------------------------------------------------------------------------
// Geometry seam
// ---------------------------------------------------------------------------

/// Coordinates and firmware words produced by the conversion services for
/// one selected hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeom {
    /// Full-precision integer phi (13-bit)
    pub phi_fp: i32,
    pub theta_fp: i32,
    /// Zone membership bitmask
    pub fs_zone_code: i32,
    /// Segment word (chamber/segment index in the low bits)
    pub fs_segment: i32,
    pub bt_segment: i32,
}

/// Narrow seam to the geometry and conversion services that own phi/theta
/// lookup. The core only ever asks one question: given a link and the
/// primitive occupying it, what are its integer coordinates?
pub trait HitConverter {
    fn convert(&self, link: i32, tp: &TriggerPrimitive) -> ConvGeom;
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Everything produced by one sector invocation.
#[derive(Clone, Debug, Default)]
pub struct SectorOutput {
    /// Merged per-link hit map (the trigger path)
    pub selected_links: LinkMap,
    /// Non-truncating union of all subsystems, for diagnostics/offline reuse
    pub selected_links_full: LinkMap,
    /// Converted hits fed to matching
    pub conv_hits: Vec<ConvHit>,
    /// Final tracks per zone, in road order
    pub zone_tracks: ZoneArray<Vec<Track>>,
    /// Soft anomalies recorded along the way
    pub anomalies: Vec<Anomaly>,
    /// Timings in microseconds
    pub timing_select_us: u64,
    pub timing_match_us: u64,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// The per-sector trigger processor. Stateless between invocations.
pub struct SectorProcessor {
    pub config: SectorConfig,
}

impl SectorProcessor {
    pub fn new(config: SectorConfig) -> Self {
        Self { config }
    }

    /// Run one (sector, bx) invocation over a batch of raw primitives and
    /// externally supplied roads.
    pub fn process(
        &self,
        primitives: &[TriggerPrimitive],
        zone_roads: &ZoneArray<Vec<Road>>,
        converter: &dyn HitConverter,
    ) -> Result<SectorOutput> {
        let mut anomalies = Vec::new();

        // ----------------------------------------------------------------
        // Step 1-2: selection and merge
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let selection = PrimitiveSelection::new(&self.config);
        let csc = selection.process_csc(primitives, &mut anomalies)?;
        let rpc = selection.process_rpc(primitives, &mut anomalies)?;
        let gem = selection.process_gem(primitives, &mut anomalies)?;
        let selected_links = selection.merge(&csc, &rpc, &gem)?;
        let selected_links_full = selection.merge_no_truncate(&csc, &rpc, &gem);
        let timing_select_us = t0.elapsed().as_micros() as u64;

        if self.config.verbose > 0 {
            tracing::debug!(
                sector = self.config.sector,
                bx = self.config.bx,
                links = selected_links.len(),
                anomalies = anomalies.len(),
                "selection complete"
            );
        }

        // ----------------------------------------------------------------
        // Step 3: conversion through the geometry seam
        // ----------------------------------------------------------------
        let conv_hits: Vec<ConvHit> = selected_links
            .iter()
            .flat_map(|(&link, prims)| {
                prims
                    .iter()
                    .map(move |tp| make_conv_hit(link, tp, converter.convert(link, tp)))
            })
            .collect();

        // ----------------------------------------------------------------
        // Step 4-5: matching and track assembly
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let matching = PrimitiveMatching::new(&self.config);
        let zone_tracks = matching.process(std::slice::from_ref(&conv_hits), zone_roads)?;
        let timing_match_us = t0.elapsed().as_micros() as u64;

        Ok(SectorOutput {
            selected_links,
            selected_links_full,
            conv_hits,
            zone_tracks,
            anomalies,
            timing_select_us,
            timing_match_us,
        })
    }
}

/// Flatten a selected primitive and its converted coordinates into the
/// form the matcher consumes.
fn make_conv_hit(link: i32, tp: &TriggerPrimitive, geom: ConvGeom) -> ConvHit {
    let (strip, wire, pattern, quality, bx, strip_low, strip_hi, valid) = match &tp.payload {
        PrimitivePayload::Csc(d) => (d.strip, d.wire, d.pattern, d.quality, d.bx, 0, 0, d.valid),
        PrimitivePayload::Rpc(d) => (d.strip, 0, 0, 0, d.bx, d.strip_low, d.strip_hi, d.valid),
        PrimitivePayload::Gem(d) => (d.pad, 0, 0, 0, d.bx, d.pad_low, d.pad_hi, true),
    };

    ConvHit {
        subsystem: tp.subsystem(),
        station: tp.id.station,
        ring: tp.id.ring,
        pc_station: link / 9,
        pc_chamber: link % 9,
        strip,
        wire,
        pattern,
        quality,
        bx,
        strip_low,
        strip_hi,
        phi_fp: geom.phi_fp,
        theta_fp: geom.theta_fp,
        fs_zone_code: geom.fs_zone_code,
        fs_segment: geom.fs_segment,
        bt_segment: geom.bt_segment,
        valid,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
