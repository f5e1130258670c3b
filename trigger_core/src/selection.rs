//! Primitive selection: classify raw hits into sector-local link indices,
//! deduplicate per subsystem, and merge CSC/RPC/GEM into one link map.
//!
//! # Link addressing
//! Each subsystem owns a bijection from (subsector, station, chamber ID)
//! to an integer link in a fixed range; hits borrowed from the adjacent
//! sector occupy a reserved sub-range (CSC/GEM 45 - 53, RPC subsector 6).
//! RPC uses its native (subsector, chamber) addressing during selection
//! and is remapped onto the CSC station/chamber axis afterwards, so the
//! merge step works in one coordinate system.

use crate::{
    error::{Anomaly, Result, TriggerError},
    pipeline::SectorConfig,
    types::{
        LinkMap, PrimitivePayload, Subsystem, TriggerPrimitive, NUM_CSC_LINKS, NUM_GEM_LINKS,
        NUM_RPC_LINKS,
    },
};
use tracing::warn;

const MIN_ENDCAP: i32 = 1;
const MAX_ENDCAP: i32 = 2;
const MIN_TRIGSECTOR: i32 = 1;
const MAX_TRIGSECTOR: i32 = 6;

/// Classifies raw primitives into per-link sequences for one
/// (endcap, sector, bx) context.
pub struct PrimitiveSelection {
    endcap: i32,
    sector: i32,
    bx: i32,
    bx_shift_csc: i32,
    bx_shift_rpc: i32,
    bx_shift_gem: i32,
    include_neighbor: bool,
    duplicate_theta: bool,
    bug_me11_dupes: bool,
}

impl PrimitiveSelection {
    pub fn new(config: &SectorConfig) -> Self {
        Self {
            endcap: config.endcap,
            sector: config.sector,
            bx: config.bx,
            bx_shift_csc: config.bx_shift_csc,
            bx_shift_rpc: config.bx_shift_rpc,
            bx_shift_gem: config.bx_shift_gem,
            include_neighbor: config.include_neighbor,
            duplicate_theta: config.duplicate_theta,
            bug_me11_dupes: config.bug_me11_dupes,
        }
    }

    // -----------------------------------------------------------------------
    // CSC
    // -----------------------------------------------------------------------

    /// Select CSC primitives into a link map and synthesize theta
    /// duplicates.
    pub fn process_csc(
        &self,
        primitives: &[TriggerPrimitive],
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<LinkMap> {
        let mut selected = LinkMap::new();

        for tp in primitives {
            let mut new_tp = *tp;

            // Patch corrupt codes before selection: the unpacker can deliver
            // CLCT patterns 11-14 (nominal 0-10) and LCT quality 0 (nominal
            // 1-15).
            if let PrimitivePayload::Csc(data) = &mut new_tp.payload {
                if (11..=14).contains(&data.pattern) {
                    warn!(
                        pattern = data.pattern,
                        "patching corrupt CSC LCT pattern to 10"
                    );
                    anomalies.push(Anomaly::CorruptPattern {
                        was: data.pattern,
                        now: 10,
                    });
                    data.pattern = 10;
                }
                if data.quality == 0 {
                    warn!("patching corrupt CSC LCT quality 0 to 1");
                    anomalies.push(Anomaly::CorruptQuality { was: 0, now: 1 });
                    data.quality = 1;
                }
            }

            if let Some(link) = self.select_csc(&new_tp, anomalies) {
                if !(0..NUM_CSC_LINKS).contains(&link) {
                    return Err(TriggerError::LinkOutOfRange {
                        subsystem: Subsystem::Csc,
                        link,
                        max: NUM_CSC_LINKS,
                    });
                }
                selected.entry(link).or_default().push(new_tp);
            }
        }

        if self.duplicate_theta {
            self.duplicate_csc_theta(&mut selected, anomalies);
        }

        Ok(selected)
    }

    /// Strip and wire are reported on separate coincidence planes, so when
    /// two LCTs share a chamber the true hit can be any of the four
    /// (strip, wire) pairings; synthesize the two missing combinations.
    fn duplicate_csc_theta(&self, selected: &mut LinkMap, anomalies: &mut Vec<Anomaly>) {
        for (&link, prims) in selected.iter_mut() {
            if prims.len() >= 3 {
                // Firmware fits at most two LCTs per chamber; the rest never
                // reach the track finder.
                warn!(
                    link,
                    count = prims.len(),
                    "found 3 or more CSC LCTs in one chamber, keeping only two"
                );
                anomalies.push(Anomaly::ChamberOverflow {
                    subsystem: Subsystem::Csc,
                    link,
                    count: prims.len(),
                });
                prims.truncate(2);
            }

            if prims.len() == 2 {
                let (s0, w0) = strip_wire(&prims[0]);
                let (s1, w1) = strip_wire(&prims[1]);

                if s0 != s1 && w0 != w1 {
                    swap_wires_into(prims);
                } else if self.bug_me11_dupes && is_me11_link(link) {
                    // Historical firmware defect: ME1/1 always produced all
                    // four combinations, even with a shared strip or wire.
                    swap_wires_into(prims);
                }
                debug_assert!(matches!(prims.len(), 1 | 2 | 4));
            }
        }
    }

    /// Returns the CSC input link, or `None` when the primitive is not a
    /// CSC hit in this sector context.
    pub fn select_csc(
        &self,
        tp: &TriggerPrimitive,
        anomalies: &mut Vec<Anomaly>,
    ) -> Option<i32> {
        let data = tp.csc()?;
        let id = &tp.id;

        soft_check(Subsystem::Csc, "endcap", id.endcap, (MIN_ENDCAP..=MAX_ENDCAP).contains(&id.endcap), anomalies);
        soft_check(Subsystem::Csc, "sector", id.sector, (MIN_TRIGSECTOR..=MAX_TRIGSECTOR).contains(&id.sector), anomalies);
        soft_check(Subsystem::Csc, "station", id.station, (1..=4).contains(&id.station), anomalies);
        soft_check(Subsystem::Csc, "csc_id", data.csc_id, (1..=9).contains(&data.csc_id), anomalies);
        soft_check(Subsystem::Csc, "strip", data.strip, data.strip < 160, anomalies);
        soft_check(Subsystem::Csc, "wire", data.wire, data.wire < 128, anomalies);
        soft_check(Subsystem::Csc, "valid", data.valid as i32, data.valid, anomalies);
        soft_check(Subsystem::Csc, "pattern", data.pattern, data.pattern <= 10, anomalies);
        soft_check(Subsystem::Csc, "quality", data.quality, data.quality > 0, anomalies);

        // ME1/1a follows the ring 4 convention
        if id.station == 1 && (id.ring == 1 || id.ring == 4) {
            soft_check(Subsystem::Csc, "me11 strip", data.strip, data.strip < 128, anomalies);
            soft_check(Subsystem::Csc, "me11 csc_id", data.csc_id, (1..=3).contains(&data.csc_id), anomalies);
        }

        let subsector = csc_subsector(id.station, id.chamber);

        if data.bx + self.bx_shift_csc != self.bx {
            return None;
        }

        if self.is_in_sector(id.endcap, id.sector) {
            Some(csc_link(subsector, id.station, data.csc_id, false))
        } else if self.is_in_neighbor_sector_csc(id.endcap, id.sector, subsector, id.station, data.csc_id) {
            Some(csc_link(subsector, id.station, data.csc_id, true))
        } else {
            None
        }
    }

    fn is_in_sector(&self, endcap: i32, sector: i32) -> bool {
        self.endcap == endcap && self.sector == sector
    }

    /// Only the edge chambers of the adjacent sector can be borrowed:
    /// chamber IDs 3, 6, 9 in ME1 subsector 2, and 3, 9 in ME2,3,4.
    fn is_in_neighbor_sector_csc(
        &self,
        endcap: i32,
        sector: i32,
        subsector: i32,
        station: i32,
        csc_id: i32,
    ) -> bool {
        if !self.include_neighbor {
            return false;
        }
        if self.endcap != endcap || neighbor_sector(self.sector) != sector {
            return false;
        }
        if station == 1 {
            subsector == 2 && matches!(csc_id, 3 | 6 | 9)
        } else {
            matches!(csc_id, 3 | 9)
        }
    }

    // -----------------------------------------------------------------------
    // RPC
    // -----------------------------------------------------------------------

    /// Select RPC clusters, truncate per chamber, and remap onto the CSC
    /// station/chamber axis.
    pub fn process_rpc(
        &self,
        primitives: &[TriggerPrimitive],
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<LinkMap> {
        let mut selected = LinkMap::new();

        for tp in primitives {
            if let Some(link) = self.select_rpc(tp, anomalies) {
                if !(0..NUM_RPC_LINKS).contains(&link) {
                    return Err(TriggerError::LinkOutOfRange {
                        subsystem: Subsystem::Rpc,
                        link,
                        max: NUM_RPC_LINKS,
                    });
                }
                selected.entry(link).or_default().push(*tp);
            }
        }

        // Firmware truncation: one chamber (3 eta rolls) produces at most
        // two cluster centres. The first two arrivals are kept and the
        // size cut is applied only afterwards, so a large first cluster can
        // crowd out a small one and then be cut itself.
        for prims in selected.values_mut() {
            prims.truncate(2);
            prims.retain(|tp| !oversized_rpc_cluster(tp));
        }

        Ok(self.map_rpc_links_to_csc(selected))
    }

    /// Remap native RPC (subsector, chamber) addressing onto the CSC
    /// station/chamber axis. RE3/2 & RE3/3 collapse onto one slot, as do
    /// RE4/2 & RE4/3. Source links are visited in ascending order, so the
    /// lower chamber index is always seen first and wins the slot; the
    /// loser's clusters are appended but invalidated, never dropped.
    fn map_rpc_links_to_csc(&self, selected: LinkMap) -> LinkMap {
        let mut remapped = LinkMap::new();

        for (link, mut prims) in selected {
            let rpc_sub = link / 8;
            let rpc_chm = link % 8;
            let (pc_station, pc_chamber) = rpc_csc_slot(rpc_sub, rpc_chm);
            let merged_link = pc_station * 9 + pc_chamber;

            if (rpc_chm == 3 || rpc_chm == 5) && remapped.contains_key(&merged_link) {
                for tp in prims.iter_mut() {
                    if let PrimitivePayload::Rpc(data) = &mut tp.payload {
                        data.valid = false;
                    }
                }
            }

            remapped.entry(merged_link).or_default().extend(prims);
        }

        remapped
    }

    /// Returns the native RPC link, or `None` when the cluster is not an
    /// RPC hit in this sector context.
    pub fn select_rpc(
        &self,
        tp: &TriggerPrimitive,
        anomalies: &mut Vec<Anomaly>,
    ) -> Option<i32> {
        let data = tp.rpc()?;
        let id = &tp.id;
        let irpc = is_irpc(id.station, id.ring);

        soft_check(Subsystem::Rpc, "endcap", id.endcap, (MIN_ENDCAP..=MAX_ENDCAP).contains(&id.endcap), anomalies);
        soft_check(Subsystem::Rpc, "sector", id.sector, (MIN_TRIGSECTOR..=MAX_TRIGSECTOR).contains(&id.sector), anomalies);
        soft_check(Subsystem::Rpc, "subsector", id.subsector, (1..=6).contains(&id.subsector), anomalies);
        soft_check(Subsystem::Rpc, "station", id.station, (1..=4).contains(&id.station), anomalies);
        let ring_ok = if irpc { (1..=3).contains(&id.ring) } else { (2..=3).contains(&id.ring) };
        soft_check(Subsystem::Rpc, "ring", id.ring, ring_ok, anomalies);
        let roll_ok = if irpc { (1..=5).contains(&id.roll) } else { (1..=3).contains(&id.roll) };
        soft_check(Subsystem::Rpc, "roll", id.roll, roll_ok, anomalies);
        let strip_ok = if irpc { (1..=192).contains(&data.strip) } else { (1..=32).contains(&data.strip) };
        soft_check(Subsystem::Rpc, "strip", data.strip, strip_ok, anomalies);
        // stations 1 and 2 do not receive RPCs from ring 3
        soft_check(Subsystem::Rpc, "ring", id.ring, id.station > 2 || id.ring != 3, anomalies);
        soft_check(Subsystem::Rpc, "valid", data.valid as i32, data.valid, anomalies);

        if data.bx + self.bx_shift_rpc != self.bx {
            return None;
        }

        if self.is_in_sector_rpc(id.endcap, id.station, id.ring, id.sector, id.subsector) {
            Some(rpc_link(id.station, id.ring, id.subsector, false))
        } else if self.is_in_neighbor_sector_rpc(id.endcap, id.station, id.ring, id.sector, id.subsector) {
            Some(rpc_link(id.station, id.ring, id.subsector, true))
        } else {
            None
        }
    }

    /// RPC sector X, low subsectors belong to CSC sector X-1; the rest to
    /// CSC sector X. The boundary is subsector 3 for 10-degree chambers
    /// and 2 for the 20-degree iRPC chambers.
    fn is_in_sector_rpc(
        &self,
        endcap: i32,
        station: i32,
        ring: i32,
        sector: i32,
        subsector: i32,
    ) -> bool {
        let boundary = if is_irpc(station, ring) { 2 } else { 3 };
        let corr = if subsector < boundary {
            if sector == 1 {
                5
            } else {
                -1
            }
        } else {
            0
        };
        self.endcap == endcap && self.sector == sector + corr
    }

    fn is_in_neighbor_sector_rpc(
        &self,
        endcap: i32,
        station: i32,
        ring: i32,
        sector: i32,
        subsector: i32,
    ) -> bool {
        let neighbor_subsector = if is_irpc(station, ring) { 1 } else { 2 };
        self.include_neighbor
            && self.endcap == endcap
            && self.sector == sector
            && subsector == neighbor_subsector
    }

    // -----------------------------------------------------------------------
    // GEM
    // -----------------------------------------------------------------------

    /// Select GEM clusters into a link map and truncate per chamber.
    pub fn process_gem(
        &self,
        primitives: &[TriggerPrimitive],
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<LinkMap> {
        let mut selected = LinkMap::new();

        for tp in primitives {
            if let Some(link) = self.select_gem(tp, anomalies) {
                if !(0..NUM_GEM_LINKS).contains(&link) {
                    return Err(TriggerError::LinkOutOfRange {
                        subsystem: Subsystem::Gem,
                        link,
                        max: NUM_GEM_LINKS,
                    });
                }
                selected.entry(link).or_default().push(*tp);
            }
        }

        // Truncation: max cluster size 8 pads, first 8 clusters kept.
        for prims in selected.values_mut() {
            prims.retain(|tp| !oversized_gem_cluster(tp));
            prims.truncate(8);
        }

        Ok(selected)
    }

    /// Returns the GEM input link, or `None` when the cluster is not a GEM
    /// hit in this sector context. GEM chambers are addressed with
    /// CSC-style trigger sector / chamber-ID arithmetic derived from the
    /// chamber number.
    pub fn select_gem(
        &self,
        tp: &TriggerPrimitive,
        anomalies: &mut Vec<Anomaly>,
    ) -> Option<i32> {
        let data = tp.gem()?;
        let id = &tp.id;

        let sector = csc_trigger_sector(id.ring, id.station, id.chamber);
        let csc_id = csc_trigger_id(id.ring, id.station, id.chamber);
        let mut subsector = csc_subsector(id.station, id.chamber);
        if data.is_me0 {
            subsector = 2;
        }

        soft_check(Subsystem::Gem, "endcap", id.endcap, (MIN_ENDCAP..=MAX_ENDCAP).contains(&id.endcap), anomalies);
        soft_check(Subsystem::Gem, "sector", sector, (MIN_TRIGSECTOR..=MAX_TRIGSECTOR).contains(&sector), anomalies);
        soft_check(Subsystem::Gem, "station", id.station, (1..=2).contains(&id.station), anomalies);
        soft_check(Subsystem::Gem, "ring", id.ring, id.ring == 1 || id.ring == 4, anomalies);
        soft_check(Subsystem::Gem, "roll", id.roll, (1..=8).contains(&id.roll), anomalies);
        let layer_ok = if data.is_me0 { (1..=6).contains(&data.layer) } else { (1..=2).contains(&data.layer) };
        soft_check(Subsystem::Gem, "layer", data.layer, layer_ok, anomalies);
        soft_check(Subsystem::Gem, "csc_id", csc_id, (1..=9).contains(&csc_id), anomalies);
        if id.station == 1 {
            soft_check(Subsystem::Gem, "pad", data.pad, (1..=192).contains(&data.pad), anomalies);
        }
        if id.station == 2 {
            soft_check(Subsystem::Gem, "pad", data.pad, (1..=384).contains(&data.pad), anomalies);
        }

        if data.bx + self.bx_shift_gem != self.bx {
            return None;
        }

        if self.is_in_sector(id.endcap, sector) {
            Some(csc_link(subsector, id.station, csc_id, false))
        } else if self.is_in_neighbor_sector_csc(id.endcap, sector, subsector, id.station, csc_id) {
            Some(csc_link(subsector, id.station, csc_id, true))
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Merge the three subsystems into one link map with precedence
    /// CSC > GEM > RPC: a link with CSC hits uses them exclusively; GEM
    /// fills links with no CSC hits; RPC fills what is left, valid
    /// clusters only. RPCs are a supplemental source of stubs wherever a
    /// CSC chamber is missing one, regardless of anything else going on.
    pub fn merge(&self, csc: &LinkMap, rpc: &LinkMap, gem: &LinkMap) -> Result<LinkMap> {
        let mut merged = LinkMap::new();

        for (&link, prims) in csc {
            // at most 4 hits, including synthesized duplicates
            if prims.len() > 4 {
                return Err(TriggerError::LinkCapacityExceeded {
                    subsystem: Subsystem::Csc,
                    link,
                    count: prims.len(),
                    capacity: 4,
                });
            }
            merged.insert(link, prims.clone());
        }

        for (&link, prims) in gem {
            if prims.is_empty() {
                continue;
            }
            if prims.len() > 8 {
                return Err(TriggerError::LinkCapacityExceeded {
                    subsystem: Subsystem::Gem,
                    link,
                    count: prims.len(),
                    capacity: 8,
                });
            }
            merged.entry(link).or_insert_with(|| prims.clone());
        }

        for (&link, prims) in rpc {
            if prims.is_empty() {
                continue;
            }
            if prims.len() > 4 {
                return Err(TriggerError::LinkCapacityExceeded {
                    subsystem: Subsystem::Rpc,
                    link,
                    count: prims.len(),
                    capacity: 4,
                });
            }
            if merged.contains_key(&link) {
                continue;
            }
            // Only the valid clusters enter the trigger path; losers of the
            // RE3/2-RE3/3 collision stay out.
            let valid: Vec<TriggerPrimitive> = prims
                .iter()
                .filter(|tp| tp.rpc().is_some_and(|d| d.valid))
                .copied()
                .collect();
            if valid.len() > 2 {
                return Err(TriggerError::LinkCapacityExceeded {
                    subsystem: Subsystem::Rpc,
                    link,
                    count: valid.len(),
                    capacity: 2,
                });
            }
            merged.insert(link, valid);
        }

        Ok(merged)
    }

    /// Union of all three subsystems with no precedence exclusion and no
    /// validity filtering, for diagnostics and offline reuse.
    pub fn merge_no_truncate(&self, csc: &LinkMap, rpc: &LinkMap, gem: &LinkMap) -> LinkMap {
        let mut merged = LinkMap::new();
        for map in [csc, gem, rpc] {
            for (&link, prims) in map {
                merged.entry(link).or_default().extend(prims.iter().copied());
            }
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// Link arithmetic
// ---------------------------------------------------------------------------

/// station 1 -> subsector 1 or 2; stations 2-4 -> subsector 0.
pub fn csc_subsector(station: i32, chamber: i32) -> i32 {
    if station != 1 {
        0
    } else if chamber % 6 > 2 {
        1
    } else {
        2
    }
}

/// CSC input link, the firmware's unique chamber address.
pub fn csc_link(subsector: i32, station: i32, csc_id: i32, is_neighbor: bool) -> i32 {
    if !is_neighbor {
        if station == 1 {
            // ME1: 0 - 8, 9 - 17
            (subsector - 1) * 9 + (csc_id - 1)
        } else {
            // ME2,3,4: 18 - 26, 27 - 35, 36 - 44
            station * 9 + (csc_id - 1)
        }
    } else if station == 1 {
        // ME1 neighbor: 45 - 47
        5 * 9 + (csc_id - 1) / 3
    } else {
        // ME2,3,4 neighbor: 48 - 53
        5 * 9 + station * 2 - 1 + if csc_id - 1 < 3 { 0 } else { 1 }
    }
}

/// Native RPC link. `rpc_sub` 0-5 are subsectors reordered to CSC sector
/// phi, 6 is the neighbor slot; `rpc_chm` 0-7 are RE1/2, RE2/2, RE3/2,
/// RE3/3, RE4/2, RE4/3, RE3/1, RE4/1.
pub fn rpc_link(station: i32, ring: i32, subsector: i32, is_neighbor: bool) -> i32 {
    let (rpc_sub, rpc_chm);
    if is_irpc(station, ring) {
        // 20 degree chambers
        rpc_sub = if is_neighbor { 6 } else { (subsector + 1) % 3 };
        rpc_chm = if station == 3 { 6 } else { 7 };
    } else {
        rpc_sub = if is_neighbor { 6 } else { (subsector + 3) % 6 };
        rpc_chm = if station <= 2 {
            station - 1
        } else {
            2 + (station - 3) * 2 + (ring - 2)
        };
    }
    rpc_sub * 8 + rpc_chm
}

/// Merged (station, chamber) slot on the CSC axis for a native RPC
/// (subsector, chamber) pair.
fn rpc_csc_slot(rpc_sub: i32, rpc_chm: i32) -> (i32, i32) {
    if rpc_sub != 6 {
        match rpc_chm {
            // RE1/2 splits across the two ME1 subsectors
            0 => {
                if rpc_sub < 3 {
                    (0, 3 + rpc_sub)
                } else {
                    (1, 3 + rpc_sub - 3)
                }
            }
            1 => (2, 3 + rpc_sub),     // RE2/2
            2 | 3 => (3, 3 + rpc_sub), // RE3/2, RE3/3
            4 | 5 => (4, 3 + rpc_sub), // RE4/2, RE4/3
            6 => (3, rpc_sub),         // RE3/1
            _ => (4, rpc_sub),         // RE4/1
        }
    } else {
        let pc_chamber = match rpc_chm {
            0 => 1,     // RE1/2
            1 => 4,     // RE2/2
            2 | 3 => 6, // RE3/2, RE3/3
            4 | 5 => 8, // RE4/2, RE4/3
            6 => 5,     // RE3/1
            _ => 7,     // RE4/1
        };
        (5, pc_chamber)
    }
}

/// iRPC: the improved-RPC chambers in RE3/1 and RE4/1.
pub fn is_irpc(station: i32, ring: i32) -> bool {
    (station == 3 || station == 4) && ring == 1
}

fn neighbor_sector(sector: i32) -> i32 {
    if sector == 1 {
        6
    } else {
        sector - 1
    }
}

fn is_me11_link(link: i32) -> bool {
    // ME1/1 subsector 1, ME1/1 subsector 2, ME1/1 from neighbor
    (0..=2).contains(&link) || (9..=11).contains(&link) || link == 45
}

/// Trigger sector for a chamber, CSC convention. The unsigned wrap for
/// chambers 1-2 is intentional and matches the detector mapping.
pub fn csc_trigger_sector(ring: i32, station: i32, chamber: i32) -> i32 {
    let result = if (station > 1 && ring > 1) || (station == 1 && ring != 4) {
        // ch 3-8 -> 1, 9-14 -> 2, ..., 1-2 -> 6
        (((chamber - 3) as u32 & 0x7f) / 6) as i32 + 1
    } else {
        // ch 2-4 -> 1, 5-7 -> 2, ...
        (((chamber - 2) as u32 & 0x1f) / 3) as i32 + 1
    };
    result.min(6)
}

/// Trigger chamber ID (1-9) for a chamber, CSC convention.
pub fn csc_trigger_id(ring: i32, station: i32, chamber: i32) -> i32 {
    if station == 1 {
        match ring {
            2 => chamber % 3 + 4,
            3 => chamber % 3 + 7,
            4 => (chamber + 1) % 3 + 1, // ME0
            _ => chamber % 3 + 1,
        }
    } else if ring == 1 {
        (chamber + 1) % 3 + 1
    } else {
        (chamber + 3) % 6 + 4
    }
}

// ---------------------------------------------------------------------------
// Cluster cuts and helpers
// ---------------------------------------------------------------------------

/// Oversized RPC clusters are noise. iRPC strip pitch is a third of the
/// traditional pitch, so its widths are normalized before the cut.
fn oversized_rpc_cluster(tp: &TriggerPrimitive) -> bool {
    let Some(data) = tp.rpc() else { return false };
    let mut width = data.strip_hi - data.strip_low + 1;
    if is_irpc(tp.id.station, tp.id.ring) {
        width /= 3;
    }
    width > 3
}

fn oversized_gem_cluster(tp: &TriggerPrimitive) -> bool {
    let Some(data) = tp.gem() else { return false };
    (data.pad_hi - data.pad_low + 1) > 8
}

fn strip_wire(tp: &TriggerPrimitive) -> (i32, i32) {
    tp.csc().map(|d| (d.strip, d.wire)).unwrap_or((0, 0))
}

/// Synthesize the missing (strip, wire) pairings for two LCTs:
/// (s1,w1),(s2,w2) becomes (s1,w1),(s2,w1),(s1,w2),(s2,w2).
fn swap_wires_into(prims: &mut Vec<TriggerPrimitive>) {
    let mut tp0 = prims[0];
    let mut tp1 = prims[1];
    if let (PrimitivePayload::Csc(d0), PrimitivePayload::Csc(d1)) =
        (&mut tp0.payload, &mut tp1.payload)
    {
        std::mem::swap(&mut d0.wire, &mut d1.wire);
    }
    prims.insert(1, tp1); // (s2, w1)
    prims.insert(2, tp0); // (s1, w2)
}

fn soft_check(
    subsystem: Subsystem,
    field: &'static str,
    value: i32,
    ok: bool,
    anomalies: &mut Vec<Anomaly>,
) {
    if !ok {
        warn!(%subsystem, field, value, "primitive field outside nominal range");
        anomalies.push(Anomaly::FieldOutOfRange {
            subsystem,
            field,
            value,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CscData, DetectorId, GemData, RpcData};

    fn config() -> SectorConfig {
        SectorConfig {
            endcap: 1,
            sector: 2,
            ..Default::default()
        }
    }

    fn csc_hit(station: i32, csc_id: i32, strip: i32, wire: i32) -> TriggerPrimitive {
        TriggerPrimitive {
            id: DetectorId {
                endcap: 1,
                sector: 2,
                station,
                ring: 2,
                chamber: 10, // chamber % 6 > 2 -> subsector 1 in station 1
                ..Default::default()
            },
            payload: PrimitivePayload::Csc(CscData {
                csc_id,
                strip,
                wire,
                pattern: 8,
                quality: 10,
                bx: 0,
                valid: true,
            }),
        }
    }

    fn rpc_hit(station: i32, ring: i32, subsector: i32, strip: i32, width: i32) -> TriggerPrimitive {
        TriggerPrimitive {
            id: DetectorId {
                endcap: 1,
                sector: 2,
                subsector,
                station,
                ring,
                roll: 2,
                ..Default::default()
            },
            payload: PrimitivePayload::Rpc(RpcData {
                strip,
                strip_low: strip,
                strip_hi: strip + width - 1,
                bx: 0,
                valid: true,
            }),
        }
    }

    #[test]
    fn csc_link_native_ranges() {
        // ME1 subsector 1 and 2
        assert_eq!(csc_link(1, 1, 1, false), 0);
        assert_eq!(csc_link(1, 1, 9, false), 8);
        assert_eq!(csc_link(2, 1, 1, false), 9);
        assert_eq!(csc_link(2, 1, 9, false), 17);
        // ME2, ME3, ME4
        assert_eq!(csc_link(0, 2, 1, false), 18);
        assert_eq!(csc_link(0, 3, 1, false), 27);
        assert_eq!(csc_link(0, 4, 9, false), 44);
    }

    #[test]
    fn csc_link_neighbor_ranges() {
        assert_eq!(csc_link(2, 1, 1, true), 45);
        assert_eq!(csc_link(2, 1, 9, true), 47);
        assert_eq!(csc_link(0, 2, 3, true), 48);
        assert_eq!(csc_link(0, 2, 9, true), 49);
        assert_eq!(csc_link(0, 3, 3, true), 50);
        assert_eq!(csc_link(0, 4, 9, true), 53);
    }

    #[test]
    fn select_csc_rejects_wrong_bx_and_sector() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let mut tp = csc_hit(2, 4, 50, 10);
        assert!(selection.select_csc(&tp, &mut anomalies).is_some());

        if let PrimitivePayload::Csc(d) = &mut tp.payload {
            d.bx = 1;
        }
        assert!(selection.select_csc(&tp, &mut anomalies).is_none());

        let mut tp = csc_hit(2, 4, 50, 10);
        tp.id.sector = 4; // not own sector, not neighbor (own=2, neighbor=1)
        assert!(selection.select_csc(&tp, &mut anomalies).is_none());
    }

    #[test]
    fn select_csc_neighbor_only_edge_chambers() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        // Own sector 2, neighbor sector is 1
        let mut tp = csc_hit(2, 3, 50, 10);
        tp.id.sector = 1;
        let link = selection.select_csc(&tp, &mut anomalies).unwrap();
        assert_eq!(link, 48, "csc_id 3 of ME2 lands in the neighbor range");

        let mut tp = csc_hit(2, 4, 50, 10);
        tp.id.sector = 1;
        assert!(
            selection.select_csc(&tp, &mut anomalies).is_none(),
            "csc_id 4 is not an edge chamber"
        );

        let no_neighbor = PrimitiveSelection::new(&SectorConfig {
            include_neighbor: false,
            ..config()
        });
        let mut tp = csc_hit(2, 3, 50, 10);
        tp.id.sector = 1;
        assert!(no_neighbor.select_csc(&tp, &mut anomalies).is_none());
    }

    #[test]
    fn duplicate_synthesis_covers_all_combinations() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let hits = [csc_hit(2, 4, 5, 10), csc_hit(2, 4, 7, 20)];
        let selected = selection.process_csc(&hits, &mut anomalies).unwrap();

        let prims = &selected[&21]; // station 2, csc_id 4
        let pairs: Vec<(i32, i32)> = prims.iter().map(strip_wire).collect();
        assert_eq!(pairs, vec![(5, 10), (7, 10), (5, 20), (7, 20)]);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn no_duplicates_when_strip_or_wire_shared() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let hits = [csc_hit(2, 4, 5, 10), csc_hit(2, 4, 5, 20)];
        let selected = selection.process_csc(&hits, &mut anomalies).unwrap();
        assert_eq!(selected[&21].len(), 2, "shared strip, no synthesis");
    }

    #[test]
    fn chamber_overflow_keeps_first_two() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let hits: Vec<TriggerPrimitive> =
            (0..5).map(|i| csc_hit(2, 4, 10 + i, 30 + i)).collect();
        let selected = selection.process_csc(&hits, &mut anomalies).unwrap();

        let prims = &selected[&21];
        // First two by arrival order, then theta-duplicated to 4
        let pairs: Vec<(i32, i32)> = prims.iter().map(strip_wire).collect();
        assert_eq!(pairs, vec![(10, 30), (11, 30), (10, 31), (11, 31)]);
        assert!(anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::ChamberOverflow { count: 5, .. })));
    }

    #[test]
    fn me11_bug_forces_four_duplicates() {
        let selection = PrimitiveSelection::new(&SectorConfig {
            bug_me11_dupes: true,
            ..config()
        });
        let mut anomalies = Vec::new();

        // ME1/1: station 1, ring 1, csc_id 1, chamber with subsector 2
        let mut hits = [csc_hit(1, 1, 5, 10), csc_hit(1, 1, 5, 20)];
        for tp in &mut hits {
            tp.id.ring = 1;
            tp.id.chamber = 8; // chamber % 6 == 2 -> subsector 2
        }
        let selected = selection.process_csc(&hits, &mut anomalies).unwrap();

        let link = csc_link(2, 1, 1, false);
        assert!(is_me11_link(link));
        assert_eq!(
            selected[&link].len(),
            4,
            "shared strip still duplicates under the ME1/1 bug"
        );
    }

    #[test]
    fn corrupt_pattern_and_quality_clamped() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let mut tp = csc_hit(2, 4, 50, 10);
        if let PrimitivePayload::Csc(d) = &mut tp.payload {
            d.pattern = 12;
            d.quality = 0;
        }
        let selected = selection.process_csc(&[tp], &mut anomalies).unwrap();

        let data = selected[&21][0].csc().unwrap();
        assert_eq!(data.pattern, 10);
        assert_eq!(data.quality, 1);
        assert!(anomalies.contains(&Anomaly::CorruptPattern { was: 12, now: 10 }));
        assert!(anomalies.contains(&Anomaly::CorruptQuality { was: 0, now: 1 }));
    }

    #[test]
    fn rpc_cluster_size_cut_after_truncation() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        // Same chamber: one wide cluster first, then two narrow ones.
        // Truncation keeps the first two, the size cut then removes the
        // wide one, leaving a single cluster.
        let hits = [
            rpc_hit(2, 2, 4, 5, 5),
            rpc_hit(2, 2, 4, 15, 1),
            rpc_hit(2, 2, 4, 25, 1),
        ];
        let selected = selection.process_rpc(&hits, &mut anomalies).unwrap();

        let prims: Vec<_> = selected.values().flatten().collect();
        assert_eq!(prims.len(), 1);
        assert_eq!(prims[0].rpc().unwrap().strip, 15);
    }

    #[test]
    fn rpc_collision_first_inserted_wins() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        // RE3/2 and RE3/3 in the same subsector map onto the same merged
        // slot; the RE3/2 cluster keeps its validity, the RE3/3 cluster is
        // retained but invalidated.
        let hits = [rpc_hit(3, 2, 4, 5, 1), rpc_hit(3, 3, 4, 9, 1)];
        let selected = selection.process_rpc(&hits, &mut anomalies).unwrap();

        assert_eq!(selected.len(), 1, "both chambers collapse onto one slot");
        let prims = selected.values().next().unwrap();
        assert_eq!(prims.len(), 2);
        assert!(prims[0].rpc().unwrap().valid);
        assert!(!prims[1].rpc().unwrap().valid);
    }

    #[test]
    fn rpc_remap_stays_on_csc_axis() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let hits = [
            rpc_hit(1, 2, 4, 5, 1),
            rpc_hit(2, 2, 5, 6, 1),
            rpc_hit(4, 3, 3, 7, 1),
        ];
        let selected = selection.process_rpc(&hits, &mut anomalies).unwrap();
        for &link in selected.keys() {
            assert!((0..NUM_CSC_LINKS).contains(&link));
        }
    }

    #[test]
    fn merge_precedence_csc_over_gem_over_rpc() {
        let selection = PrimitiveSelection::new(&config());

        let csc_tp = csc_hit(2, 4, 5, 10);
        let rpc_tp = rpc_hit(2, 2, 4, 5, 1);
        let gem_tp = TriggerPrimitive {
            id: DetectorId {
                endcap: 1,
                sector: 2,
                station: 1,
                ring: 1,
                chamber: 9,
                roll: 3,
                ..Default::default()
            },
            payload: PrimitivePayload::Gem(GemData {
                pad: 20,
                pad_low: 19,
                pad_hi: 21,
                layer: 1,
                bx: 0,
                is_me0: false,
            }),
        };

        let mut csc = LinkMap::new();
        csc.insert(21, vec![csc_tp]);
        let mut rpc = LinkMap::new();
        rpc.insert(21, vec![rpc_tp]);
        rpc.insert(30, vec![rpc_tp]);
        let mut gem = LinkMap::new();
        gem.insert(21, vec![gem_tp]);
        gem.insert(7, vec![gem_tp]);

        let merged = selection.merge(&csc, &rpc, &gem).unwrap();
        assert_eq!(merged[&21][0].subsystem(), Subsystem::Csc);
        assert_eq!(merged[&7][0].subsystem(), Subsystem::Gem);
        assert_eq!(merged[&30][0].subsystem(), Subsystem::Rpc);
    }

    #[test]
    fn merge_excludes_invalid_rpc_but_no_truncate_keeps_them() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let hits = [rpc_hit(3, 2, 4, 5, 1), rpc_hit(3, 3, 4, 9, 1)];
        let rpc = selection.process_rpc(&hits, &mut anomalies).unwrap();

        let merged = selection.merge(&LinkMap::new(), &rpc, &LinkMap::new()).unwrap();
        let full = selection.merge_no_truncate(&LinkMap::new(), &rpc, &LinkMap::new());

        let link = *rpc.keys().next().unwrap();
        assert_eq!(merged[&link].len(), 1, "invalidated cluster excluded");
        assert_eq!(full[&link].len(), 2, "diagnostic union keeps both");
    }

    #[test]
    fn merge_is_idempotent() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let csc = selection
            .process_csc(&[csc_hit(2, 4, 5, 10), csc_hit(3, 6, 7, 20)], &mut anomalies)
            .unwrap();
        let rpc = selection
            .process_rpc(&[rpc_hit(2, 2, 4, 5, 1)], &mut anomalies)
            .unwrap();
        let gem = LinkMap::new();

        let a = selection.merge(&csc, &rpc, &gem).unwrap();
        let b = selection.merge(&csc, &rpc, &gem).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn gem_truncation_size_cut_then_first_eight() {
        let selection = PrimitiveSelection::new(&config());
        let mut anomalies = Vec::new();

        let mut hits = Vec::new();
        for i in 0..10 {
            let mut tp = TriggerPrimitive {
                id: DetectorId {
                    endcap: 1,
                    sector: 2,
                    station: 1,
                    ring: 1,
                    chamber: 9,
                    roll: 3,
                    ..Default::default()
                },
                payload: PrimitivePayload::Gem(GemData {
                    pad: 10 + i,
                    pad_low: 10 + i,
                    pad_hi: 10 + i,
                    layer: 1,
                    bx: 0,
                    is_me0: false,
                }),
            };
            if i == 0 {
                // Oversized cluster, removed before the count cut
                if let PrimitivePayload::Gem(d) = &mut tp.payload {
                    d.pad_hi = d.pad_low + 10;
                }
            }
            hits.push(tp);
        }

        let selected = selection.process_gem(&hits, &mut anomalies).unwrap();
        let prims = selected.values().next().unwrap();
        assert_eq!(prims.len(), 8);
        assert_eq!(prims[0].gem().unwrap().pad, 11, "oversized cluster dropped first");
    }
}
