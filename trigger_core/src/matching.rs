//! Primitive matching: associate pattern roads with selected hits per
//! (zone, station), with deterministic tie-breaking, then assemble tracks.
//!
//! # Algorithm per (zone, station) bucket
//! 1. For each road, compute the absolute phi difference between the
//!    road's pattern key and every hit in the bucket; differences above
//!    the station tolerance become the 9-bit sentinel.
//! 2. Stable-sort the candidates: CSC beats RPC unconditionally, then
//!    (phi difference, segment history) ascending; full ties keep input
//!    order. The front is the best match, or the sentinel if none.
//! 3. Per road, insert the best hit of each station together with its
//!    theta-duplicates, stable-sorted by station.

use crate::{
    error::{Result, TriggerError},
    pipeline::SectorConfig,
    types::{
        ConvHit, Road, Subsystem, Track, ZoneArray, BPOW, BW_FPH, INVALID_PH_DIFF, NUM_STATIONS,
        NUM_ZONES,
    },
};
use std::cmp::Ordering;
use tracing::debug;

/// Per-road phi difference and the index of the best-matching hit in its
/// (zone, station) bucket; `None` with the sentinel when no hit qualifies.
type PhiDiff = (i32, Option<usize>);

/// Matches roads to selected hits for one (endcap, sector, bx) context.
pub struct PrimitiveMatching {
    endcap: i32,
    sector: i32,
    bx: i32,
    fix_zone_phi: bool,
}

impl PrimitiveMatching {
    pub fn new(config: &SectorConfig) -> Self {
        Self {
            endcap: config.endcap,
            sector: config.sector,
            bx: config.bx,
            fix_zone_phi: config.fix_zone_phi,
        }
    }

    /// Match hits to roads and assemble one track per road, zone by zone.
    ///
    /// `extended_conv_hits` may span multiple bunch crossings; the bx
    /// history of each bucketed hit is encoded into its segment words.
    pub fn process(
        &self,
        extended_conv_hits: &[Vec<ConvHit>],
        zone_roads: &ZoneArray<Vec<Road>>,
    ) -> Result<ZoneArray<Vec<Track>>> {
        let mut zone_tracks: ZoneArray<Vec<Track>> = Default::default();

        let num_roads: usize = zone_roads.iter().map(Vec::len).sum();
        if num_roads == 0 {
            return Ok(zone_tracks);
        }

        let zs_hits = self.bucket_hits(extended_conv_hits, zone_roads);

        // Best phi difference for every road, by (zone, station). Each
        // bucket records exactly one entry per road in its zone.
        let mut zs_phi_diffs: Vec<Vec<PhiDiff>> = Vec::with_capacity(NUM_ZONES * NUM_STATIONS);
        for izone in 0..NUM_ZONES {
            for istation in 0..NUM_STATIONS {
                let zs = izone * NUM_STATIONS + istation;
                let station = istation as i32 + 1;
                let diffs =
                    self.process_single_zone_station(izone, station, &zone_roads[izone], &zs_hits[zs])?;
                if diffs.len() != zone_roads[izone].len() {
                    return Err(TriggerError::PhiDiffCountMismatch {
                        zone: izone,
                        station,
                        diffs: diffs.len(),
                        roads: zone_roads[izone].len(),
                    });
                }
                zs_phi_diffs.push(diffs);
            }
        }

        // Build all tracks in each zone, in road order.
        for izone in 0..NUM_ZONES {
            for (iroad, road) in zone_roads[izone].iter().enumerate() {
                let mut track = Track {
                    endcap: road.endcap,
                    sector: road.sector,
                    sector_idx: road.sector_idx,
                    bx: road.bx,
                    zone: road.zone,
                    rank: road.quality_code,
                    winner: road.winner,
                    hits: Vec::new(),
                };

                for istation in 0..NUM_STATIONS {
                    let zs = izone * NUM_STATIONS + istation;
                    if let (ph_diff, Some(best)) = zs_phi_diffs[zs][iroad] {
                        debug_assert_ne!(ph_diff, INVALID_PH_DIFF);
                        self.insert_hits(izone, best, &zs_hits[zs], &mut track)?;
                    }
                }

                track.hits.sort_by_key(|hit| hit.station);

                if self.fix_zone_phi && track.hits.is_empty() {
                    return Err(TriggerError::EmptyTrack { zone: izone });
                }

                debug!(
                    endcap = self.endcap,
                    sector = self.sector,
                    zone = izone,
                    winner = track.winner,
                    hits = track.hits.len(),
                    "assembled track"
                );
                zone_tracks[izone].push(track);
            }
        }

        Ok(zone_tracks)
    }

    /// Organize hits by (zone, station). A hit enters every zone whose bit
    /// is set in its firmware zone code; zones without roads are skipped.
    /// The bx history goes into the bucketed copy only, never into the
    /// original collection.
    fn bucket_hits(
        &self,
        extended_conv_hits: &[Vec<ConvHit>],
        zone_roads: &ZoneArray<Vec<Road>>,
    ) -> Vec<Vec<ConvHit>> {
        let mut zs_hits: Vec<Vec<ConvHit>> = vec![Vec::new(); NUM_ZONES * NUM_STATIONS];

        for conv_hits in extended_conv_hits {
            for hit in conv_hits {
                // Out-of-range stations were already reported by selection
                if !(1..=NUM_STATIONS as i32).contains(&hit.station) {
                    continue;
                }
                let istation = (hit.station - 1) as usize;
                for izone in 0..NUM_ZONES {
                    if zone_roads[izone].is_empty() {
                        continue;
                    }
                    if hit.fs_zone_code & (1 << izone) == 0 {
                        continue;
                    }
                    let mut hit = *hit;
                    // 0 for the current bx, 1 for the previous, 2 before that
                    let history = self.bx - hit.bx;
                    hit.fs_segment |= (history & 0x3) << 4;
                    hit.bt_segment |= (history & 0x3) << 5;
                    zs_hits[izone * NUM_STATIONS + istation].push(hit);
                }
            }
        }

        zs_hits
    }

    /// Compute the best phi difference for every road against one
    /// (zone, station) bucket. Returns one entry per road.
    fn process_single_zone_station(
        &self,
        zone: usize,
        station: i32,
        roads: &[Road],
        hits: &[ConvHit],
    ) -> Result<Vec<PhiDiff>> {
        // Max phi difference between pattern and segment. Any hit within
        // the window may match, regardless of pattern straightness.
        let max_ph_diff = if self.fix_zone_phi {
            if station == 1 {
                496 // pattern width in ME1 plus rounding, 15*32 + 16
            } else {
                240 // pattern width in ME3,4 plus rounding, 7*32 + 16
            }
        } else if station == 1 {
            15
        } else {
            7
        };

        let mut phi_diffs = Vec::with_capacity(roads.len());

        for road in roads {
            if road.key_zhit < 0 || road.quality_code <= 0 {
                return Err(TriggerError::CorruptRoad {
                    zone,
                    reason: format!(
                        "key_zhit {} quality_code {}",
                        road.key_zhit, road.quality_code
                    ),
                });
            }

            let mut ph_pat = road.key_zhit;
            if self.fix_zone_phi {
                ph_pat <<= 5; // restore the low bits dropped by the pattern stage
            }

            let mut candidates: Vec<(i32, usize)> = Vec::new();
            for (ihit, hit) in hits.iter().enumerate() {
                debug_assert!(hit.phi_fp >= 0);
                let ph_seg = if self.fix_zone_phi {
                    hit.phi_fp
                } else {
                    hit.phi_fp >> (BW_FPH - BPOW - 1)
                };
                let ph_diff = (ph_pat - ph_seg).abs();
                if ph_diff <= max_ph_diff {
                    candidates.push((ph_diff, ihit));
                }
            }

            if candidates.is_empty() {
                phi_diffs.push((INVALID_PH_DIFF, None));
            } else {
                sort_ph_diff(&mut candidates, hits);
                let (best_diff, best_idx) = candidates[0];
                phi_diffs.push((best_diff, Some(best_idx)));
            }
        }

        Ok(phi_diffs)
    }

    /// Insert the best hit together with every geometric duplicate in the
    /// same bucket (same strip and phi, different wire and theta).
    fn insert_hits(
        &self,
        zone: usize,
        best: usize,
        hits: &[ConvHit],
        track: &mut Track,
    ) -> Result<()> {
        let best_hit = &hits[best];

        for hit in hits {
            if hit.is_duplicate_of(best_hit) {
                // Duplicates with the same strip but different wire must
                // agree on phi.
                if hit.phi_fp != best_hit.phi_fp {
                    return Err(TriggerError::DuplicatePhiMismatch {
                        zone,
                        station: best_hit.station,
                        left: hit.phi_fp,
                        right: best_hit.phi_fp,
                    });
                }
                track.hits.push(*hit);
            }
        }

        Ok(())
    }
}

/// Stable sort by phi difference: CSC hits always beat RPC hits; within
/// one subsystem the smaller (difference, segment history) pair wins;
/// full ties keep their original order.
fn sort_ph_diff(candidates: &mut [(i32, usize)], hits: &[ConvHit]) {
    candidates.sort_by(|lhs, rhs| {
        let lh = &hits[lhs.1];
        let rh = &hits[rhs.1];
        if lh.subsystem != rh.subsystem {
            if lh.subsystem == Subsystem::Csc {
                Ordering::Less
            } else if rh.subsystem == Subsystem::Csc {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        } else {
            (lhs.0, lh.fs_segment).cmp(&(rhs.0, rh.fs_segment))
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SectorConfig {
        SectorConfig {
            fix_zone_phi: false,
            ..Default::default()
        }
    }

    fn road(zone: usize, key_zhit: i32) -> Road {
        Road {
            endcap: 1,
            sector: 1,
            sector_idx: 0,
            bx: 0,
            zone,
            quality_code: 12,
            winner: 0,
            key_zhit,
        }
    }

    /// Hit with reduced-precision phi equal to `phi_red` (zone 0 only).
    fn hit(station: i32, phi_red: i32) -> ConvHit {
        ConvHit {
            station,
            phi_fp: phi_red << 5,
            fs_zone_code: 0b0001,
            ..Default::default()
        }
    }

    fn roads_in_zone0(roads: Vec<Road>) -> ZoneArray<Vec<Road>> {
        [roads, Vec::new(), Vec::new(), Vec::new()]
    }

    #[test]
    fn hit_within_tolerance_is_matched() {
        let matching = PrimitiveMatching::new(&config());
        let hits = vec![hit(1, 105)];
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[hits], &zone_roads).unwrap();
        assert_eq!(tracks[0].len(), 1);
        assert_eq!(tracks[0][0].hits.len(), 1, "diff 5 <= 15 in station 1");
        assert_eq!(tracks[0][0].hits[0].station, 1);
    }

    #[test]
    fn hit_outside_tolerance_records_sentinel() {
        let matching = PrimitiveMatching::new(&config());
        let hits = vec![hit(1, 200)];
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[hits], &zone_roads).unwrap();
        assert_eq!(tracks[0].len(), 1, "road still yields a track");
        assert!(tracks[0][0].hits.is_empty(), "diff 100 > 15");
    }

    #[test]
    fn station_tolerances_differ() {
        let matching = PrimitiveMatching::new(&config());
        // diff 10: inside the station-1 window (15), outside station 2 (7)
        let hits = vec![hit(1, 110), hit(2, 110)];
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[hits], &zone_roads).unwrap();
        let stations: Vec<i32> = tracks[0][0].hits.iter().map(|h| h.station).collect();
        assert_eq!(stations, vec![1]);
    }

    #[test]
    fn full_precision_tolerances() {
        let matching = PrimitiveMatching::new(&SectorConfig {
            fix_zone_phi: true,
            ..Default::default()
        });
        // Pattern key 100 -> full-precision 3200. Hit at 3440: diff 240.
        let mut h2 = hit(2, 0);
        h2.phi_fp = 3440;
        let mut h3 = hit(3, 0);
        h3.phi_fp = 3441; // diff 241, outside
        let mut h1 = hit(1, 0);
        h1.phi_fp = 3200 + 496; // boundary of the station-1 window
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[vec![h1, h2, h3]], &zone_roads).unwrap();
        let stations: Vec<i32> = tracks[0][0].hits.iter().map(|h| h.station).collect();
        assert_eq!(stations, vec![1, 2]);
    }

    #[test]
    fn csc_preferred_over_rpc_regardless_of_difference() {
        let matching = PrimitiveMatching::new(&config());
        let mut rpc = hit(1, 101); // diff 1
        rpc.subsystem = Subsystem::Rpc;
        rpc.strip = 7;
        let mut csc = hit(1, 110); // diff 10
        csc.strip = 9;
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[vec![rpc, csc]], &zone_roads).unwrap();
        let best = &tracks[0][0].hits[0];
        assert_eq!(best.subsystem, Subsystem::Csc);
        assert_eq!(best.strip, 9);
    }

    #[test]
    fn tie_broken_by_segment_history_then_input_order() {
        let matching = PrimitiveMatching::new(&config());
        // Same phi difference; the lower fs_segment wins.
        let mut a = hit(2, 103);
        a.strip = 1;
        a.fs_segment = 2;
        let mut b = hit(2, 103);
        b.strip = 2;
        b.fs_segment = 1;
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[vec![a, b]], &zone_roads).unwrap();
        assert_eq!(tracks[0][0].hits[0].strip, 2);

        // Full tie: input order preserved.
        let mut c = hit(2, 103);
        c.strip = 5;
        c.fs_segment = 1;
        let mut d = hit(2, 103);
        d.strip = 6;
        d.fs_segment = 1;
        let tracks = matching.process(&[vec![c, d]], &zone_roads).unwrap();
        assert_eq!(tracks[0][0].hits[0].strip, 5);
    }

    #[test]
    fn theta_duplicates_inserted_together() {
        let matching = PrimitiveMatching::new(&config());
        // Two hits differing only in wire: both enter the track.
        let mut a = hit(2, 103);
        a.wire = 10;
        let mut b = hit(2, 103);
        b.wire = 20;
        // Different strip: not a duplicate.
        let mut c = hit(2, 104);
        c.strip = 99;
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[vec![a, b, c]], &zone_roads).unwrap();
        let wires: Vec<i32> = tracks[0][0].hits.iter().map(|h| h.wire).collect();
        assert_eq!(wires, vec![10, 20]);
    }

    #[test]
    fn duplicate_phi_mismatch_is_fatal() {
        let matching = PrimitiveMatching::new(&config());
        let mut a = hit(2, 103);
        a.wire = 10;
        let mut b = hit(2, 103);
        b.wire = 20;
        b.phi_fp += 1; // same reduced phi, different full phi
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let err = matching.process(&[vec![a, b]], &zone_roads).unwrap_err();
        assert!(matches!(err, TriggerError::DuplicatePhiMismatch { .. }));
    }

    #[test]
    fn track_hits_sorted_by_station() {
        let matching = PrimitiveMatching::new(&config());
        let hits = vec![hit(4, 103), hit(2, 102), hit(1, 101), hit(3, 104)];
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let tracks = matching.process(&[hits], &zone_roads).unwrap();
        let stations: Vec<i32> = tracks[0][0].hits.iter().map(|h| h.station).collect();
        assert_eq!(stations, vec![1, 2, 3, 4]);
    }

    #[test]
    fn zero_roads_everywhere_short_circuits() {
        let matching = PrimitiveMatching::new(&config());
        let hits = vec![hit(1, 100)];
        let zone_roads: ZoneArray<Vec<Road>> = Default::default();

        let tracks = matching.process(&[hits], &zone_roads).unwrap();
        assert!(tracks.iter().all(Vec::is_empty));
    }

    #[test]
    fn hit_enters_multiple_zones() {
        let matching = PrimitiveMatching::new(&config());
        let mut h = hit(1, 105);
        h.fs_zone_code = 0b0011; // zones 0 and 1
        let zone_roads = [
            vec![road(0, 100)],
            vec![road(1, 100)],
            Vec::new(),
            Vec::new(),
        ];

        let tracks = matching.process(&[vec![h]], &zone_roads).unwrap();
        assert_eq!(tracks[0][0].hits.len(), 1);
        assert_eq!(tracks[1][0].hits.len(), 1);
    }

    #[test]
    fn bx_history_encoded_in_bucketed_copy() {
        let matching = PrimitiveMatching::new(&SectorConfig {
            bx: 1,
            ..config()
        });
        let mut h = hit(1, 105);
        h.bx = 0; // one bx before the processing bx
        let zone_roads = roads_in_zone0(vec![Road {
            bx: 1,
            ..road(0, 100)
        }]);

        let tracks = matching.process(&[vec![h]], &zone_roads).unwrap();
        let matched = &tracks[0][0].hits[0];
        assert_eq!((matched.fs_segment >> 4) & 0x3, 1);
        assert_eq!((matched.bt_segment >> 5) & 0x3, 1);
    }

    #[test]
    fn empty_track_fatal_with_fixed_precision() {
        let matching = PrimitiveMatching::new(&SectorConfig {
            fix_zone_phi: true,
            ..Default::default()
        });
        let zone_roads = roads_in_zone0(vec![road(0, 100)]);

        let err = matching.process(&[Vec::new()], &zone_roads).unwrap_err();
        assert!(matches!(err, TriggerError::EmptyTrack { zone: 0 }));
    }

    #[test]
    fn corrupt_road_is_fatal() {
        let matching = PrimitiveMatching::new(&config());
        let mut bad = road(0, 100);
        bad.quality_code = 0;
        let zone_roads = roads_in_zone0(vec![bad]);

        let err = matching.process(&[Vec::new()], &zone_roads).unwrap_err();
        assert!(matches!(err, TriggerError::CorruptRoad { zone: 0, .. }));
    }

    #[test]
    fn track_carries_road_identity() {
        let matching = PrimitiveMatching::new(&config());
        let mut r = road(0, 100);
        r.endcap = 2;
        r.sector = 5;
        r.sector_idx = 10;
        r.quality_code = 33;
        r.winner = 3;
        let zone_roads = roads_in_zone0(vec![r]);

        let tracks = matching.process(&[vec![hit(1, 105)]], &zone_roads).unwrap();
        let track = &tracks[0][0];
        assert_eq!(track.endcap, 2);
        assert_eq!(track.sector, 5);
        assert_eq!(track.sector_idx, 10);
        assert_eq!(track.rank, 33);
        assert_eq!(track.winner, 3);
    }
}
