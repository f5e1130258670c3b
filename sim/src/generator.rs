//! Synthetic sector-event generator.
//!
//! Builds deterministic populations of raw primitives together with the
//! roads the upstream pattern stage would have produced for them: muon
//! ladders across the stations near a common key phi, optional RPC/GEM
//! companions, noise clusters and overflow chambers.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;
use trigger_core::error::Anomaly;
use trigger_core::pipeline::SectorConfig;
use trigger_core::types::{
    CscData, DetectorId, GemData, PrimitivePayload, Road, RpcData, TriggerPrimitive, ZoneArray,
    NUM_STATIONS, NUM_ZONES,
};

/// One sector invocation's worth of input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectorEvent {
    pub primitives: Vec<TriggerPrimitive>,
    pub zone_roads: ZoneArray<Vec<Road>>,
}

impl SectorEvent {
    pub fn num_roads(&self) -> usize {
        self.zone_roads.iter().map(Vec::len).sum()
    }
}

/// Knobs for the generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Muons per event
    pub muons: usize,
    /// Per-station firing efficiency, parallel to stations 1 - 4
    pub station_efficiency: Vec<f64>,
    /// Replace CSC hits with RPC clusters in stations 3 - 4
    pub rpc_fallback: bool,
    /// Add GEM companion clusters in stations 1 - 2
    pub gem_companions: bool,
    /// Random clusters with no associated road
    pub noise_hits: usize,
    /// Chambers stuffed with 5 LCTs, exercising overflow truncation
    pub overflow_chambers: usize,
    /// Put muons on the adjacent sector's edge chambers
    pub neighbor_edge: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            muons: 1,
            station_efficiency: vec![1.0; NUM_STATIONS],
            rpc_fallback: false,
            gem_companions: false,
            noise_hits: 0,
            overflow_chambers: 0,
            neighbor_edge: false,
        }
    }
}

/// Seeded generator of [`SectorEvent`]s for one sector context.
pub struct SectorEventGenerator {
    sector: SectorConfig,
    config: GeneratorConfig,
    rng: ChaCha8Rng,
    setup_anomalies: Vec<Anomaly>,
}

impl SectorEventGenerator {
    pub fn new(sector: SectorConfig, mut config: GeneratorConfig, seed: u64) -> Self {
        // Parallel configuration vectors degrade to the shortest common
        // length: stations past the end of the vector simply never fire.
        let mut setup_anomalies = Vec::new();
        if config.station_efficiency.len() != NUM_STATIONS {
            warn!(
                expected = NUM_STATIONS,
                actual = config.station_efficiency.len(),
                "station_efficiency length mismatch, degrading to the shortest common length"
            );
            setup_anomalies.push(Anomaly::ConfigLengthMismatch {
                expected: NUM_STATIONS,
                actual: config.station_efficiency.len(),
            });
            config.station_efficiency.truncate(NUM_STATIONS);
        }
        Self {
            sector,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            setup_anomalies,
        }
    }

    /// Anomalies recorded while validating the generator configuration.
    pub fn setup_anomalies(&self) -> &[Anomaly] {
        &self.setup_anomalies
    }

    /// Generate one sector event.
    pub fn generate(&mut self) -> SectorEvent {
        let mut primitives = Vec::new();
        let mut zone_roads: ZoneArray<Vec<Road>> = Default::default();

        for _ in 0..self.config.muons {
            self.generate_muon(&mut primitives, &mut zone_roads);
        }
        for _ in 0..self.config.noise_hits {
            let hit = self.noise_hit();
            primitives.push(hit);
        }
        for _ in 0..self.config.overflow_chambers {
            self.overflow_chamber(&mut primitives);
        }

        SectorEvent {
            primitives,
            zone_roads,
        }
    }

    /// One muon: hits across the stations near a shared key phi, plus the
    /// road the pattern stage would have found for them.
    fn generate_muon(
        &mut self,
        primitives: &mut Vec<TriggerPrimitive>,
        zone_roads: &mut ZoneArray<Vec<Road>>,
    ) {
        // RPC companions are ring-2 chambers, which sit outside zone 0;
        // the borrowed edge chambers are ring-1, which covers zones 0 - 1.
        let zone = if self.config.rpc_fallback {
            self.rng.gen_range(2..NUM_ZONES)
        } else if self.config.neighbor_edge {
            self.rng.gen_range(0..2)
        } else {
            self.rng.gen_range(0..NUM_ZONES)
        };
        let ring = if zone <= 1 { 1 } else { 2 };
        let base_strip = if self.config.rpc_fallback {
            self.rng.gen_range(4..28) // stay inside the RPC strip range
        } else {
            self.rng.gen_range(16..112)
        };

        let (hit_sector, csc_id, chamber) = if self.config.neighbor_edge {
            // Edge chamber of the adjacent sector: chamber ID 3 is eligible
            // in every station, chamber 2 puts ME1 in subsector 2.
            let s = if self.sector.sector == 1 {
                6
            } else {
                self.sector.sector - 1
            };
            (s, 3, 2)
        } else {
            let csc_id = if ring == 1 {
                self.rng.gen_range(1..=3)
            } else {
                self.rng.gen_range(4..=6)
            };
            (self.sector.sector, csc_id, self.rng.gen_range(1..=36))
        };

        let mut stations_hit = Vec::new();
        for station in 1..=NUM_STATIONS as i32 {
            let eff = self
                .config
                .station_efficiency
                .get(station as usize - 1)
                .copied()
                .unwrap_or(0.0);
            if self.rng.gen_bool(eff.clamp(0.0, 1.0)) {
                stations_hit.push(station);
            }
        }
        if stations_hit.is_empty() {
            stations_hit.push(1); // a road always has its key hit
        }

        for &station in &stations_hit {
            let jitter = self.rng.gen_range(-2..=2);
            let strip = (base_strip + jitter).max(1);

            if self.config.rpc_fallback && station >= 3 {
                let cluster = self.rpc_cluster(station, strip);
                primitives.push(cluster);
            } else {
                primitives.push(TriggerPrimitive {
                    id: DetectorId {
                        endcap: self.sector.endcap,
                        sector: hit_sector,
                        station,
                        ring,
                        chamber,
                        ..Default::default()
                    },
                    payload: PrimitivePayload::Csc(CscData {
                        csc_id,
                        strip,
                        wire: self.rng.gen_range(0..112),
                        pattern: self.rng.gen_range(2..=10),
                        quality: self.rng.gen_range(1..=15),
                        bx: self.sector.bx - self.sector.bx_shift_csc,
                        valid: true,
                    }),
                });
                if self.config.gem_companions && station <= 2 && ring == 1 {
                    let cluster = self.gem_cluster(station, strip);
                    primitives.push(cluster);
                }
            }
        }

        let winner = zone_roads[zone].len() as i32;
        zone_roads[zone].push(Road {
            endcap: self.sector.endcap,
            sector: self.sector.sector,
            sector_idx: self.sector.sector_idx(),
            bx: self.sector.bx,
            zone,
            quality_code: self.rng.gen_range(1..=63),
            winner,
            key_zhit: base_strip,
        });
    }

    fn rpc_cluster(&mut self, station: i32, strip: i32) -> TriggerPrimitive {
        let width = self.rng.gen_range(0..=1);
        TriggerPrimitive {
            id: DetectorId {
                endcap: self.sector.endcap,
                sector: self.sector.sector,
                subsector: self.rng.gen_range(3..=6),
                station,
                ring: 2,
                roll: self.rng.gen_range(1..=3),
                ..Default::default()
            },
            payload: PrimitivePayload::Rpc(RpcData {
                strip,
                strip_low: strip,
                strip_hi: strip + width,
                bx: self.sector.bx - self.sector.bx_shift_rpc,
                valid: true,
            }),
        }
    }

    fn gem_cluster(&mut self, station: i32, strip: i32) -> TriggerPrimitive {
        // Chamber range whose CSC-convention trigger sector is ours.
        let chamber = if station == 1 {
            6 * (self.sector.sector - 1) + 3 + self.rng.gen_range(0..6)
        } else {
            3 * (self.sector.sector - 1) + 2 + self.rng.gen_range(0..3)
        };
        let width = self.rng.gen_range(0..=2);
        TriggerPrimitive {
            id: DetectorId {
                endcap: self.sector.endcap,
                sector: self.sector.sector,
                station,
                ring: 1,
                chamber,
                roll: self.rng.gen_range(1..=8),
                ..Default::default()
            },
            payload: PrimitivePayload::Gem(GemData {
                pad: strip,
                pad_low: strip,
                pad_hi: strip + width,
                layer: self.rng.gen_range(1..=2),
                bx: self.sector.bx - self.sector.bx_shift_gem,
                is_me0: false,
            }),
        }
    }

    fn noise_hit(&mut self) -> TriggerPrimitive {
        TriggerPrimitive {
            id: DetectorId {
                endcap: self.sector.endcap,
                sector: self.sector.sector,
                station: self.rng.gen_range(1..=4),
                ring: 2,
                chamber: self.rng.gen_range(1..=36),
                ..Default::default()
            },
            payload: PrimitivePayload::Csc(CscData {
                csc_id: self.rng.gen_range(4..=6),
                strip: self.rng.gen_range(0..120),
                wire: self.rng.gen_range(0..112),
                pattern: self.rng.gen_range(2..=10),
                quality: self.rng.gen_range(1..=15),
                bx: self.sector.bx - self.sector.bx_shift_csc,
                valid: true,
            }),
        }
    }

    /// Five LCTs in one chamber; selection keeps the first two and logs a
    /// warning.
    fn overflow_chamber(&mut self, primitives: &mut Vec<TriggerPrimitive>) {
        let base = self.rng.gen_range(16..100);
        for i in 0..5 {
            primitives.push(TriggerPrimitive {
                id: DetectorId {
                    endcap: self.sector.endcap,
                    sector: self.sector.sector,
                    station: 2,
                    ring: 2,
                    chamber: 5,
                    ..Default::default()
                },
                payload: PrimitivePayload::Csc(CscData {
                    csc_id: 9,
                    strip: base + i * 3,
                    wire: 30 + i * 2,
                    pattern: 8,
                    quality: 10,
                    bx: self.sector.bx - self.sector.bx_shift_csc,
                    valid: true,
                }),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
