//! Scenario definitions.
//!
//! Each scenario is a named configuration of sector context and generator
//! knobs. All scenarios are deterministic given the same seed.

use crate::generator::{GeneratorConfig, SectorEvent, SectorEventGenerator};
use serde::{Deserialize, Serialize};
use trigger_core::error::Anomaly;
use trigger_core::pipeline::SectorConfig;

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One clean CSC muon ladder per event, with GEM companions
    SingleMuon,
    /// Two muons per event, occasionally sharing a chamber
    DiMuon,
    /// CSC missing in the outer stations, RPC clusters fill in
    RpcFallback,
    /// Many muons plus noise and overflow chambers, legacy-precision phi
    DenseOccupancy,
    /// Muons on the adjacent sector's edge chambers
    NeighborEdge,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Sector events to generate
    pub events: usize,
    pub sector: SectorConfig,
    pub generator: GeneratorConfig,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::SingleMuon => Self::single_muon(seed),
            ScenarioKind::DiMuon => Self::di_muon(seed),
            ScenarioKind::RpcFallback => Self::rpc_fallback(seed),
            ScenarioKind::DenseOccupancy => Self::dense_occupancy(seed),
            ScenarioKind::NeighborEdge => Self::neighbor_edge(seed),
        }
    }

    /// Generate all events, returning any configuration anomalies recorded
    /// during generator setup.
    pub fn generate_events(&self) -> (Vec<SectorEvent>, Vec<Anomaly>) {
        let mut generator =
            SectorEventGenerator::new(self.sector.clone(), self.generator.clone(), self.seed);
        let events = (0..self.events).map(|_| generator.generate()).collect();
        (events, generator.setup_anomalies().to_vec())
    }

    fn single_muon(seed: u64) -> Self {
        Self {
            name: "single_muon".into(),
            seed,
            events: 200,
            sector: SectorConfig::default(),
            generator: GeneratorConfig {
                muons: 1,
                gem_companions: true,
                ..Default::default()
            },
        }
    }

    fn di_muon(seed: u64) -> Self {
        Self {
            name: "di_muon".into(),
            seed,
            events: 200,
            sector: SectorConfig::default(),
            generator: GeneratorConfig {
                muons: 2,
                ..Default::default()
            },
        }
    }

    fn rpc_fallback(seed: u64) -> Self {
        Self {
            name: "rpc_fallback".into(),
            seed,
            events: 200,
            sector: SectorConfig::default(),
            generator: GeneratorConfig {
                muons: 2,
                rpc_fallback: true,
                ..Default::default()
            },
        }
    }

    fn dense_occupancy(seed: u64) -> Self {
        Self {
            name: "dense_occupancy".into(),
            seed,
            events: 100,
            // Legacy-precision windows: an unmatched road is a normal
            // outcome here, not an invariant violation.
            sector: SectorConfig {
                fix_zone_phi: false,
                ..Default::default()
            },
            generator: GeneratorConfig {
                muons: 8,
                station_efficiency: vec![0.95, 0.9, 0.9, 0.85],
                noise_hits: 12,
                overflow_chambers: 2,
                ..Default::default()
            },
        }
    }

    fn neighbor_edge(seed: u64) -> Self {
        Self {
            name: "neighbor_edge".into(),
            seed,
            events: 200,
            sector: SectorConfig {
                sector: 4,
                ..Default::default()
            },
            generator: GeneratorConfig {
                muons: 1,
                neighbor_edge: true,
                ..Default::default()
            },
        }
    }
}
