//! `sim` — Deterministic scenario simulator: synthetic primitives, roads,
//! geometry, replay.

pub mod generator;
pub mod geometry;
pub mod replay;
pub mod scenarios;

pub use generator::{GeneratorConfig, SectorEvent, SectorEventGenerator};
pub use geometry::SyntheticGeometry;
pub use replay::{load_replay, save_replay, ReplayLog};
pub use scenarios::{Scenario, ScenarioKind};
