//! `trigger_core` — Muon endcap trigger: primitive selection and matching.
//!
//! # Module layout
//! - [`types`]     — Subsystems, primitives, converted hits, roads, tracks
//! - [`error`]     — Fatal consistency errors and the soft-anomaly channel
//! - [`selection`] — Link classification, dedup/truncation, subsystem merge
//! - [`matching`]  — Road-to-hit association and track assembly
//! - [`pipeline`]  — Per-sector orchestrator and the geometry seam
//! - [`metrics`]   — Occupancy and matching counters

pub mod error;
pub mod matching;
pub mod metrics;
pub mod pipeline;
pub mod selection;
pub mod types;

pub use error::{Anomaly, Result, TriggerError};
pub use matching::PrimitiveMatching;
pub use pipeline::{ConvGeom, HitConverter, SectorConfig, SectorOutput, SectorProcessor};
pub use selection::PrimitiveSelection;
pub use types::{ConvHit, Road, Subsystem, Track, TriggerPrimitive};
