//! Synthetic geometry: a deterministic stand-in for the conversion
//! services that own phi/theta lookup in production.
//!
//! The generator emits strips in sector-global coordinates, so
//! full-precision phi is simply `strip << 5 | 0x10` — the hit sits
//! mid-way through its 32-count fine bin, and the reduced-precision phi
//! recovers the strip. Zone membership is a coarse table over the ring.

use trigger_core::pipeline::{ConvGeom, HitConverter};
use trigger_core::types::{PrimitivePayload, TriggerPrimitive};

pub struct SyntheticGeometry;

impl SyntheticGeometry {
    /// Zone membership bitmask by ring. Inner rings cover the low zones,
    /// outer rings the high ones, with overlap in between.
    pub fn zone_code(ring: i32) -> i32 {
        match ring {
            1 | 4 => 0b0011,
            2 => 0b1110,
            _ => 0b1000,
        }
    }
}

impl HitConverter for SyntheticGeometry {
    fn convert(&self, link: i32, tp: &TriggerPrimitive) -> ConvGeom {
        let strip = match &tp.payload {
            PrimitivePayload::Csc(d) => d.strip,
            PrimitivePayload::Rpc(d) => d.strip,
            PrimitivePayload::Gem(d) => d.pad,
        };
        ConvGeom {
            phi_fp: ((strip << 5) | 0x10) & 0x1fff,
            theta_fp: tp.id.station * 22 + tp.id.ring * 9 + tp.id.roll,
            fs_zone_code: Self::zone_code(tp.id.ring),
            fs_segment: ((link % 9) & 0x7) << 1,
            bt_segment: ((link % 9) & 0x7) << 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigger_core::types::{CscData, DetectorId, NUM_ZONES};

    #[test]
    fn every_zone_is_reachable() {
        let union = [1, 2, 3].iter().fold(0, |acc, &r| acc | SyntheticGeometry::zone_code(r));
        assert_eq!(union, (1 << NUM_ZONES) - 1);
    }

    #[test]
    fn reduced_phi_recovers_strip() {
        let tp = TriggerPrimitive {
            id: DetectorId {
                station: 2,
                ring: 2,
                ..Default::default()
            },
            payload: PrimitivePayload::Csc(CscData {
                strip: 87,
                ..Default::default()
            }),
        };
        let geom = SyntheticGeometry.convert(21, &tp);
        assert_eq!(geom.phi_fp >> 5, 87);
    }
}
