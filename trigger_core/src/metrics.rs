//! Run metrics: occupancy, selection and matching counters.

use crate::pipeline::SectorOutput;
use serde::{Deserialize, Serialize};

/// Accumulated counters over a run of sector invocations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerMetrics {
    /// Number of sector invocations evaluated
    pub events: u64,
    /// Raw primitives presented to selection
    pub primitives_in: u64,
    /// Links with at least one selected hit (trigger path)
    pub links_occupied: u64,
    /// Selected hits on the trigger path, including synthesized duplicates
    pub hits_selected: u64,
    /// Hits in the non-truncating diagnostic union
    pub hits_selected_full: u64,
    /// Roads presented to matching
    pub roads_in: u64,
    /// Tracks emitted across all zones
    pub tracks_out: u64,
    /// Hits attached to emitted tracks
    pub hits_on_tracks: u64,
    /// Tracks that matched no hit in any station
    pub empty_tracks: u64,
    /// Soft anomalies recorded
    pub anomalies: u64,
}

impl TriggerMetrics {
    /// Accumulate one invocation's worth of output.
    pub fn accumulate(&mut self, n_primitives: usize, n_roads: usize, output: &SectorOutput) {
        self.events += 1;
        self.primitives_in += n_primitives as u64;
        self.links_occupied += output.selected_links.len() as u64;
        self.hits_selected += output.selected_links.values().map(Vec::len).sum::<usize>() as u64;
        self.hits_selected_full += output
            .selected_links_full
            .values()
            .map(Vec::len)
            .sum::<usize>() as u64;
        self.roads_in += n_roads as u64;

        for tracks in &output.zone_tracks {
            self.tracks_out += tracks.len() as u64;
            for track in tracks {
                self.hits_on_tracks += track.hits.len() as u64;
                if track.hits.is_empty() {
                    self.empty_tracks += 1;
                }
            }
        }

        self.anomalies += output.anomalies.len() as u64;
    }

    /// Mean number of occupied links per invocation.
    pub fn mean_occupancy(&self) -> f64 {
        if self.events == 0 {
            return 0.0;
        }
        self.links_occupied as f64 / self.events as f64
    }

    /// Mean number of hits attached per emitted track.
    pub fn mean_track_hits(&self) -> f64 {
        if self.tracks_out == 0 {
            return 0.0;
        }
        self.hits_on_tracks as f64 / self.tracks_out as f64
    }

    /// Fraction of roads that produced a track with at least one hit.
    pub fn match_rate(&self) -> f64 {
        if self.tracks_out == 0 {
            return 0.0;
        }
        (self.tracks_out - self.empty_tracks) as f64 / self.tracks_out as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Track;

    #[test]
    fn accumulate_counts_tracks_and_hits() {
        let mut output = SectorOutput::default();
        output.zone_tracks[0].push(Track {
            hits: vec![Default::default(), Default::default()],
            ..Default::default()
        });
        output.zone_tracks[2].push(Track::default());

        let mut metrics = TriggerMetrics::default();
        metrics.accumulate(10, 2, &output);

        assert_eq!(metrics.events, 1);
        assert_eq!(metrics.primitives_in, 10);
        assert_eq!(metrics.roads_in, 2);
        assert_eq!(metrics.tracks_out, 2);
        assert_eq!(metrics.hits_on_tracks, 2);
        assert_eq!(metrics.empty_tracks, 1);
        assert!((metrics.match_rate() - 0.5).abs() < 1e-12);
        assert!((metrics.mean_track_hits() - 1.0).abs() < 1e-12);
    }
}
