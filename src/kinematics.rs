use std::collections::BTreeMap;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::tracks::TrackSet;

/// Meters per second to kilometers per hour.
pub const MPS_TO_KMH: f32 = 3.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Frames between the two samples of one speed measurement.
    pub frame_window: usize,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self { frame_window: 5 }
    }
}

pub struct SpeedDistanceEstimator {
    fps: f32,
    config: KinematicsConfig,
}

impl SpeedDistanceEstimator {
    pub fn new(fps: f32, config: KinematicsConfig) -> Self {
        Self { fps, config }
    }

    /// Writes `speed` (m/s) and cumulative `distance` (m) for players.
    ///
    /// Each window `[f, f + N]` is measured between its boundary frames on
    /// the pitch plane, and the result is written to every frame of
    /// `[f, f + N)` where the player is present. Windows where either end
    /// has no pitch position are skipped; the running distance is kept.
    pub fn add_speed_and_distance(&self, tracks: &mut TrackSet) {
        let frames = &mut tracks.players;
        let n = frames.len();
        let window = self.config.frame_window.max(1);
        let mut total: BTreeMap<u32, f32> = BTreeMap::new();

        for start in (0..n).step_by(window) {
            let last = (start + window).min(n.saturating_sub(1));
            if last <= start {
                continue;
            }

            let elapsed = (last - start) as f32 / self.fps;
            let ids: Vec<u32> = frames[start].keys().copied().collect();

            for id in ids {
                let from = frames[start][&id].position_transformed;
                let to = frames[last].get(&id).and_then(|t| t.position_transformed);
                let (Some(from), Some(to)) = (from, to) else {
                    continue;
                };

                let covered = na::distance(&from, &to);
                let speed = covered / elapsed;
                let distance = {
                    let d = total.entry(id).or_insert(0.0);
                    *d += covered;
                    *d
                };

                for frame in &mut frames[start..last] {
                    if let Some(track) = frame.get_mut(&id) {
                        track.speed = Some(speed);
                        track.distance = Some(distance);
                    }
                }
            }
        }

        debug!(players = total.len(), "speed and distance estimated");
    }
}
