use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::camera::CameraConfig;
use crate::error::Error;
use crate::kinematics::KinematicsConfig;
use crate::possession::PossessionConfig;
use crate::render::RenderConfig;
use crate::team::TeamConfig;
use crate::tracker::TrackerConfig;
use crate::view::ViewConfig;

/// Where cached stage results live. Both files are independent: neither
/// invalidates the other, and a stale file must be removed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub tracks: Option<PathBuf>,
    pub camera: Option<PathBuf>,
    pub read_from_stub: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            tracks: None,
            camera: None,
            read_from_stub: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracker: TrackerConfig,
    pub camera: CameraConfig,
    pub view: ViewConfig,
    pub team: TeamConfig,
    pub possession: PossessionConfig,
    pub kinematics: KinematicsConfig,
    pub render: RenderConfig,
    pub stubs: StubConfig,
    /// Directory for derived output names; `None` means next to the input.
    pub output_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.kinematics.frame_window == 0 {
            return Err(Error::Config("kinematics.frame_window must be positive".into()));
        }

        if self.tracker.batch_size == 0 {
            return Err(Error::Config("tracker.batch_size must be positive".into()));
        }

        if !(self.team.crop_top_fraction > 0.0 && self.team.crop_top_fraction <= 1.0) {
            return Err(Error::Config("team.crop_top_fraction must be in (0, 1]".into()));
        }

        let a = &self.tracker.association;
        if a.low_confidence > a.high_confidence {
            return Err(Error::Config(
                "association.low_confidence exceeds high_confidence".into(),
            ));
        }

        if self.view.pixel_vertices.len() < 4 || self.view.pixel_vertices.len() != self.view.target_vertices.len() {
            return Err(Error::Config(
                "view needs at least 4 pixel vertices matching the target vertices".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let json = r#"{ "possession": { "max_player_ball_distance": 50.0 }, "stubs": { "tracks": "stubs/t.stub" } }"#;
        let config = PipelineConfig::from_reader(json.as_bytes()).unwrap();

        assert_eq!(config.possession.max_player_ball_distance, 50.0);
        assert_eq!(config.kinematics.frame_window, 5);
        assert_eq!(config.tracker.ball_max_gap, 30);
        assert_eq!(config.stubs.tracks, Some(PathBuf::from("stubs/t.stub")));
        assert!(config.stubs.read_from_stub);
        assert!(config.stubs.camera.is_none());
    }

    #[test]
    fn rejects_zero_window() {
        let json = r#"{ "kinematics": { "frame_window": 0 } }"#;
        assert!(matches!(PipelineConfig::from_reader(json.as_bytes()), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_short_calibration() {
        let json = r#"{ "view": { "pixel_vertices": [[0, 0], [1, 0], [1, 1]] } }"#;
        assert!(matches!(PipelineConfig::from_reader(json.as_bytes()), Err(Error::Config(_))));
    }

    #[test]
    fn roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&PipelineConfig::default()).unwrap()).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.view.pixel_vertices.len(), 4);
    }
}
