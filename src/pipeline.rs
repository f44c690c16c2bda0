//! The three-pass orchestration: tracking, per-frame enrichment, rendering.
//!
//! Every pass restarts the frame source, so at most one decoded frame is
//! held per pass. Enrichment walks frames strictly in order since camera
//! displacement and possession both accumulate over previous frames.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::camera::{adjust_frame_tracks, CameraMovement, CameraMovementEstimator};
use crate::config::PipelineConfig;
use crate::detector::Detect;
use crate::error::Error;
use crate::frame::{FrameSink, FrameSource};
use crate::kinematics::SpeedDistanceEstimator;
use crate::possession::{PlayerBallAssigner, PossessionTimeline};
use crate::render::Renderer;
use crate::team::TeamAssigner;
use crate::tracker::{add_positions, ObjectTracker};
use crate::tracks::{Team, TrackSet};
use crate::view::ViewTransformer;

/// Everything a run produces besides the annotated frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub output_video: Option<PathBuf>,
    pub fps: f32,
    pub frame_count: usize,
    pub tracks: TrackSet,
    pub possession: PossessionTimeline,
    pub camera_movement: CameraMovement,
    pub team_colors: Option<[[u8; 3]; 2]>,
}

impl AnalysisReport {
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;

        Ok(())
    }
}

/// `<stem>_processed[.ext]`, placed in `output_dir` or next to the input.
pub fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let mut name = format!("{}_processed", stem);
    if let Some(ext) = input.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }

    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

pub struct Pipeline<D: Detect> {
    config: PipelineConfig,
    tracker: ObjectTracker<D>,
    view: ViewTransformer,
    renderer: Renderer,
}

impl<D: Detect> Pipeline<D> {
    pub fn new(detector: D, config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;

        let view = ViewTransformer::new(&config.view)?;
        let renderer = Renderer::new(config.render.clone());
        let tracker = ObjectTracker::new(detector, config.tracker.clone());

        Ok(Self {
            config,
            tracker,
            view,
            renderer,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyzes `source` and writes one annotated frame per input frame to `sink`.
    pub fn run<S, K>(&mut self, source: &S, sink: &mut K) -> Result<AnalysisReport, Error>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let report = self.analyze(source)?;
        self.render(source, &report, sink).map_err(|e| e.in_stage("render"))?;

        Ok(report)
    }

    /// Tracking and enrichment passes.
    pub fn analyze<S: FrameSource + ?Sized>(&mut self, source: &S) -> Result<AnalysisReport, Error> {
        let fps = source.fps();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::Config(format!("frame rate must be positive, got {}", fps)));
        }

        let stubs = &self.config.stubs;
        let mut tracks = self
            .tracker
            .get_object_tracks(source, stubs.read_from_stub, stubs.tracks.as_deref())
            .map_err(|e| e.in_stage("tracking"))?;

        add_positions(&mut tracks);
        self.tracker.interpolate_ball_positions(&mut tracks);

        let (possession, camera_movement, team_colors) =
            self.enrich(source, &mut tracks).map_err(|e| e.in_stage("enrichment"))?;

        self.view.add_transformed_positions(&mut tracks);
        SpeedDistanceEstimator::new(fps, self.config.kinematics.clone())
            .add_speed_and_distance(&mut tracks);

        info!(
            frames = tracks.len(),
            team1 = ?possession.share_until(tracks.len()).map(|s| s[0]),
            "analysis finished"
        );

        Ok(AnalysisReport {
            output_video: None,
            fps,
            frame_count: tracks.len(),
            tracks,
            possession,
            camera_movement,
            team_colors,
        })
    }

    /// Camera movement over the whole clip, then per frame in order: camera
    /// compensation, team labels, ball possession.
    fn enrich<S: FrameSource + ?Sized>(
        &self,
        source: &S,
        tracks: &mut TrackSet,
    ) -> Result<(PossessionTimeline, CameraMovement, Option<[[u8; 3]; 2]>), Error> {
        let stubs = &self.config.stubs;
        let movement = CameraMovementEstimator::new(self.config.camera.clone()).get_camera_movement(
            source,
            tracks.len(),
            stubs.read_from_stub,
            stubs.camera.as_deref(),
        )?;

        if movement.len() != tracks.len() {
            return Err(Error::Decode {
                index: movement.len(),
                reason: format!("video has {} frames, tracks cover {}", movement.len(), tracks.len()),
            });
        }
        let cumulative = movement.cumulative();

        let mut teams = TeamAssigner::new(self.config.team.clone());
        let ball_assigner = PlayerBallAssigner::new(self.config.possession.clone());
        let mut possession = PossessionTimeline::default();

        for frame in source.frames()? {
            let frame = frame?;
            let n = frame.index;
            if n >= tracks.len() {
                return Err(Error::Decode {
                    index: n,
                    reason: format!("tracks cover only {} frames", tracks.len()),
                });
            }

            adjust_frame_tracks(tracks, n, cumulative[n]);

            let ball = tracks.ball_bbox(n);
            let players = &mut tracks.players[n];
            teams.assign_team_color(&frame.image, players);
            teams.assign_frame(&frame.image, players);
            possession.push_observation(ball_assigner.observe_frame(players, ball.as_ref()));
        }

        if possession.len() != tracks.len() {
            return Err(Error::Decode {
                index: possession.len(),
                reason: format!("video ended before the {} tracked frames", tracks.len()),
            });
        }

        let team_colors = teams
            .model()
            .map(|m| [m.color(Team::One), m.color(Team::Two)]);

        Ok((possession, movement, team_colors))
    }

    /// Annotates every frame of a fresh pass over `source` from `report`.
    pub fn render<S, K>(&self, source: &S, report: &AnalysisReport, sink: &mut K) -> Result<(), Error>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut written = 0usize;

        for frame in source.frames()? {
            let mut frame = frame?;
            self.renderer.draw_annotations(
                &mut frame.image,
                frame.index,
                &report.tracks,
                &report.possession,
                report.camera_movement.get(frame.index),
            )?;

            sink.write(&frame)?;
            written += 1;
        }

        sink.finish()?;
        info!(frames = written, "annotated video written");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names_keep_the_extension() {
        assert_eq!(
            output_path(Path::new("/in/match.mp4"), None),
            PathBuf::from("/in/match_processed.mp4")
        );
        assert_eq!(
            output_path(Path::new("clips/match.avi"), Some(Path::new("out"))),
            PathBuf::from("out/match_processed.avi")
        );
        assert_eq!(
            output_path(Path::new("/in/frames"), None),
            PathBuf::from("/in/frames_processed")
        );
    }
}
