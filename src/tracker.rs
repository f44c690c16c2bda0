use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::{Detection, ObjectClass};
use crate::detector::Detect;
use crate::error::Error;
use crate::frame::{Frame, FrameSource};
use crate::math;
use crate::scene::{Scene, SceneConfig};
use crate::stub;
use crate::tracks::{FrameTracks, TrackFrame, TrackSet, BALL_ID};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Frames handed to the detector per call.
    pub batch_size: usize,
    pub association: SceneConfig,
    /// Longest run of missing ball frames that is interpolated.
    pub ball_max_gap: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            association: SceneConfig::default(),
            ball_max_gap: 30,
        }
    }
}

pub struct ObjectTracker<D: Detect> {
    detector: D,
    config: TrackerConfig,
}

impl<D: Detect> ObjectTracker<D> {
    pub fn new(detector: D, config: TrackerConfig) -> Self {
        Self { detector, config }
    }

    /// Runs the detector over one pass of the source, `batch_size` frames at a time.
    pub fn detect_frames<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<Vec<Vec<Detection>>, Error> {
        let batch_size = self.config.batch_size.max(1);
        let mut detections = Vec::new();
        let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);

        for frame in source.frames()? {
            batch.push(frame?);

            if batch.len() == batch_size {
                detections.extend(self.detect_batch(&batch)?);
                batch.clear();
            }
        }

        if !batch.is_empty() {
            detections.extend(self.detect_batch(&batch)?);
        }

        if detections.is_empty() {
            return Err(Error::EmptyVideo);
        }

        Ok(detections)
    }

    fn detect_batch(&mut self, batch: &[Frame]) -> Result<Vec<Vec<Detection>>, Error> {
        let out = self.detector.detect(batch)?;

        if out.len() != batch.len() {
            return Err(Error::Detector {
                frame: batch[0].index,
                reason: format!("expected {} results, got {}", batch.len(), out.len()),
            });
        }

        debug!(first = batch[0].index, len = batch.len(), "batch detected");
        Ok(out)
    }

    /// Builds the track table, or loads it verbatim from `stub_path` when
    /// `read_from_stub` is set and a readable stub exists there.
    pub fn get_object_tracks<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        read_from_stub: bool,
        stub_path: Option<&Path>,
    ) -> Result<TrackSet, Error> {
        if read_from_stub {
            if let Some(tracks) = stub_path.and_then(stub::read::<TrackSet, _>) {
                info!(frames = tracks.len(), "tracks loaded from stub");
                return Ok(tracks);
            }
        }

        let detections = self.detect_frames(source)?;
        let tracks = self.associate(&detections);
        info!(frames = tracks.len(), "tracking finished");

        if let Some(path) = stub_path {
            stub::write(path, &tracks)?;
        }

        Ok(tracks)
    }

    /// Turns per-frame detections into identity-stable tracks.
    pub fn associate(&self, detections: &[Vec<Detection>]) -> TrackSet {
        let mut tracks = TrackSet::with_frames(detections.len());
        let mut people = Scene::new(self.config.association.clone());

        for (frame_num, dets) in detections.iter().enumerate() {
            let mut persons = Vec::with_capacity(dets.len());
            let mut ball: Option<&Detection> = None;

            for det in dets {
                match det.class.folded() {
                    ObjectClass::Ball => {
                        if ball.map_or(true, |b| det.confidence > b.confidence) {
                            ball = Some(det);
                        }
                    }
                    _ => persons.push(*det),
                }
            }

            for (track_id, det) in people.update(frame_num, &persons) {
                tracks.class_mut(det.class)[frame_num].insert(track_id, TrackFrame::new(det.ltrb()));
            }

            if let Some(ball) = ball {
                tracks.ball[frame_num].insert(BALL_ID, TrackFrame::new(ball.ltrb()));
            }
        }

        tracks
    }

    pub fn interpolate_ball_positions(&self, tracks: &mut TrackSet) -> usize {
        interpolate_ball_positions(&mut tracks.ball, self.config.ball_max_gap)
    }
}

/// Writes the anchor point of every box: the foot for people, the center for the ball.
pub fn add_positions(tracks: &mut TrackSet) {
    for (class, frames) in tracks.classes_mut() {
        for track in frames.iter_mut().flat_map(|f| f.values_mut()) {
            track.position = Some(match class {
                ObjectClass::Ball => track.bbox.center(),
                _ => track.bbox.foot(),
            });
        }
    }
}

/// Fills short gaps in the ball's box series linearly; returns the number of frames filled.
pub fn interpolate_ball_positions(ball: &mut [FrameTracks], max_gap: usize) -> usize {
    let mut series: Vec<Option<[f32; 4]>> = ball
        .iter()
        .map(|f| f.get(&BALL_ID).map(|t| *t.bbox.as_slice()))
        .collect();

    let filled = math::fill_gaps(&mut series, max_gap);

    for (frame, bbox) in ball.iter_mut().zip(series) {
        if let (Some(bbox), false) = (bbox, frame.contains_key(&BALL_ID)) {
            let mut track = TrackFrame::new(bbox.into());
            track.position = Some(track.bbox.center());
            frame.insert(BALL_ID, track);
        }
    }

    debug!(filled, "ball positions interpolated");
    filled
}
