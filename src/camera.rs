//! Camera movement estimation from background optical flow.
//!
//! For every consecutive frame pair, corners are picked in the configured
//! background strips of the earlier frame and followed into the later frame
//! with pyramidal Lucas-Kanade. The dominant flow vector is the apparent
//! background motion `new - old` of that pair. Per-pair values are
//! independent of each other; the cumulative displacement of frame `n` is the
//! prefix sum of pairs `1..=n`, and compensated positions are raw positions
//! minus that sum.

use std::collections::BTreeMap;
use std::path::Path;

use image::RgbImage;
use nalgebra as na;
use opencv::{
    core::{self, Mat, Vector},
    imgproc,
    prelude::*,
    video,
};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cv;
use crate::error::Error;
use crate::frame::FrameSource;
use crate::stub;
use crate::tracks::TrackSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Pixel column ranges `[start, end)` that show static background.
    pub feature_columns: Vec<(u32, u32)>,
    pub max_corners: usize,
    /// Corners weaker than this fraction of the strongest one are dropped.
    pub quality_level: f32,
    pub min_feature_distance: f32,
    pub block_size: usize,
    /// Lucas-Kanade window side, in pixels.
    pub window: usize,
    /// Pyramid levels above the full-resolution one.
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    /// Dominant flows shorter than this are treated as a still camera.
    pub min_movement: f32,
    /// Flow quantization used to find the dominant vector.
    pub bin_size: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            feature_columns: vec![(0, 20), (900, 1050)],
            max_corners: 100,
            quality_level: 0.3,
            min_feature_distance: 3.0,
            block_size: 7,
            window: 15,
            pyramid_levels: 2,
            max_iterations: 20,
            min_movement: 0.25,
            bin_size: 1.0,
        }
    }
}

/// Dominant flow vector: the most populated bin, refined by averaging its neighbourhood.
fn dominant_flow(flows: &[na::Vector2<f32>], bin_size: f32) -> Option<na::Vector2<f32>> {
    let bin = |f: &na::Vector2<f32>| {
        (
            (f.x / bin_size).round() as i32,
            (f.y / bin_size).round() as i32,
        )
    };

    let mut counts: BTreeMap<(i32, i32), usize> = BTreeMap::new();
    for f in flows {
        *counts.entry(bin(f)).or_insert(0) += 1;
    }

    let (mode, _) = counts
        .iter()
        .fold(None, |best: Option<((i32, i32), usize)>, (k, &n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((*k, n)),
        })?;

    let near: Vec<&na::Vector2<f32>> = flows
        .iter()
        .filter(|f| {
            let k = bin(f);
            (k.0 - mode.0).abs() <= 1 && (k.1 - mode.1).abs() <= 1
        })
        .collect();

    let sum = near.iter().fold(na::Vector2::zeros(), |acc, f| acc + **f);
    Some(sum / near.len() as f32)
}

/// 8-bit mask that is set on the configured background columns.
fn feature_mask(columns: &[(u32, u32)], size: core::Size) -> Result<Mat, Error> {
    let mut mask = Mat::new_rows_cols_with_default(size.height, size.width, core::CV_8UC1, core::Scalar::all(0.0))?;

    for &(start, end) in columns {
        let start = (start as i32).min(size.width);
        let end = (end as i32).min(size.width);
        if end <= start {
            continue;
        }

        imgproc::rectangle(
            &mut mask,
            core::Rect::new(start, 0, end - start, size.height),
            core::Scalar::all(255.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
    }

    Ok(mask)
}

pub struct CameraMovementEstimator {
    config: CameraConfig,
    prev: Option<Mat>,
    mask: Option<(core::Size, Mat)>,
}

impl CameraMovementEstimator {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            prev: None,
            mask: None,
        }
    }

    /// Background displacement between the previously pushed frame and `frame`.
    ///
    /// The first frame ever pushed has no predecessor and yields zero, as does
    /// a frame whose size differs from its predecessor.
    pub fn push(&mut self, frame: &RgbImage) -> Result<na::Vector2<f32>, Error> {
        let next = cv::gray_mat(frame)?;

        let movement = match self.prev.take() {
            Some(prev) if prev.size()? == next.size()? => self.pair_movement(&prev, &next)?,
            Some(_) => {
                warn!("frame size changed, camera movement reset");
                na::Vector2::zeros()
            }
            None => na::Vector2::zeros(),
        };

        self.prev = Some(next);
        Ok(movement)
    }

    fn pair_movement(&mut self, prev: &Mat, next: &Mat) -> Result<na::Vector2<f32>, Error> {
        let size = prev.size()?;
        if !matches!(&self.mask, Some((s, _)) if *s == size) {
            self.mask = Some((size, feature_mask(&self.config.feature_columns, size)?));
        }
        let Some((_, mask)) = &self.mask else {
            return Ok(na::Vector2::zeros());
        };

        let mut features = Vector::<core::Point2f>::new();
        imgproc::good_features_to_track(
            prev,
            &mut features,
            self.config.max_corners as i32,
            self.config.quality_level as f64,
            self.config.min_feature_distance as f64,
            mask,
            self.config.block_size as i32,
            false,
            0.04,
        )?;

        if features.is_empty() {
            debug!("no background features");
            return Ok(na::Vector2::zeros());
        }

        let mut tracked = Vector::<core::Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let criteria = core::TermCriteria::new(
            core::TermCriteria_Type::COUNT as i32 | core::TermCriteria_Type::EPS as i32,
            self.config.max_iterations as i32,
            0.03,
        )?;

        let window = self.config.window as i32;
        video::calc_optical_flow_pyr_lk(
            prev,
            next,
            &features,
            &mut tracked,
            &mut status,
            &mut err,
            core::Size::new(window, window),
            self.config.pyramid_levels as i32,
            criteria,
            0,
            1e-4,
        )?;

        let flows: Vec<na::Vector2<f32>> = features
            .iter()
            .zip(tracked.iter())
            .zip(status.iter())
            .filter(|&(_, found)| found != 0)
            .map(|((p, q), _)| na::Vector2::new(q.x - p.x, q.y - p.y))
            .collect();

        let movement = dominant_flow(&flows, self.config.bin_size).unwrap_or_else(na::Vector2::zeros);
        debug!(
            features = features.len(),
            tracked = flows.len(),
            dx = movement.x,
            dy = movement.y,
            "camera pair movement"
        );

        if movement.norm() < self.config.min_movement {
            Ok(na::Vector2::zeros())
        } else {
            Ok(movement)
        }
    }

    /// Per-frame displacements for a whole pass over `source`.
    ///
    /// A stub at `stub_path` is reused when reading is allowed and it covers
    /// exactly `frames` frames; otherwise the movement is measured and the
    /// stub rewritten.
    pub fn get_camera_movement<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        frames: usize,
        read_from_stub: bool,
        stub_path: Option<&Path>,
    ) -> Result<CameraMovement, Error> {
        if read_from_stub {
            if let Some(movement) = stub_path.and_then(stub::read::<CameraMovement, _>) {
                if movement.len() == frames {
                    info!(frames, "camera movement loaded from stub");
                    return Ok(movement);
                }

                warn!(cached = movement.len(), frames, "camera stub length mismatch, recomputing");
            }
        }

        let mut movement = CameraMovement::default();
        for frame in source.frames()? {
            movement.push(self.push(&frame?.image)?);
        }

        if let Some(path) = stub_path {
            stub::write(path, &movement)?;
        }

        Ok(movement)
    }
}

/// Per-frame background displacement, frame 0 always zero.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct CameraMovement(Vec<[f32; 2]>);

impl CameraMovement {
    pub fn new(per_frame: Vec<[f32; 2]>) -> Self {
        Self(per_frame)
    }

    pub fn push(&mut self, movement: na::Vector2<f32>) {
        self.0.push([movement.x, movement.y]);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<na::Vector2<f32>> {
        self.0.get(frame).map(|m| na::Vector2::new(m[0], m[1]))
    }

    /// Prefix sums: the total displacement up to and including each frame.
    pub fn cumulative(&self) -> Vec<na::Vector2<f32>> {
        self.0
            .iter()
            .scan(na::Vector2::zeros(), |acc, m| {
                *acc += na::Vector2::new(m[0], m[1]);
                Some(*acc)
            })
            .collect()
    }
}

/// Writes `position_adjusted = position - cumulative` for every track in `frame`.
pub fn adjust_frame_tracks(tracks: &mut TrackSet, frame: usize, cumulative: na::Vector2<f32>) {
    for (_, frames) in tracks.classes_mut() {
        let Some(objects) = frames.get_mut(frame) else {
            continue;
        };

        for track in objects.values_mut() {
            track.position_adjusted = track.position.map(|p| p - cumulative);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::frame::MemoryFrames;
    use crate::tracks::TrackFrame;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    fn textured(w: u32, h: u32, shift: (f32, f32)) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let (x, y) = (x as f32 - shift.0, y as f32 - shift.1);
            let v = 128.0
                + 60.0 * (x * 0.35).sin() * (y * 0.27).cos()
                + 40.0 * ((x + 2.0 * y) * 0.13).sin();
            let v = v.clamp(0.0, 255.0) as u8;
            Rgb([v, v, v])
        })
    }

    fn config(width: u32) -> CameraConfig {
        CameraConfig {
            feature_columns: vec![(0, width)],
            pyramid_levels: 1,
            ..CameraConfig::default()
        }
    }

    /// Left of `split` the scene is static; right of it everything moved by `shift`.
    fn split_scene(w: u32, h: u32, split: u32, shift: (f32, f32)) -> RgbImage {
        let still = textured(w, h, (0.0, 0.0));
        let moved = textured(w, h, shift);

        RgbImage::from_fn(w, h, |x, y| {
            if x < split {
                *still.get_pixel(x, y)
            } else {
                *moved.get_pixel(x, y)
            }
        })
    }

    #[test]
    fn recovers_a_pure_translation() {
        let mut est = CameraMovementEstimator::new(config(160));
        assert_eq!(est.push(&textured(160, 120, (0.0, 0.0))).unwrap(), na::Vector2::zeros());

        let m = est.push(&textured(160, 120, (3.0, -2.0))).unwrap();
        assert_abs_diff_eq!(m.x, 3.0, epsilon = 0.3);
        assert_abs_diff_eq!(m.y, -2.0, epsilon = 0.3);
    }

    #[test]
    fn only_background_columns_are_measured() {
        let first = split_scene(160, 120, 60, (0.0, 0.0));
        let second = split_scene(160, 120, 60, (4.0, 0.0));

        let mut still = CameraMovementEstimator::new(CameraConfig {
            feature_columns: vec![(0, 50)],
            ..config(160)
        });
        still.push(&first).unwrap();
        assert_eq!(still.push(&second).unwrap(), na::Vector2::zeros());

        let mut moving = CameraMovementEstimator::new(CameraConfig {
            feature_columns: vec![(80, 160)],
            ..config(160)
        });
        moving.push(&first).unwrap();
        let m = moving.push(&second).unwrap();
        assert_abs_diff_eq!(m.x, 4.0, epsilon = 0.3);
        assert_abs_diff_eq!(m.y, 0.0, epsilon = 0.3);
    }

    #[test]
    fn still_camera_reports_zero() {
        let frame = textured(120, 90, (0.0, 0.0));
        let mut est = CameraMovementEstimator::new(config(120));

        assert_eq!(est.push(&frame).unwrap(), na::Vector2::zeros());
        assert_eq!(est.push(&frame).unwrap(), na::Vector2::zeros());
    }

    #[test]
    fn flat_frames_have_no_features() {
        let flat = RgbImage::from_pixel(64, 64, Rgb([30, 120, 30]));
        let mut est = CameraMovementEstimator::new(config(64));

        est.push(&flat).unwrap();
        assert_eq!(est.push(&flat).unwrap(), na::Vector2::zeros());
    }

    #[test]
    fn resized_frame_restarts_measurement() {
        let mut est = CameraMovementEstimator::new(config(160));
        est.push(&textured(160, 120, (0.0, 0.0))).unwrap();

        assert_eq!(est.push(&textured(120, 90, (3.0, 0.0))).unwrap(), na::Vector2::zeros());
    }

    #[test]
    fn dominant_flow_ignores_outliers() {
        let mut flows = vec![na::Vector2::new(2.1, 0.0); 6];
        flows.push(na::Vector2::new(1.9, 0.1));
        flows.push(na::Vector2::new(-15.0, 4.0));

        let m = dominant_flow(&flows, 1.0).unwrap();
        assert_abs_diff_eq!(m.x, (2.1 * 6.0 + 1.9) / 7.0, epsilon = 1e-5);
        assert!(dominant_flow(&[], 1.0).is_none());
    }

    #[test]
    fn adjusted_is_raw_minus_cumulative() {
        let movement = CameraMovement::new(vec![[0.0, 0.0], [2.0, 1.0], [3.0, -1.0]]);
        let cumulative = movement.cumulative();
        assert_eq!(cumulative[2], na::Vector2::new(5.0, 0.0));

        let mut tracks = TrackSet::with_frames(3);
        for f in 0..3 {
            let mut t = TrackFrame::new(BBox::ltrb(0.0, 0.0, 10.0, 10.0));
            t.position = Some(na::Point2::new(100.0, 50.0));
            tracks.players[f].insert(4, t);
        }

        for (f, c) in cumulative.iter().enumerate() {
            adjust_frame_tracks(&mut tracks, f, *c);
        }

        for (f, c) in cumulative.iter().enumerate() {
            let t = &tracks.players[f][&4];
            assert_eq!(t.position_adjusted.unwrap(), t.position.unwrap() - c);
        }
    }

    #[test]
    fn movement_stub_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.stub");
        let src = MemoryFrames::new(
            vec![textured(96, 96, (0.0, 0.0)), textured(96, 96, (2.0, 0.0))],
            25.0,
        );

        let mut est = CameraMovementEstimator::new(config(96));
        let first = est.get_camera_movement(&src, 2, false, Some(&path)).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get(0), Some(na::Vector2::zeros()));

        let empty = MemoryFrames::new(Vec::new(), 25.0);
        let mut cached = CameraMovementEstimator::new(config(96));
        assert_eq!(cached.get_camera_movement(&empty, 2, true, Some(&path)).unwrap(), first);
    }

    #[test]
    fn stub_for_another_clip_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.stub");
        stub::write(&path, &CameraMovement::new(vec![[9.0, 9.0]; 5])).unwrap();

        let frame = textured(96, 96, (0.0, 0.0));
        let src = MemoryFrames::new(vec![frame.clone(), frame.clone(), frame], 25.0);

        let mut est = CameraMovementEstimator::new(config(96));
        let movement = est.get_camera_movement(&src, 3, true, Some(&path)).unwrap();
        assert_eq!(movement, CameraMovement::new(vec![[0.0, 0.0]; 3]));

        // the stale stub was replaced
        assert_eq!(stub::read::<CameraMovement, _>(&path), Some(movement));
    }
}
