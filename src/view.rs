//! Pixel to pitch plane mapping through a fixed homography.

use nalgebra::{self as na, DMatrix, Matrix3, Vector3};
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::math;
use crate::tracks::TrackSet;

const PITCH_WIDTH: f32 = 68.0;
const PITCH_LENGTH: f32 = 23.32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Calibration landmarks in frame pixels; also bounds the mapped region.
    pub pixel_vertices: Vec<[f32; 2]>,
    /// The same landmarks on the pitch, in meters.
    pub target_vertices: Vec<[f32; 2]>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            pixel_vertices: vec![
                [110.0, 1035.0],
                [265.0, 275.0],
                [910.0, 260.0],
                [1640.0, 915.0],
            ],
            target_vertices: vec![
                [0.0, PITCH_WIDTH],
                [0.0, 0.0],
                [PITCH_LENGTH, 0.0],
                [PITCH_LENGTH, PITCH_WIDTH],
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewTransformer {
    homography: Matrix3<f64>,
    region: Vec<na::Point2<f32>>,
}

impl ViewTransformer {
    pub fn new(config: &ViewConfig) -> Result<Self, Error> {
        let src: Vec<[f64; 2]> = config
            .pixel_vertices
            .iter()
            .map(|p| [p[0] as f64, p[1] as f64])
            .collect();
        let dst: Vec<[f64; 2]> = config
            .target_vertices
            .iter()
            .map(|p| [p[0] as f64, p[1] as f64])
            .collect();

        let homography = estimate_homography(&src, &dst)?;
        debug!(?homography, "view transform calibrated");

        Ok(Self {
            homography,
            region: config
                .pixel_vertices
                .iter()
                .map(|p| na::Point2::new(p[0], p[1]))
                .collect(),
        })
    }

    /// Pitch coordinates of a compensated pixel point, `None` off the calibrated region.
    pub fn transform_point(&self, p: na::Point2<f32>) -> Option<na::Point2<f32>> {
        if !math::in_polygon(p, &self.region) {
            return None;
        }

        let [x, y] = project(&self.homography, p.x as f64, p.y as f64)?;
        Some(na::Point2::new(x as f32, y as f32))
    }

    /// Reads `position_adjusted`, writes `position_transformed` for every track.
    pub fn add_transformed_positions(&self, tracks: &mut TrackSet) {
        for (_, frames) in tracks.classes_mut() {
            for track in frames.iter_mut().flat_map(|f| f.values_mut()) {
                track.position_transformed =
                    track.position_adjusted.and_then(|p| self.transform_point(p));
            }
        }
    }
}

/// H * [x, y, 1]^T, dehomogenized; `None` at the line at infinity.
fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }

    Some([p[0] / p[2], p[1] / p[2]])
}

/// Translates the centroid to the origin and scales mean distance to sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    (t, normalized)
}

/// Direct linear transform from four or more correspondences.
pub fn estimate_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, Error> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return Err(Error::Homography(format!(
            "need at least 4 matching point pairs, got {} and {}",
            n,
            dst.len()
        )));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // h spans the eigenvector of the smallest eigenvalue of A^T A
    let ata = a.transpose() * &a;
    let eig = na::SymmetricEigen::new(ata);

    let min_idx = (0..9)
        .min_by(|&i, &j| eig.eigenvalues[i].abs().total_cmp(&eig.eigenvalues[j].abs()))
        .unwrap_or(0);
    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| Error::Homography("degenerate landmarks".to_string()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return Err(Error::Homography("degenerate landmarks".to_string()));
    }

    Ok(h / scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::tracks::TrackFrame;
    use approx::assert_abs_diff_eq;

    #[test]
    fn affine_square_maps_to_meters() {
        let config = ViewConfig {
            pixel_vertices: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            target_vertices: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        };
        let view = ViewTransformer::new(&config).unwrap();

        let p = view.transform_point(na::Point2::new(50.0, 25.0)).unwrap();
        assert_abs_diff_eq!(p.x, 5.0, epsilon = 1e-4);
        assert_abs_diff_eq!(p.y, 2.5, epsilon = 1e-4);
        assert!(view.transform_point(na::Point2::new(150.0, 25.0)).is_none());
    }

    #[test]
    fn default_landmarks_hit_their_targets() {
        let config = ViewConfig::default();
        let h = estimate_homography(
            &config.pixel_vertices.iter().map(|p| [p[0] as f64, p[1] as f64]).collect::<Vec<_>>(),
            &config.target_vertices.iter().map(|p| [p[0] as f64, p[1] as f64]).collect::<Vec<_>>(),
        )
        .unwrap();

        for (src, dst) in config.pixel_vertices.iter().zip(&config.target_vertices) {
            let [x, y] = project(&h, src[0] as f64, src[1] as f64).unwrap();
            assert_abs_diff_eq!(x, dst[0] as f64, epsilon = 1e-6);
            assert_abs_diff_eq!(y, dst[1] as f64, epsilon = 1e-6);
        }
    }

    #[test]
    fn too_few_landmarks() {
        let config = ViewConfig {
            pixel_vertices: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            target_vertices: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
        };
        assert!(matches!(ViewTransformer::new(&config), Err(Error::Homography(_))));
    }

    #[test]
    fn off_pitch_positions_stay_empty() {
        let view = ViewTransformer::new(&ViewConfig::default()).unwrap();
        let mut tracks = TrackSet::with_frames(1);

        let mut on = TrackFrame::new(BBox::ltrb(0.0, 0.0, 1.0, 1.0));
        on.position_adjusted = Some(na::Point2::new(800.0, 600.0));
        let mut off = on.clone();
        off.position_adjusted = Some(na::Point2::new(5.0, 5.0));
        let missing = TrackFrame::new(BBox::ltrb(0.0, 0.0, 1.0, 1.0));

        tracks.players[0].insert(1, on);
        tracks.players[0].insert(2, off);
        tracks.players[0].insert(3, missing);
        view.add_transformed_positions(&mut tracks);

        let p = tracks.players[0][&1].position_transformed.unwrap();
        assert!(p.x > 0.0 && p.x < PITCH_LENGTH && p.y > 0.0 && p.y < PITCH_WIDTH);
        assert!(tracks.players[0][&2].position_transformed.is_none());
        assert!(tracks.players[0][&3].position_transformed.is_none());
    }
}
