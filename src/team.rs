//! Jersey-color team inference.
//!
//! The color model is fit once from the players of the first frame that has
//! any, and never refit. Every identity is classified once, on its first
//! appearance, and keeps that label for the rest of the run.

use std::collections::BTreeMap;

use image::RgbImage;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bbox::{BBox, Ltrb};
use crate::tracks::{FrameTracks, Team};

type Color = na::Vector3<f32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Upper share of the box sampled for the jersey.
    pub crop_top_fraction: f32,
    pub kmeans_iterations: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            crop_top_fraction: 0.5,
            kmeans_iterations: 50,
        }
    }
}

/// Two-means clustering with a deterministic farthest-point seed.
///
/// Returns the centroids and the cluster of every point; `None` for no points.
pub fn kmeans2(points: &[Color], iterations: usize) -> Option<([Color; 2], Vec<usize>)> {
    let first = *points.first()?;
    let second = points
        .iter()
        .copied()
        .max_by(|a, b| (a - first).norm_squared().total_cmp(&(b - first).norm_squared()))
        .unwrap_or(first);

    let mut centroids = [first, second];
    let mut labels = vec![0usize; points.len()];

    for _ in 0..iterations.max(1) {
        let mut changed = false;
        for (label, p) in labels.iter_mut().zip(points) {
            let nearest = nearest_centroid(&centroids, p);
            if nearest != *label {
                *label = nearest;
                changed = true;
            }
        }

        let mut sums = [Color::zeros(); 2];
        let mut counts = [0usize; 2];
        for (&label, p) in labels.iter().zip(points) {
            sums[label] += p;
            counts[label] += 1;
        }
        for k in 0..2 {
            if counts[k] > 0 {
                centroids[k] = sums[k] / counts[k] as f32;
            }
        }

        if !changed {
            break;
        }
    }

    Some((centroids, labels))
}

#[inline]
fn nearest_centroid(centroids: &[Color; 2], p: &Color) -> usize {
    if (p - centroids[1]).norm_squared() < (p - centroids[0]).norm_squared() {
        1
    } else {
        0
    }
}

/// Dominant jersey color inside the top of `bbox` with the pitch colour removed.
///
/// The crop is split in two clusters; the cluster owning most of the crop
/// corners is taken as background.
pub fn player_color(frame: &RgbImage, bbox: &BBox<Ltrb>, config: &TeamConfig) -> Option<Color> {
    let (x, y, w, h) = bbox.clip(frame.width(), frame.height())?;
    let h = ((h as f32 * config.crop_top_fraction).round() as u32).clamp(1, h);

    let pixels: Vec<Color> = (y..y + h)
        .flat_map(|py| (x..x + w).map(move |px| (px, py)))
        .map(|(px, py)| {
            let p = frame.get_pixel(px, py);
            Color::new(p[0] as f32, p[1] as f32, p[2] as f32)
        })
        .collect();

    let (centroids, labels) = kmeans2(&pixels, config.kmeans_iterations)?;
    if w < 2 || h < 2 {
        return Some((centroids[0] + centroids[1]) * 0.5);
    }

    let corners = [0, w as usize - 1, (h as usize - 1) * w as usize, (h * w) as usize - 1];
    let background_votes = corners.iter().filter(|&&i| labels[i] == 1).count();
    let background = if background_votes > 2 { 1 } else { 0 };

    Some(centroids[1 - background])
}

/// Two jersey centroids, fixed once fit.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamColorModel {
    centroids: [Color; 2],
}

impl TeamColorModel {
    pub fn classify(&self, color: &Color) -> Team {
        Team::from_index(nearest_centroid(&self.centroids, color))
    }

    pub fn color(&self, team: Team) -> [u8; 3] {
        let c = self.centroids[team.index()];
        [
            c.x.round().clamp(0.0, 255.0) as u8,
            c.y.round().clamp(0.0, 255.0) as u8,
            c.z.round().clamp(0.0, 255.0) as u8,
        ]
    }
}

pub struct TeamAssigner {
    config: TeamConfig,
    model: Option<TeamColorModel>,
    player_team: BTreeMap<u32, Team>,
}

impl TeamAssigner {
    pub fn new(config: TeamConfig) -> Self {
        Self {
            config,
            model: None,
            player_team: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn model(&self) -> Option<&TeamColorModel> {
        self.model.as_ref()
    }

    /// Fits the color model from one frame's players; a no-op once fit.
    ///
    /// Returns whether a model is available afterwards.
    pub fn assign_team_color(&mut self, frame: &RgbImage, players: &FrameTracks) -> bool {
        if self.model.is_some() {
            return true;
        }

        let colors: Vec<Color> = players
            .values()
            .filter_map(|p| player_color(frame, &p.bbox, &self.config))
            .collect();

        let Some((centroids, _)) = kmeans2(&colors, self.config.kmeans_iterations) else {
            return false;
        };

        if colors.len() < 2 {
            warn!(players = colors.len(), "team colors fit from a single player");
        }

        let model = TeamColorModel { centroids };
        info!(
            team1 = ?model.color(Team::One),
            team2 = ?model.color(Team::Two),
            "team colors assigned"
        );
        self.model = Some(model);

        true
    }

    /// The memoized team of `player_id`, classifying it from `bbox` on first sight.
    pub fn get_player_team(
        &mut self,
        frame: &RgbImage,
        bbox: &BBox<Ltrb>,
        player_id: u32,
    ) -> Option<Team> {
        if let Some(team) = self.player_team.get(&player_id) {
            return Some(*team);
        }

        let model = self.model.as_ref()?;
        let color = player_color(frame, bbox, &self.config)?;
        let team = model.classify(&color);

        debug!(player_id, %team, "player classified");
        self.player_team.insert(player_id, team);

        Some(team)
    }

    /// Labels every player of `frame_tracks` with its team and team color.
    pub fn assign_frame(&mut self, frame: &RgbImage, frame_tracks: &mut FrameTracks) {
        for (&player_id, track) in frame_tracks.iter_mut() {
            let Some(team) = self.get_player_team(frame, &track.bbox, player_id) else {
                continue;
            };

            track.team = Some(team);
            track.team_color = self.model.as_ref().map(|m| m.color(team));
        }
    }

    pub fn decided(&self) -> &BTreeMap<u32, Team> {
        &self.player_team
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::TrackFrame;
    use image::Rgb;

    const GRASS: Rgb<u8> = Rgb([40, 140, 40]);
    const RED: Rgb<u8> = Rgb([200, 20, 20]);
    const BLUE: Rgb<u8> = Rgb([20, 20, 200]);

    /// Paints a shirt into the middle of a player box on a grass background.
    fn paint_player(img: &mut RgbImage, bbox: &BBox<Ltrb>, shirt: Rgb<u8>) {
        let (x, y, w, h) = bbox.clip(img.width(), img.height()).unwrap();
        for py in y + h / 8..y + h / 2 {
            for px in x + w / 4..x + 3 * w / 4 {
                img.put_pixel(px, py, shirt);
            }
        }
    }

    fn scene(shirts: &[(u32, BBox<Ltrb>, Rgb<u8>)]) -> (RgbImage, FrameTracks) {
        let mut img = RgbImage::from_pixel(200, 100, GRASS);
        let mut players = FrameTracks::new();
        for (id, bbox, shirt) in shirts {
            paint_player(&mut img, bbox, *shirt);
            players.insert(*id, TrackFrame::new(*bbox));
        }
        (img, players)
    }

    fn close(c: &Color, rgb: Rgb<u8>) -> bool {
        (c - Color::new(rgb[0] as f32, rgb[1] as f32, rgb[2] as f32)).norm() < 5.0
    }

    #[test]
    fn kmeans_splits_two_groups() {
        let pts = vec![
            Color::new(0.0, 0.0, 0.0),
            Color::new(1.0, 0.0, 0.0),
            Color::new(100.0, 100.0, 100.0),
            Color::new(101.0, 100.0, 100.0),
        ];
        let (c, labels) = kmeans2(&pts, 10).unwrap();

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert!((c[labels[0]] - Color::new(0.5, 0.0, 0.0)).norm() < 1e-4);
        assert!(kmeans2(&[], 10).is_none());
    }

    #[test]
    fn jersey_color_ignores_grass() {
        let bbox = BBox::ltrb(10.0, 10.0, 50.0, 90.0);
        let (img, _) = scene(&[(1, bbox, RED)]);

        let c = player_color(&img, &bbox, &TeamConfig::default()).unwrap();
        assert!(close(&c, RED), "got {:?}", c);
    }

    #[test]
    fn labels_are_decided_once() {
        let a = BBox::ltrb(10.0, 10.0, 50.0, 90.0);
        let b = BBox::ltrb(110.0, 10.0, 150.0, 90.0);
        let (img, players) = scene(&[(1, a, RED), (2, b, BLUE)]);

        let mut assigner = TeamAssigner::new(TeamConfig::default());
        assert!(assigner.assign_team_color(&img, &players));

        let t1 = assigner.get_player_team(&img, &a, 1).unwrap();
        let t2 = assigner.get_player_team(&img, &b, 2).unwrap();
        assert_ne!(t1, t2);

        // player 1 now wears blue, but keeps the first decision
        let (swapped, _) = scene(&[(1, a, BLUE)]);
        assert_eq!(assigner.get_player_team(&swapped, &a, 1), Some(t1));

        // a newcomer is classified on first appearance
        assert_eq!(assigner.get_player_team(&swapped, &a, 9), Some(t2));
        assert_eq!(assigner.decided().len(), 3);
    }

    #[test]
    fn frame_labels_carry_team_colors() {
        let a = BBox::ltrb(10.0, 10.0, 50.0, 90.0);
        let b = BBox::ltrb(110.0, 10.0, 150.0, 90.0);
        let (img, mut players) = scene(&[(1, a, RED), (2, b, BLUE)]);

        let mut assigner = TeamAssigner::new(TeamConfig::default());
        assigner.assign_team_color(&img, &players);
        assigner.assign_frame(&img, &mut players);

        let red = players[&1].team_color.unwrap();
        assert!(red[0] > 150 && red[2] < 60, "{:?}", red);
        assert!(players.values().all(|p| p.team.is_some()));
    }

    #[test]
    fn no_players_means_no_model() {
        let img = RgbImage::from_pixel(20, 20, GRASS);
        let mut assigner = TeamAssigner::new(TeamConfig::default());

        assert!(!assigner.assign_team_color(&img, &FrameTracks::new()));
        assert_eq!(assigner.get_player_team(&img, &BBox::ltrb(0.0, 0.0, 5.0, 5.0), 1), None);
    }
}
