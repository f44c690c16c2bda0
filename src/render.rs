//! Frame annotation: identity markers, ball indicators and possession statistics.
//!
//! Everything is drawn with OpenCV on an RGB-ordered copy of the frame, so
//! colors below are `[r, g, b]`.

use image::RgbImage;
use nalgebra as na;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::cv;
use crate::error::Error;
use crate::kinematics::MPS_TO_KMH;
use crate::possession::PossessionTimeline;
use crate::tracks::{Team, TrackSet, BALL_ID};

const BLACK: [u8; 3] = [0, 0, 0];
const WHITE: [u8; 3] = [255, 255, 255];

const TAG_WIDTH: i32 = 40;
const TAG_HEIGHT: i32 = 20;
const STATS_WIDTH: i32 = 550;
const STATS_HEIGHT: i32 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Multiplier applied to every label size.
    pub text_scale: f32,
    /// Players whose team is still unknown.
    pub player_color: [u8; 3],
    pub referee_color: [u8; 3],
    pub ball_color: [u8; 3],
    pub possession_color: [u8; 3],
    pub overlay_alpha: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            text_scale: 1.0,
            player_color: [255, 0, 0],
            referee_color: [255, 255, 0],
            ball_color: [0, 255, 0],
            possession_color: [255, 0, 0],
            overlay_alpha: 0.4,
        }
    }
}

#[inline]
fn scalar(c: [u8; 3]) -> Scalar {
    Scalar::new(c[0] as f64, c[1] as f64, c[2] as f64, 0.0)
}

pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Draws every overlay of frame `frame_num` onto `image`.
    pub fn draw_annotations(
        &self,
        image: &mut RgbImage,
        frame_num: usize,
        tracks: &TrackSet,
        possession: &PossessionTimeline,
        camera_movement: Option<na::Vector2<f32>>,
    ) -> Result<(), Error> {
        let mut frame = cv::rgb_mat(image)?;
        self.draw_frame(&mut frame, frame_num, tracks, possession, camera_movement)?;

        cv::copy_into(&frame, image)
    }

    /// Same as [`Renderer::draw_annotations`] on an RGB-ordered matrix.
    pub fn draw_frame(
        &self,
        frame: &mut Mat,
        frame_num: usize,
        tracks: &TrackSet,
        possession: &PossessionTimeline,
        camera_movement: Option<na::Vector2<f32>>,
    ) -> Result<(), Error> {
        if let Some(players) = tracks.players.get(frame_num) {
            for (&id, player) in players {
                let color = player.team_color.unwrap_or(self.config.player_color);
                self.draw_ellipse(frame, &player.bbox, color, Some(id))?;

                if player.has_ball {
                    self.draw_triangle(frame, &player.bbox, self.config.possession_color)?;
                }

                self.draw_speed_and_distance(frame, &player.bbox, player.speed, player.distance)?;
            }
        }

        if let Some(referees) = tracks.referees.get(frame_num) {
            for referee in referees.values() {
                self.draw_ellipse(frame, &referee.bbox, self.config.referee_color, None)?;
            }
        }

        if let Some(ball) = tracks.ball.get(frame_num).and_then(|f| f.get(&BALL_ID)) {
            self.draw_triangle(frame, &ball.bbox, self.config.ball_color)?;
        }

        self.draw_team_ball_control(frame, frame_num, possession)?;

        if let Some(movement) = camera_movement {
            self.draw_camera_movement(frame, movement)?;
        }

        Ok(())
    }

    /// Arc under the feet, open at the top, with an optional id tag below it.
    fn draw_ellipse(&self, frame: &mut Mat, bbox: &BBox<Ltrb>, color: [u8; 3], id: Option<u32>) -> Result<(), Error> {
        let foot = bbox.foot();
        let width = bbox.width();
        let center = Point::new(foot.x as i32, foot.y as i32);

        imgproc::ellipse(
            frame,
            center,
            Size::new(width as i32, (0.35 * width) as i32),
            0.0,
            -45.0,
            235.0,
            scalar(color),
            2,
            imgproc::LINE_4,
            0,
        )?;

        let Some(id) = id else {
            return Ok(());
        };

        let tag = Rect::new(center.x - TAG_WIDTH / 2, center.y + 5, TAG_WIDTH, TAG_HEIGHT);
        imgproc::rectangle(frame, tag, scalar(color), imgproc::FILLED, imgproc::LINE_8, 0)?;

        let text_x = if id > 99 { tag.x + 2 } else { tag.x + 12 };
        self.put_text(frame, &id.to_string(), Point::new(text_x, tag.y + 15), 0.6, 2)
    }

    /// Filled downward triangle pointing at the top of `bbox`.
    fn draw_triangle(&self, frame: &mut Mat, bbox: &BBox<Ltrb>, color: [u8; 3]) -> Result<(), Error> {
        let x = ((bbox.left() + bbox.right()) * 0.5) as i32;
        let y = bbox.top() as i32;

        let mut outline = Vector::<Vector<Point>>::new();
        outline.push(Vector::from_iter([
            Point::new(x, y),
            Point::new(x - 10, y - 20),
            Point::new(x + 10, y - 20),
        ]));

        imgproc::fill_poly(frame, &outline, scalar(color), imgproc::LINE_8, 0, Point::default())?;
        imgproc::polylines(frame, &outline, true, scalar(BLACK), 2, imgproc::LINE_8, 0)?;

        Ok(())
    }

    fn draw_speed_and_distance(
        &self,
        frame: &mut Mat,
        bbox: &BBox<Ltrb>,
        speed: Option<f32>,
        distance: Option<f32>,
    ) -> Result<(), Error> {
        let (Some(speed), Some(distance)) = (speed, distance) else {
            return Ok(());
        };

        let foot = bbox.foot();
        let at = Point::new(foot.x as i32, foot.y as i32 + 40);
        self.put_text(frame, &format!("{:.2} km/h", speed * MPS_TO_KMH), at, 0.5, 2)?;
        self.put_text(frame, &format!("{:.2} m", distance), Point::new(at.x, at.y + 20), 0.5, 2)
    }

    /// Running ball-control shares in a translucent box at the bottom right.
    fn draw_team_ball_control(
        &self,
        frame: &mut Mat,
        frame_num: usize,
        possession: &PossessionTimeline,
    ) -> Result<(), Error> {
        let x = (frame.cols() - STATS_WIDTH - 20).max(0);
        let y = (frame.rows() - STATS_HEIGHT - 110).max(0);
        let panel = Rect::new(x, y, STATS_WIDTH, STATS_HEIGHT);
        blend_rect(frame, panel, WHITE, self.config.overlay_alpha)?;

        let shares = possession.share_until(frame_num).unwrap_or([0.0, 0.0]);
        for (team, share) in Team::ALL.iter().zip(shares) {
            let line_y = y + 50 + 50 * team.index() as i32;
            let text = format!("{} Ball Control: {:.2}%", team, share * 100.0);
            self.put_text(frame, &text, Point::new(x + 50, line_y), 1.0, 3)?;
        }

        // split bar along the bottom edge of the box
        let bar_y = y + STATS_HEIGHT - 12;
        let bar_w = STATS_WIDTH - 100;
        let split = (bar_w as f32 * shares[0]).round() as i32;
        if split > 0 {
            let done = Rect::new(x + 50, bar_y, split, 6);
            imgproc::rectangle(frame, done, scalar(BLACK), imgproc::FILLED, imgproc::LINE_8, 0)?;
        }
        if split < bar_w {
            let rest = Rect::new(x + 50 + split, bar_y, bar_w - split, 6);
            imgproc::rectangle(frame, rest, scalar(WHITE), imgproc::FILLED, imgproc::LINE_8, 0)?;
        }

        Ok(())
    }

    fn draw_camera_movement(&self, frame: &mut Mat, movement: na::Vector2<f32>) -> Result<(), Error> {
        blend_rect(frame, Rect::new(0, 0, 500, 100), WHITE, 0.6)?;
        self.put_text(frame, &format!("Camera Movement X: {:.2}", movement.x), Point::new(10, 30), 1.0, 3)?;
        self.put_text(frame, &format!("Camera Movement Y: {:.2}", movement.y), Point::new(10, 70), 1.0, 3)
    }

    fn put_text(&self, frame: &mut Mat, text: &str, org: Point, scale: f64, thickness: i32) -> Result<(), Error> {
        imgproc::put_text(
            frame,
            text,
            org,
            imgproc::FONT_HERSHEY_SIMPLEX,
            scale * self.config.text_scale as f64,
            scalar(BLACK),
            thickness,
            imgproc::LINE_AA,
            false,
        )?;

        Ok(())
    }
}

/// Mixes `color` into `rect` with weight `alpha`; the rest of the frame is left as is.
fn blend_rect(frame: &mut Mat, rect: Rect, color: [u8; 3], alpha: f32) -> Result<(), Error> {
    let alpha = alpha.clamp(0.0, 1.0) as f64;

    let mut overlay = frame.try_clone()?;
    imgproc::rectangle(&mut overlay, rect, scalar(color), imgproc::FILLED, imgproc::LINE_8, 0)?;

    let mut blended = Mat::default();
    core::add_weighted(&overlay, alpha, &*frame, 1.0 - alpha, 0.0, &mut blended, -1)?;
    blended.copy_to(frame)?;

    Ok(())
}
