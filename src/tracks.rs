//! The per-class, per-frame, per-identity track table threaded through the pipeline.
//!
//! Stage contracts:
//! - tracker writes `bbox` and `position`
//! - camera writes `position_adjusted`
//! - view writes `position_transformed`
//! - team writes `team` and `team_color`
//! - possession writes `has_ball`
//! - kinematics writes `speed` and `distance`
//!
//! No stage removes entries; an identity missing from a frame simply has no
//! entry in that frame's map.

use std::collections::BTreeMap;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::detection::ObjectClass;

/// The ball always lives under this identity.
pub const BALL_ID: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "u8", try_from = "u8")]
pub enum Team {
    One = 1,
    Two = 2,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::One, Team::Two];

    /// Zero-based slot, matching the clustering centroid order.
    #[inline]
    pub fn index(self) -> usize {
        self as usize - 1
    }

    #[inline]
    pub fn from_index(idx: usize) -> Self {
        if idx == 0 {
            Team::One
        } else {
            Team::Two
        }
    }
}

impl From<Team> for u8 {
    fn from(team: Team) -> u8 {
        team as u8
    }
}

impl TryFrom<u8> for Team {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Team::One),
            2 => Ok(Team::Two),
            other => Err(format!("unknown team {}", other)),
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Team {}", *self as u8)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackFrame {
    pub bbox: BBox<Ltrb>,
    /// Foot point for people, center for the ball, in frame pixels.
    pub position: Option<na::Point2<f32>>,
    pub position_adjusted: Option<na::Point2<f32>>,
    /// Pitch coordinates in meters.
    pub position_transformed: Option<na::Point2<f32>>,
    pub team: Option<Team>,
    pub team_color: Option<[u8; 3]>,
    pub has_ball: bool,
    /// Meters per second.
    pub speed: Option<f32>,
    /// Meters covered since the start of the clip.
    pub distance: Option<f32>,
}

impl TrackFrame {
    pub fn new(bbox: BBox<Ltrb>) -> Self {
        Self {
            bbox,
            position: None,
            position_adjusted: None,
            position_transformed: None,
            team: None,
            team_color: None,
            has_ball: false,
            speed: None,
            distance: None,
        }
    }
}

pub type FrameTracks = BTreeMap<u32, TrackFrame>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrackSet {
    pub players: Vec<FrameTracks>,
    pub referees: Vec<FrameTracks>,
    pub ball: Vec<FrameTracks>,
}

impl TrackSet {
    pub fn with_frames(count: usize) -> Self {
        Self {
            players: vec![FrameTracks::new(); count],
            referees: vec![FrameTracks::new(); count],
            ball: vec![FrameTracks::new(); count],
        }
    }

    /// Number of frames covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn class(&self, class: ObjectClass) -> &[FrameTracks] {
        match class.folded() {
            ObjectClass::Ball => &self.ball,
            ObjectClass::Referee => &self.referees,
            _ => &self.players,
        }
    }

    pub fn class_mut(&mut self, class: ObjectClass) -> &mut Vec<FrameTracks> {
        match class.folded() {
            ObjectClass::Ball => &mut self.ball,
            ObjectClass::Referee => &mut self.referees,
            _ => &mut self.players,
        }
    }

    pub fn classes_mut(&mut self) -> [(ObjectClass, &mut Vec<FrameTracks>); 3] {
        [
            (ObjectClass::Player, &mut self.players),
            (ObjectClass::Referee, &mut self.referees),
            (ObjectClass::Ball, &mut self.ball),
        ]
    }

    pub fn ball_bbox(&self, frame: usize) -> Option<BBox<Ltrb>> {
        self.ball.get(frame)?.get(&BALL_ID).map(|t| t.bbox)
    }
}
