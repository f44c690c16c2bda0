//! Ball possession by proximity, carried forward over ambiguous frames.

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::bbox::{BBox, Ltrb};
use crate::tracks::{FrameTracks, Team};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PossessionConfig {
    /// Farthest the ball center may be from a player's box, in pixels.
    pub max_player_ball_distance: f32,
}

impl Default for PossessionConfig {
    fn default() -> Self {
        Self {
            max_player_ball_distance: 70.0,
        }
    }
}

pub struct PlayerBallAssigner {
    config: PossessionConfig,
}

impl PlayerBallAssigner {
    pub fn new(config: PossessionConfig) -> Self {
        Self { config }
    }

    /// The player closest to the ball, measured to the nearest point of each
    /// box; `None` when nobody is within range.
    pub fn assign_ball_to_player(&self, players: &FrameTracks, ball: &BBox<Ltrb>) -> Option<u32> {
        let ball = ball.center();

        players
            .iter()
            .map(|(&id, p)| (id, p.bbox.distance_to(ball)))
            .filter(|&(_, d)| d <= self.config.max_player_ball_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Flags the possessing player of one frame and returns its team.
    ///
    /// `None` means no decision this frame, not "no team".
    pub fn observe_frame(&self, players: &mut FrameTracks, ball: Option<&BBox<Ltrb>>) -> Option<Team> {
        let id = self.assign_ball_to_player(players, ball?)?;
        let player = players.get_mut(&id)?;
        player.has_ball = true;

        debug!(player = id, team = ?player.team, "ball assigned");
        player.team
    }
}

/// Team in control of the ball for every frame; `None` until the first decision.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct PossessionTimeline(Vec<Option<Team>>);

impl PossessionTimeline {
    /// Scans per-frame observations, seeded with no team, keeping the
    /// current observation when present and the previous entry otherwise.
    pub fn from_observations<I: IntoIterator<Item = Option<Team>>>(observations: I) -> Self {
        let mut timeline = Self::default();
        for obs in observations {
            timeline.push_observation(obs);
        }

        timeline
    }

    /// Appends one frame, carrying the previous entry forward on a miss.
    pub fn push_observation(&mut self, observation: Option<Team>) -> Option<Team> {
        let entry = observation.or_else(|| self.0.last().copied().flatten());
        self.0.push(entry);
        entry
    }

    #[inline]
    pub fn get(&self, frame: usize) -> Option<Team> {
        self.0.get(frame).copied().flatten()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Team>> + '_ {
        self.0.iter().copied()
    }

    /// Ball control share of each team over frames `0..=frame`, sentinel
    /// frames excluded; `None` while nobody has had the ball.
    pub fn share_until(&self, frame: usize) -> Option<[f32; 2]> {
        let end = (frame + 1).min(self.0.len());
        let mut counts = [0usize; 2];

        for team in self.0[..end].iter().flatten() {
            counts[team.index()] += 1;
        }

        let total = counts[0] + counts[1];
        if total == 0 {
            return None;
        }

        Some([counts[0] as f32 / total as f32, counts[1] as f32 / total as f32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::TrackFrame;
    use approx::assert_relative_eq;

    fn player(team: Team, l: f32) -> TrackFrame {
        let mut p = TrackFrame::new(BBox::ltrb(l, 100.0, l + 20.0, 160.0));
        p.team = Some(team);
        p
    }

    fn ball_at(x: f32, y: f32) -> BBox<Ltrb> {
        BBox::ltrb(x - 2.0, y - 2.0, x + 2.0, y + 2.0)
    }

    #[test]
    fn nearest_box_edge_wins() {
        let mut players = FrameTracks::new();
        players.insert(4, player(Team::One, 100.0));
        players.insert(9, player(Team::Two, 200.0));
        let assigner = PlayerBallAssigner::new(PossessionConfig::default());

        // inside the box of player 4
        assert_eq!(assigner.assign_ball_to_player(&players, &ball_at(110.0, 150.0)), Some(4));
        // closer to the left edge of player 9
        assert_eq!(assigner.assign_ball_to_player(&players, &ball_at(180.0, 150.0)), Some(9));
        // nobody within range
        assert_eq!(assigner.assign_ball_to_player(&players, &ball_at(600.0, 600.0)), None);
    }

    #[test]
    fn observe_flags_the_holder() {
        let mut players = FrameTracks::new();
        players.insert(4, player(Team::Two, 100.0));
        let assigner = PlayerBallAssigner::new(PossessionConfig::default());

        assert_eq!(assigner.observe_frame(&mut players, Some(&ball_at(105.0, 150.0))), Some(Team::Two));
        assert!(players[&4].has_ball);
        assert_eq!(assigner.observe_frame(&mut players, None), None);
    }

    #[test]
    fn carry_forward_with_sentinel_seed() {
        let timeline = PossessionTimeline::from_observations([
            None,
            Some(Team::One),
            None,
            Some(Team::Two),
            None,
            None,
        ]);

        assert_eq!(
            timeline.iter().collect::<Vec<_>>(),
            vec![
                None,
                Some(Team::One),
                Some(Team::One),
                Some(Team::Two),
                Some(Team::Two),
                Some(Team::Two)
            ]
        );
    }

    #[test]
    fn all_misses_stay_sentinel() {
        let timeline = PossessionTimeline::from_observations(vec![None; 4]);

        assert_eq!(timeline.len(), 4);
        assert!(timeline.iter().all(|t| t.is_none()));
        assert_eq!(timeline.share_until(3), None);
    }

    #[test]
    fn shares_ignore_sentinel_frames() {
        let timeline = PossessionTimeline::from_observations([
            None,
            Some(Team::One),
            Some(Team::One),
            Some(Team::Two),
            None,
        ]);

        let [one, two] = timeline.share_until(2).unwrap();
        assert_relative_eq!(one, 1.0);
        assert_relative_eq!(two, 0.0);

        let [one, two] = timeline.share_until(100).unwrap();
        assert_relative_eq!(one, 0.5);
        assert_relative_eq!(two, 0.5);
    }
}
