//! Identity association; a participant only matches detections of its own class.
//!
//! Detections are matched to live participants in a cascade: confirmed
//! participants take high-confidence detections first, then whatever
//! low-confidence detections overlap what is left; tentative participants
//! compete for the remaining high-confidence detections, and anything still
//! unmatched is born as a new tentative participant.

use std::collections::VecDeque;

use munkres::{solve_assignment, WeightMatrix};
use serde_derive::{Deserialize, Serialize};
use tracing::warn;

use crate::bbox::{BBox, Ltrb};
use crate::detection::Detection;

const UNMATCHABLE: f32 = 100_000.0;
const MAX_ASSIGNMENT_SIZE: usize = 512;
const HISTORY_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Detections at or above this confidence may start tracks.
    pub high_confidence: f32,
    /// Detections below this confidence are discarded.
    pub low_confidence: f32,
    /// Minimum IoU between prediction and detection for a match.
    pub match_iou: f32,
    /// Consecutive hits before a tentative participant gets an id.
    pub confirm_hits: u32,
    /// Frames a confirmed participant may go unseen before it is dropped.
    pub max_missing_frames: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.5,
            low_confidence: 0.1,
            match_iou: 0.2,
            confirm_hits: 1,
            max_missing_frames: 30,
        }
    }
}

#[derive(Debug, Clone)]
enum IndexedSliceKind {
    All,
    Indexes(Vec<usize>),
}

pub struct IndexedSlice<'a, T> {
    pub slice: &'a [T],
    kind: IndexedSliceKind,
}

impl<'a, T> IndexedSlice<'a, T> {
    pub fn new(slice: &'a [T]) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::All,
        }
    }

    pub fn new_with_indexes(slice: &'a [T], idx: Vec<usize>) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::Indexes(idx),
        }
    }

    #[inline]
    pub fn get_index(&self, idx: usize) -> usize {
        match &self.kind {
            IndexedSliceKind::All => idx,
            IndexedSliceKind::Indexes(idxs) => idxs[idx],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.kind {
            IndexedSliceKind::All => self.slice.len(),
            IndexedSliceKind::Indexes(idxs) => idxs.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only the entries whose underlying index satisfies `f`.
    pub fn filter<F: Fn(usize) -> bool>(&self, f: F) -> Self {
        let idxs = (0..self.len())
            .map(|i| self.get_index(i))
            .filter(|&i| f(i))
            .collect();

        Self::new_with_indexes(self.slice, idxs)
    }
}

impl<'a, T> std::ops::Index<usize> for IndexedSlice<'a, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.slice[self.get_index(index)]
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    /// Zero while tentative.
    pub id: u32,
    pub hits: u32,
    pub last_frame: usize,
    pub detections: VecDeque<(usize, Detection)>,
    velocity: [f32; 4],
}

impl Participant {
    pub fn new(frame: usize, det: &Detection) -> Self {
        let mut detections = VecDeque::with_capacity(HISTORY_LEN);
        detections.push_front((frame, *det));

        Self {
            id: 0,
            hits: 1,
            last_frame: frame,
            detections,
            velocity: [0.0; 4],
        }
    }

    #[inline]
    pub fn last_detection(&self) -> &Detection {
        &self.detections[0].1
    }

    /// Constant-velocity extrapolation of the last box to `frame`.
    pub fn predict(&self, frame: usize) -> BBox<Ltrb> {
        let last = self.last_detection().ltrb();
        let dt = frame.saturating_sub(self.last_frame) as f32;
        let b = last.as_slice();

        BBox::ltrb(
            b[0] + self.velocity[0] * dt,
            b[1] + self.velocity[1] * dt,
            b[2] + self.velocity[2] * dt,
            b[3] + self.velocity[3] * dt,
        )
    }

    pub fn update(&mut self, frame: usize, det: &Detection) {
        let prev = self.last_detection().ltrb();
        let next = det.ltrb();
        let dt = frame.saturating_sub(self.last_frame).max(1) as f32;

        for k in 0..4 {
            let v = (next.as_slice()[k] - prev.as_slice()[k]) / dt;
            self.velocity[k] = self.velocity[k] * 0.5 + v * 0.5;
        }

        if self.detections.len() == HISTORY_LEN {
            self.detections.pop_back();
        }
        self.detections.push_front((frame, *det));

        self.hits += 1;
        self.last_frame = frame;
    }
}

/// An identity never moves between object classes.
#[inline]
fn same_class(participant: &Participant, det: &Detection) -> bool {
    participant.last_detection().class.folded() == det.class.folded()
}

pub struct Scene {
    config: SceneConfig,
    pub participants: Vec<Participant>,
    next_id: u32,
}

impl Scene {
    pub fn new(config: SceneConfig) -> Self {
        Self::with_first_id(config, 1)
    }

    /// Ids are handed out sequentially starting at `first_id`.
    pub fn with_first_id(config: SceneConfig, first_id: u32) -> Self {
        Self {
            config,
            participants: Vec::with_capacity(64),
            next_id: first_id,
        }
    }

    fn assignment<'a>(
        &self,
        frame: usize,
        dets: IndexedSlice<'a, Detection>,
        objs: IndexedSlice<'_, Participant>,
    ) -> (Vec<(usize, usize)>, IndexedSlice<'a, Detection>) {
        let mut missed: Vec<_> = (0..dets.len()).collect();

        let mut assignments = Vec::new();

        if !objs.is_empty() && !dets.is_empty() {
            let n = dets.len().max(objs.len());

            if n > MAX_ASSIGNMENT_SIZE {
                warn!(n, "confusion matrix is too big, skipping association");
            } else {
                let costs: Vec<f32> = (0..n * n)
                    .map(|i| {
                        let (r, c) = (i / n, i % n);
                        if r < objs.len() && c < dets.len() && same_class(&objs[r], &dets[c]) {
                            1.0 - objs[r].predict(frame).iou(&dets[c].ltrb())
                        } else {
                            UNMATCHABLE
                        }
                    })
                    .collect();

                let mut mat = WeightMatrix::from_row_vec(n, costs.clone());

                match solve_assignment(&mut mat) {
                    Ok(positions) => {
                        for pos in positions {
                            if pos.row < objs.len() && pos.column < dets.len() {
                                let iou = 1.0 - costs[pos.row * n + pos.column];

                                if iou > self.config.match_iou {
                                    assignments.push((pos.row, pos.column));
                                }
                            }
                        }
                    }
                    Err(err) => warn!(?err, "assignment could not be solved"),
                }

                missed.retain(|&x| !assignments.iter().any(|&(_, d)| d == x));
            }
        }

        missed.iter_mut().for_each(|x| *x = dets.get_index(*x));

        assignments.iter_mut().for_each(|(o, d)| {
            *o = objs.get_index(*o);
            *d = dets.get_index(*d);
        });

        (
            assignments,
            IndexedSlice::new_with_indexes(dets.slice, missed),
        )
    }

    /// Associates one frame of detections and returns the confirmed identities seen in it.
    pub fn update(&mut self, frame: usize, detections: &[Detection]) -> Vec<(u32, Detection)> {
        let (high, low) = (self.config.high_confidence, self.config.low_confidence);
        let all = IndexedSlice::new(detections);
        let high_dets = all.filter(|i| detections[i].confidence >= high);
        let low_dets = all.filter(|i| {
            let c = detections[i].confidence;
            c >= low && c < high
        });

        let participants = &self.participants;
        let all_objs = IndexedSlice::new(participants.as_slice());
        let confirmed = all_objs.filter(|i| participants[i].id > 0);
        let tentative = all_objs.filter(|i| participants[i].id == 0);

        let (first, high_missed) = self.assignment(frame, high_dets, confirmed);
        let leftover = all_objs.filter(|i| {
            participants[i].id > 0 && !first.iter().any(|&(o, _)| o == i)
        });
        let (second, _) = self.assignment(frame, low_dets, leftover);
        let (third, unmatched) = self.assignment(frame, high_missed, tentative);

        let newborn: Vec<Detection> = (0..unmatched.len()).map(|i| unmatched[i]).collect();
        let matched: Vec<(usize, usize)> = first.into_iter().chain(second).chain(third).collect();

        for &(o, d) in &matched {
            self.participants[o].update(frame, &detections[d]);
        }

        let max_missing = self.config.max_missing_frames;
        self.participants.retain(|p| {
            if p.id == 0 {
                p.last_frame == frame
            } else {
                frame - p.last_frame <= max_missing
            }
        });

        for det in &newborn {
            self.participants.push(Participant::new(frame, det));
        }

        for p in &mut self.participants {
            if p.id == 0 && p.hits >= self.config.confirm_hits {
                p.id = self.next_id;
                self.next_id += 1;
            }
        }

        self.participants
            .iter()
            .filter(|p| p.id > 0 && p.last_frame == frame)
            .map(|p| (p.id, *p.last_detection()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ObjectClass;

    fn det(x: f32, y: f32, confidence: f32) -> Detection {
        Detection {
            x,
            y,
            w: 20.0,
            h: 40.0,
            confidence,
            class: ObjectClass::Player,
        }
    }

    fn with_class(det: Detection, class: ObjectClass) -> Detection {
        Detection { class, ..det }
    }

    #[test]
    fn player_identity_does_not_continue_as_referee() {
        let mut scene = Scene::new(SceneConfig::default());
        let player = scene.update(0, &[det(100.0, 100.0, 0.9)]);
        let referee = scene.update(1, &[with_class(det(100.0, 100.0, 0.9), ObjectClass::Referee)]);

        assert_eq!(player.len(), 1);
        assert_eq!(referee.len(), 1);
        assert_ne!(referee[0].0, player[0].0);
        assert_eq!(referee[0].1.class, ObjectClass::Referee);

        // the player identity is still alive and resumes on a player detection
        let back = scene.update(2, &[det(100.0, 100.0, 0.9)]);
        assert_eq!(back[0].0, player[0].0);
    }

    #[test]
    fn goalkeeper_keeps_the_player_identity() {
        let mut scene = Scene::new(SceneConfig::default());
        let id = scene.update(0, &[det(100.0, 100.0, 0.9)])[0].0;
        let keeper = scene.update(1, &[with_class(det(101.0, 100.0, 0.9), ObjectClass::Goalkeeper)]);

        assert_eq!(keeper[0].0, id);
    }

    #[test]
    fn identities_follow_moving_objects() {
        let mut scene = Scene::new(SceneConfig::default());
        let mut ids = Vec::new();

        for f in 0..10 {
            let step = f as f32 * 3.0;
            let out = scene.update(f, &[det(100.0 + step, 100.0, 0.9), det(300.0 - step, 100.0, 0.9)]);
            let mut out: Vec<(u32, f32)> = out.iter().map(|(id, d)| (*id, d.x)).collect();
            out.sort_by(|a, b| a.1.total_cmp(&b.1));
            ids.push(out.iter().map(|(id, _)| *id).collect::<Vec<_>>());
        }

        assert_eq!(ids[0].len(), 2);
        assert!(ids.iter().all(|frame_ids| frame_ids == &ids[0]));
    }

    #[test]
    fn low_confidence_extends_but_never_starts_tracks() {
        let mut scene = Scene::new(SceneConfig::default());

        assert!(scene.update(0, &[det(50.0, 50.0, 0.3)]).is_empty());

        let first = scene.update(1, &[det(50.0, 50.0, 0.9)]);
        assert_eq!(first.len(), 1);

        let second = scene.update(2, &[det(51.0, 50.0, 0.3)]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, first[0].0);
    }

    #[test]
    fn tentative_tracks_wait_for_confirmation() {
        let config = SceneConfig {
            confirm_hits: 3,
            ..SceneConfig::default()
        };
        let mut scene = Scene::new(config);

        assert!(scene.update(0, &[det(10.0, 10.0, 0.9)]).is_empty());
        assert!(scene.update(1, &[det(11.0, 10.0, 0.9)]).is_empty());
        assert_eq!(scene.update(2, &[det(12.0, 10.0, 0.9)]).len(), 1);
    }

    #[test]
    fn lost_identity_is_recovered_within_missing_window() {
        let mut scene = Scene::new(SceneConfig::default());
        let id = scene.update(0, &[det(10.0, 10.0, 0.9)])[0].0;

        assert!(scene.update(1, &[]).is_empty());
        assert!(scene.update(2, &[]).is_empty());
        assert_eq!(scene.update(3, &[det(10.0, 10.0, 0.9)])[0].0, id);
    }

    #[test]
    fn expired_identity_gets_a_new_id() {
        let config = SceneConfig {
            max_missing_frames: 1,
            ..SceneConfig::default()
        };
        let mut scene = Scene::new(config);
        let id = scene.update(0, &[det(10.0, 10.0, 0.9)])[0].0;

        scene.update(1, &[]);
        scene.update(2, &[]);
        assert_ne!(scene.update(3, &[det(10.0, 10.0, 0.9)])[0].0, id);
    }
}
