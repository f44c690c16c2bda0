use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Xywh};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Ball,
    Goalkeeper,
    Player,
    Referee,
}

impl ObjectClass {
    /// Class order of the football detection model: ball, goalkeeper, player, referee.
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(ObjectClass::Ball),
            1 => Some(ObjectClass::Goalkeeper),
            2 => Some(ObjectClass::Player),
            3 => Some(ObjectClass::Referee),
            _ => None,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "ball" | "sports ball" => Some(ObjectClass::Ball),
            "goalkeeper" => Some(ObjectClass::Goalkeeper),
            "player" | "person" => Some(ObjectClass::Player),
            "referee" => Some(ObjectClass::Referee),
            _ => None,
        }
    }

    /// Goalkeepers are tracked together with outfield players.
    #[inline]
    pub fn folded(self) -> Self {
        match self {
            ObjectClass::Goalkeeper => ObjectClass::Player,
            other => other,
        }
    }
}

/// Contains (x,y) of the center and (width,height) of bbox
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: ObjectClass,
}

impl Detection {
    pub fn from_ltrb(bbox: BBox<Ltrb>, confidence: f32, class: ObjectClass) -> Self {
        let xywh = bbox.as_xywh();

        Self {
            x: xywh.cx(),
            y: xywh.cy(),
            w: xywh.width(),
            h: xywh.height(),
            confidence,
            class,
        }
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.ltrb().iou(&other.ltrb())
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Xywh> {
        BBox::xywh(self.x, self.y, self.w, self.h)
    }

    #[inline(always)]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox().as_ltrb()
    }
}
