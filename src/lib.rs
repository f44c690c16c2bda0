//! Football match video analytics.
//!
//! Raw per-frame detections go in; identity-stable tracks enriched with
//! camera-compensated and pitch positions, team labels, ball possession and
//! player kinematics come out, together with an annotated copy of the video.

pub mod bbox;
pub mod camera;
pub mod config;
pub mod cv;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod kinematics;
pub mod math;
pub mod pipeline;
pub mod possession;
pub mod render;
pub mod scene;
pub mod stub;
pub mod team;
pub mod tracker;
pub mod tracks;
pub mod video;
pub mod view;

pub use config::PipelineConfig;
pub use detection::{Detection, ObjectClass};
pub use detector::{Detect, DetectionLog};
pub use error::Error;
pub use frame::{Frame, FrameSink, FrameSource};
pub use pipeline::{AnalysisReport, Pipeline};
pub use possession::PossessionTimeline;
pub use tracks::{Team, TrackFrame, TrackSet};
