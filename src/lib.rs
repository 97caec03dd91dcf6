//! Turns labelled per-frame detections into tracked identities, camera-compensated
//! motion classes, monocular distances and continuous spatial audio cues.

pub mod audio;
pub mod camera_motion;
pub mod config;
pub mod detection;
pub mod distance;
pub mod error;
pub mod motion;
pub mod pipeline;
pub mod profile;
pub mod tracker;

// Re-export main types
pub use crate::audio::{AudioFeedbackEngine, SoundCategory};
pub use crate::camera_motion::CameraMotionEstimator;
pub use crate::config::Config;
pub use crate::detection::{BoundingBox, Detection, FrameDetections};
pub use crate::distance::{DistanceEstimator, UNKNOWN_DISTANCE};
pub use crate::error::{AudioError, Error, Result};
pub use crate::motion::{MotionClassifier, MotionState};
pub use crate::pipeline::{FrameReport, ObjectReport, Pipeline};
pub use crate::tracker::{ObjectId, TrackedObject, Tracker};
