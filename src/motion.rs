use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::MotionConfig;
use crate::detection::BoundingBox;
use crate::distance::DistanceEstimator;
use crate::tracker::ObjectId;

/// Per-object motion class, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    Static,
    Slow,
    Fast,
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MotionState::Static => "static",
            MotionState::Slow => "slow",
            MotionState::Fast => "fast",
        };
        f.write_str(s)
    }
}

/// Frame-level state: the most urgent object state, `None` when nothing is visible.
pub fn dominant<I>(states: I) -> Option<MotionState>
where
    I: IntoIterator<Item = MotionState>,
{
    states.into_iter().max()
}

/// What the classifier needs to know about one tracked object this frame.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub id: ObjectId,
    pub center: Point2<f32>,
    pub class_name: &'a str,
    pub bbox: &'a BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub state: MotionState,
    /// Metres, or the unknown-distance sentinel.
    pub distance: f32,
    pub compensated_center: Point2<f32>,
    pub smoothed_speed: f32,
}

#[derive(Debug, Clone, Copy)]
struct SpeedHistory {
    compensated: Point2<f32>,
    smoothed_speed: f32,
}

/// Camera-compensated speed classification plus ranging.
///
/// Holds one smoothing entry per tracked identity; callers prune it with
/// [`MotionClassifier::forget`] whenever the tracker drops identities.
pub struct MotionClassifier {
    config: MotionConfig,
    ranging: DistanceEstimator,
    history: HashMap<ObjectId, SpeedHistory>,
}

impl MotionClassifier {
    pub fn new(config: MotionConfig, ranging: DistanceEstimator) -> Self {
        MotionClassifier {
            config,
            ranging,
            history: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MotionConfig) {
        self.config = config;
    }

    pub fn ranging_mut(&mut self) -> &mut DistanceEstimator {
        &mut self.ranging
    }

    /// Classify one object given this frame's camera displacement.
    pub fn classify(&mut self, obj: &Observation<'_>, camera_motion: Vector2<f32>) -> Classification {
        let compensated = obj.center - camera_motion;
        let smoothing = self.config.smoothing_factor;

        let smoothed_speed = match self.history.get(&obj.id) {
            Some(prev) => {
                let raw = nalgebra::distance(&compensated, &prev.compensated);
                smoothing * prev.smoothed_speed + (1.0 - smoothing) * raw
            }
            None => 0.0,
        };
        self.history.insert(
            obj.id,
            SpeedHistory {
                compensated,
                smoothed_speed,
            },
        );

        let state = self.state_for_speed(smoothed_speed);
        let distance = self.ranging.distance(obj.class_name, obj.bbox);
        log::debug!(
            "object {} ({}): speed {:.1} px/frame -> {}, {:.2} m",
            obj.id,
            obj.class_name,
            smoothed_speed,
            state,
            distance
        );

        Classification {
            state,
            distance,
            compensated_center: compensated,
            smoothed_speed,
        }
    }

    fn state_for_speed(&self, speed: f32) -> MotionState {
        let c = &self.config;
        if speed <= c.min_speed_threshold {
            MotionState::Static
        } else if speed > c.slow_threshold {
            MotionState::Fast
        } else if speed > c.static_threshold {
            MotionState::Slow
        } else {
            MotionState::Static
        }
    }

    /// Drop smoothing state for identities the tracker has pruned.
    pub fn forget(&mut self, ids: &[ObjectId]) {
        for id in ids {
            self.history.remove(id);
        }
    }

    pub fn tracked_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectDimensions;
    use approx::assert_relative_eq;

    fn classifier() -> MotionClassifier {
        MotionClassifier::new(
            MotionConfig {
                static_threshold: 10.0,
                slow_threshold: 40.0,
                smoothing_factor: 0.5,
                min_speed_threshold: 5.0,
            },
            DistanceEstimator::new(400.0, ObjectDimensions::default()),
        )
    }

    fn step(c: &mut MotionClassifier, id: ObjectId, x: f32, cam: Vector2<f32>) -> Classification {
        let bbox = BoundingBox::new(x - 30.0, 0.0, x + 30.0, 80.0);
        c.classify(
            &Observation {
                id,
                center: Point2::new(x, 40.0),
                class_name: "person",
                bbox: &bbox,
            },
            cam,
        )
    }

    #[test]
    fn test_dominant_ignores_order() {
        use MotionState::*;
        assert_eq!(dominant([Slow, Fast, Static]), Some(Fast));
        assert_eq!(dominant([Fast, Static, Slow]), Some(Fast));
        assert_eq!(dominant([Static, Slow]), Some(Slow));
        assert_eq!(dominant([Static]), Some(Static));
        assert_eq!(dominant(Vec::<MotionState>::new()), None);
    }

    #[test]
    fn test_first_sighting_is_static() {
        let mut c = classifier();
        let r = step(&mut c, 0, 100.0, Vector2::zeros());
        assert_eq!(r.state, MotionState::Static);
        assert_relative_eq!(r.smoothed_speed, 0.0);
        assert_relative_eq!(r.distance, 6.8, epsilon = 1e-4);
    }

    #[test]
    fn test_speed_smoothing_and_states() {
        let mut c = classifier();
        step(&mut c, 0, 0.0, Vector2::zeros());
        // raw 30 -> 0.5 * 0 + 0.5 * 30 = 15: slow
        let r = step(&mut c, 0, 30.0, Vector2::zeros());
        assert_relative_eq!(r.smoothed_speed, 15.0, epsilon = 1e-4);
        assert_eq!(r.state, MotionState::Slow);
        // raw 100 -> 0.5 * 15 + 50 = 57.5: fast
        let r = step(&mut c, 0, 130.0, Vector2::zeros());
        assert_relative_eq!(r.smoothed_speed, 57.5, epsilon = 1e-4);
        assert_eq!(r.state, MotionState::Fast);
    }

    #[test]
    fn test_deadband_keeps_static() {
        let mut c = classifier();
        step(&mut c, 0, 0.0, Vector2::zeros());
        let r = step(&mut c, 0, 8.0, Vector2::zeros());
        assert_relative_eq!(r.smoothed_speed, 4.0, epsilon = 1e-4);
        assert_eq!(r.state, MotionState::Static);
    }

    #[test]
    fn test_camera_motion_is_compensated() {
        let mut c = classifier();
        step(&mut c, 0, 100.0, Vector2::zeros());
        // Object appears 60 px to the right only because the view shifted by 60 px.
        let r = step(&mut c, 0, 160.0, Vector2::new(60.0, 0.0));
        assert_relative_eq!(r.compensated_center.x, 100.0, epsilon = 1e-4);
        assert_relative_eq!(r.smoothed_speed, 0.0, epsilon = 1e-4);
        assert_eq!(r.state, MotionState::Static);
    }

    #[test]
    fn test_forget_prunes_history() {
        let mut c = classifier();
        step(&mut c, 0, 0.0, Vector2::zeros());
        step(&mut c, 1, 300.0, Vector2::zeros());
        assert_eq!(c.tracked_len(), 2);
        c.forget(&[0]);
        assert_eq!(c.tracked_len(), 1);
        c.forget(&[1, 7]);
        assert_eq!(c.tracked_len(), 0);
        // A forgotten identity starts over.
        let r = step(&mut c, 0, 500.0, Vector2::zeros());
        assert_eq!(r.state, MotionState::Static);
    }
}
