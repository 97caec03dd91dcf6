//! Per-frame orchestration: detections in, identities, motion, ranges and audio out.

use nalgebra::{Point2, Vector2};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::audio::AudioFeedbackEngine;
use crate::camera_motion::CameraMotionEstimator;
use crate::config::Config;
use crate::detection::{BoundingBox, Detection};
use crate::distance::DistanceEstimator;
use crate::error::Result;
use crate::motion::{self, MotionClassifier, MotionState, Observation};
use crate::tracker::{ObjectId, Tracker};

/// One tracked object as seen by the visualization side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectReport {
    pub id: ObjectId,
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
    pub motion: MotionState,
    /// Metres, or the unknown-distance sentinel.
    pub distance: f32,
    pub compensated_center: [f32; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u64>,
    pub objects: Vec<ObjectReport>,
    pub dominant: Option<MotionState>,
    pub camera_motion: [f32; 2],
}

/// Capture time of frame `frame_id` in a stream recorded at `frame_rate` fps starting at `origin`.
///
/// Saturates at `origin` when the offset cannot be represented.
pub fn frame_instant(origin: Instant, frame_id: u64, frame_rate: f64) -> Instant {
    Duration::try_from_secs_f64(frame_id as f64 / frame_rate)
        .ok()
        .and_then(|offset| origin.checked_add(offset))
        .unwrap_or(origin)
}

/// Owns every per-frame component. Audio is optional: when the engine could not
/// start, tracking and classification carry on silently.
pub struct Pipeline {
    config: Config,
    tracker: Tracker,
    camera_motion: CameraMotionEstimator,
    classifier: MotionClassifier,
    audio: Option<AudioFeedbackEngine>,
}

impl Pipeline {
    /// Build the pipeline and try to start audio from `sound_dir`.
    ///
    /// An audio initialization failure is logged and the pipeline runs without sound.
    pub fn new(config: Config, sound_dir: impl AsRef<Path>) -> Result<Self> {
        let mut pipeline = Self::without_audio(config)?;
        match AudioFeedbackEngine::new(sound_dir, pipeline.config.audio.clone()) {
            Ok(engine) => pipeline.audio = Some(engine),
            Err(e) => log::warn!("audio disabled: {}", e),
        }
        Ok(pipeline)
    }

    pub fn with_audio(config: Config, engine: AudioFeedbackEngine) -> Result<Self> {
        let mut pipeline = Self::without_audio(config)?;
        engine.set_config(pipeline.config.audio.clone());
        pipeline.audio = Some(engine);
        Ok(pipeline)
    }

    pub fn without_audio(config: Config) -> Result<Self> {
        config.validate()?;
        let ranging = DistanceEstimator::new(config.camera.focal_length, config.dimensions.clone());
        Ok(Pipeline {
            tracker: Tracker::new(config.tracker.clone()),
            camera_motion: CameraMotionEstimator::new(config.camera_motion.clone())?,
            classifier: MotionClassifier::new(config.motion.clone(), ranging),
            audio: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn audio(&self) -> Option<&AudioFeedbackEngine> {
        self.audio.as_ref()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }

    /// Replace the configuration of every component at runtime.
    ///
    /// Tracked identities and smoothing state survive the change.
    pub fn apply_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        self.camera_motion.set_config(config.camera_motion.clone())?;
        self.tracker.set_config(config.tracker.clone());
        self.classifier.set_config(config.motion.clone());
        let ranging = self.classifier.ranging_mut();
        ranging.set_focal_length(config.camera.focal_length);
        ranging.set_dimensions(config.dimensions.clone());
        if let Some(audio) = &self.audio {
            audio.set_config(config.audio.clone());
        }
        self.config = config;
        log::info!("configuration updated");
        Ok(())
    }

    /// Process one frame. `gray` is the matching grayscale camera frame, if any;
    /// without one the camera is assumed still.
    pub fn process(&mut self, detections: &[Detection], gray: Option<&Mat>) -> FrameReport {
        self.process_frame_at(detections, gray, Instant::now())
    }

    /// Like [`process`](Self::process) for a frame captured at `now`.
    ///
    /// Replays should stamp frames from their frame index (see [`frame_instant`]),
    /// not from the wall clock, or the tracker's velocities follow replay jitter.
    pub fn process_frame_at(&mut self, detections: &[Detection], gray: Option<&Mat>, now: Instant) -> FrameReport {
        let camera_motion = match gray {
            Some(frame) => self.camera_motion.apply(frame),
            None => Vector2::zeros(),
        };
        self.process_at(detections, camera_motion, now)
    }

    /// Process one frame with an externally supplied camera displacement.
    pub fn process_with_motion(&mut self, detections: &[Detection], camera_motion: Vector2<f32>) -> FrameReport {
        self.process_at(detections, camera_motion, Instant::now())
    }

    /// Process one frame observed at `now`.
    pub fn process_at(
        &mut self,
        detections: &[Detection],
        camera_motion: Vector2<f32>,
        now: Instant,
    ) -> FrameReport {
        let accepted: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.accepts(&d.class_name))
            .collect();
        let centers: Vec<Point2<f32>> = accepted.iter().map(|d| d.center()).collect();

        let updates = self.tracker.update_at(&centers, now);
        self.classifier.forget(self.tracker.pruned());

        let mut objects = Vec::with_capacity(updates.len());
        for update in &updates {
            let det = accepted[update.detection];
            let result = self.classifier.classify(
                &Observation {
                    id: update.id,
                    center: update.position,
                    class_name: &det.class_name,
                    bbox: &det.bbox,
                },
                camera_motion,
            );
            self.tracker.annotate(update.id, result.state, result.distance);
            objects.push(ObjectReport {
                id: update.id,
                bbox: det.bbox,
                class_name: det.class_name.clone(),
                confidence: det.confidence,
                motion: result.state,
                distance: result.distance,
                compensated_center: [result.compensated_center.x, result.compensated_center.y],
            });
        }

        let dominant = motion::dominant(objects.iter().map(|o| o.motion));
        if let Some(audio) = &self.audio {
            let width = self.config.camera.frame_width as f32;
            let distances: Vec<f32> = objects.iter().map(|o| o.distance).collect();
            let x_positions: Vec<f32> = objects
                .iter()
                .map(|o| (o.bbox.center().x / width).clamp(0.0, 1.0))
                .collect();
            audio.update(dominant, &distances, !objects.is_empty(), &x_positions);
        }

        FrameReport {
            frame_id: None,
            objects,
            dominant,
            camera_motion: [camera_motion.x, camera_motion.y],
        }
    }

    fn accepts(&self, class_name: &str) -> bool {
        self.config.target_classes.is_empty() || self.config.target_classes.iter().any(|c| c == class_name)
    }

    /// Stop the audio engine, if running. Tracking keeps working.
    pub fn shutdown(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioOutput, PlaybackCommand, SoundCategory};
    use crate::error::{AudioError, Error};
    use approx::assert_relative_eq;

    fn person_at(x: f32) -> Detection {
        Detection::new(BoundingBox::new(x - 30.0, 100.0, x + 30.0, 180.0), "person", 0.9)
    }

    fn pipeline() -> Pipeline {
        Pipeline::without_audio(Config::default()).unwrap()
    }

    #[test]
    fn test_identity_persists_across_frames() {
        let mut p = pipeline();
        let t0 = Instant::now();
        let first = p.process_at(&[person_at(200.0), person_at(800.0)], Vector2::zeros(), t0);
        let second = p.process_at(
            &[person_at(810.0), person_at(205.0)],
            Vector2::zeros(),
            t0 + Duration::from_millis(33),
        );

        let ids: Vec<_> = first.objects.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let near_200 = second.objects.iter().find(|o| o.bbox.x1 < 500.0).unwrap();
        let near_800 = second.objects.iter().find(|o| o.bbox.x1 > 500.0).unwrap();
        assert_eq!(near_200.id, 0);
        assert_eq!(near_800.id, 1);
    }

    #[test]
    fn test_first_frame_is_static_and_ranged() {
        let mut p = pipeline();
        let report = p.process_at(&[person_at(640.0)], Vector2::zeros(), Instant::now());
        assert_eq!(report.dominant, Some(MotionState::Static));
        let obj = &report.objects[0];
        assert_eq!(obj.motion, MotionState::Static);
        // 170 cm person, 100 px diagonal, focal 400.
        assert_relative_eq!(obj.distance, 6.8, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_frame_has_no_dominant_state() {
        let mut p = pipeline();
        let report = p.process_at(&[], Vector2::zeros(), Instant::now());
        assert!(report.objects.is_empty());
        assert_eq!(report.dominant, None);
    }

    #[test]
    fn test_untargeted_classes_are_dropped() {
        let mut p = pipeline();
        let cat = Detection::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0), "cat", 0.8);
        let report = p.process_at(&[cat, person_at(300.0)], Vector2::zeros(), Instant::now());
        assert_eq!(report.objects.len(), 1);
        assert_eq!(report.objects[0].class_name, "person");
        assert_eq!(p.tracker().objects().len(), 1);

        let mut cfg = Config::default();
        cfg.target_classes.clear();
        let mut open = Pipeline::without_audio(cfg).unwrap();
        let cat = Detection::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0), "cat", 0.8);
        assert_eq!(open.process_at(&[cat], Vector2::zeros(), Instant::now()).objects.len(), 1);
    }

    #[test]
    fn test_camera_jerk_does_not_register_as_motion() {
        let mut p = pipeline();
        let t0 = Instant::now();
        p.process_at(&[person_at(300.0)], Vector2::zeros(), t0);
        // The view jumps 90 px; the person has not moved in the world.
        let report = p.process_at(
            &[person_at(390.0)],
            Vector2::new(90.0, 0.0),
            t0 + Duration::from_millis(33),
        );
        let obj = &report.objects[0];
        assert_eq!(obj.id, 0);
        assert_relative_eq!(obj.compensated_center[0], 300.0, epsilon = 1e-3);
        assert_eq!(report.dominant, Some(MotionState::Static));
        assert_eq!(report.camera_motion, [90.0, 0.0]);
    }

    #[test]
    fn test_moving_object_becomes_fast() {
        let mut p = pipeline();
        let t0 = Instant::now();
        let mut last = None;
        for i in 0..8u32 {
            let report = p.process_at(
                &[person_at(100.0 + 140.0 * i as f32)],
                Vector2::zeros(),
                t0 + Duration::from_millis(33 * i as u64),
            );
            last = report.dominant;
        }
        assert_eq!(last, Some(MotionState::Fast));
        assert_eq!(p.tracker().objects()[0].motion_state, MotionState::Fast);
    }

    #[test]
    fn test_report_serializes_for_visualization() {
        let mut p = pipeline();
        let mut report = p.process_at(&[person_at(640.0)], Vector2::new(1.5, -2.0), Instant::now());
        report.frame_id = Some(7);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frame_id"], 7);
        assert_eq!(json["dominant"], "static");
        assert_eq!(json["objects"][0]["motion"], "static");
        assert_eq!(json["objects"][0]["bbox"].as_array().unwrap().len(), 4);
        let back: FrameReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_apply_config() {
        let mut p = pipeline();
        let mut cfg = Config::default();
        cfg.camera.focal_length = 800.0;
        p.apply_config(cfg).unwrap();
        let report = p.process_at(&[person_at(640.0)], Vector2::zeros(), Instant::now());
        assert_relative_eq!(report.objects[0].distance, 13.6, epsilon = 1e-3);

        let mut bad = Config::default();
        bad.motion.slow_threshold = 1.0;
        assert!(matches!(p.apply_config(bad), Err(Error::InvalidConfig(_))));
        assert_relative_eq!(p.config().camera.focal_length, 800.0);
    }

    #[test]
    fn test_frame_instant_follows_frame_index() {
        let t0 = Instant::now();
        assert_eq!(frame_instant(t0, 0, 30.0), t0);
        assert_eq!(frame_instant(t0, 30, 30.0), t0 + Duration::from_secs(1));
        assert_eq!(frame_instant(t0, 45, 15.0), t0 + Duration::from_secs(3));
        assert_eq!(frame_instant(t0, 10, 0.0), t0);
    }

    #[test]
    fn test_replay_stamped_by_frame_index_keeps_identity() {
        let mut p = pipeline();
        let t0 = Instant::now();
        // 10 px per recorded frame, with a dropped frame every seventh index.
        for frame_id in (0..40u64).filter(|i| i % 7 != 6) {
            let x = 200.0 + 10.0 * frame_id as f32;
            let report = p.process_frame_at(&[person_at(x)], None, frame_instant(t0, frame_id, 30.0));
            assert_eq!(report.objects.len(), 1);
            assert_eq!(report.objects[0].id, 0, "identity lost at frame {}", frame_id);
        }
        let obj = &p.tracker().objects()[0];
        assert_relative_eq!(obj.velocity.x, 300.0, epsilon = 1.0);
    }

    #[test]
    fn test_pruned_identities_leave_classifier() {
        let mut p = pipeline();
        let t0 = Instant::now();
        p.process_at(&[person_at(200.0), person_at(900.0)], Vector2::zeros(), t0);
        assert_eq!(p.classifier.tracked_len(), 2);
        for i in 1..=11u64 {
            p.process_at(&[person_at(200.0)], Vector2::zeros(), frame_instant(t0, i, 30.0));
        }
        assert_eq!(p.tracker().pruned(), &[1]);
        assert_eq!(p.classifier.tracked_len(), 1);
    }

    #[test]
    fn test_missing_sounds_degrade_to_silent_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Pipeline::new(Config::default(), dir.path()).unwrap();
        assert!(!p.audio_enabled());
        let report = p.process_at(&[person_at(640.0)], Vector2::zeros(), Instant::now());
        assert_eq!(report.objects.len(), 1);
    }

    struct Silent;

    impl AudioOutput for Silent {
        fn apply(&mut self, _command: &PlaybackCommand) {}
    }

    #[test]
    fn test_audio_receives_frame_state() {
        let engine = AudioFeedbackEngine::with_output(Config::default().audio, || Ok::<_, AudioError>(Silent)).unwrap();
        let mut p = Pipeline::with_audio(Config::default(), engine).unwrap();
        assert!(p.audio_enabled());

        let t0 = Instant::now();
        for i in 0..6u32 {
            p.process_at(
                &[person_at(100.0 + 60.0 * i as f32)],
                Vector2::zeros(),
                t0 + Duration::from_millis(33 * i as u64),
            );
        }
        let slow = p.audio().unwrap().channel(SoundCategory::Slow);
        assert!(slow.target > 0.0);
        assert_eq!(p.audio().unwrap().channel(SoundCategory::Fast).target, 0.0);

        p.shutdown();
        assert!(!p.audio_enabled());
    }
}
