use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Full runtime configuration, usually loaded from a JSON file.
///
/// Every section falls back to its defaults when omitted, so a config file only
/// needs to name the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Labels accepted from the detector. Empty accepts everything.
    pub target_classes: Vec<String>,
    pub camera: CameraConfig,
    pub dimensions: ObjectDimensions,
    pub tracker: TrackerConfig,
    pub motion: MotionConfig,
    pub camera_motion: CameraMotionConfig,
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_classes: ["car", "person", "couch", "chair", "bed", "dining table", "tv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            camera: CameraConfig::default(),
            dimensions: ObjectDimensions::default(),
            tracker: TrackerConfig::default(),
            motion: MotionConfig::default(),
            camera_motion: CameraMotionConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.camera.focal_length <= 0.0 {
            return Err(invalid("camera.focal_length must be positive"));
        }
        if self.camera.frame_width == 0 || self.camera.frame_height == 0 {
            return Err(invalid("camera frame size must be non-zero"));
        }
        if self.tracker.max_distance <= 0.0 {
            return Err(invalid("tracker.max_distance must be positive"));
        }
        check_unit("tracker.velocity_smoothing", self.tracker.velocity_smoothing)?;

        let m = &self.motion;
        if m.static_threshold < 0.0 || m.slow_threshold < m.static_threshold {
            return Err(invalid("motion thresholds must satisfy 0 <= static <= slow"));
        }
        check_unit("motion.smoothing_factor", m.smoothing_factor)?;

        let cm = &self.camera_motion;
        if cm.ratio <= 0.0 || cm.ratio >= 1.0 {
            return Err(invalid("camera_motion.ratio must be in (0, 1)"));
        }
        if cm.ransac_threshold <= 0.0 {
            return Err(invalid("camera_motion.ransac_threshold must be positive"));
        }

        let a = &self.audio;
        if !(a.tick_rate_hz > 0.0 && a.tick_rate_hz.is_finite()) {
            return Err(invalid("audio.tick_rate_hz must be positive"));
        }
        check_seconds("audio.crossfade_time", a.crossfade_time)?;
        check_seconds("audio.static_pulse_duration", a.static_pulse_duration)?;
        check_seconds("audio.static_cooldown", a.static_cooldown)?;
        check_seconds("audio.shutdown_timeout", a.shutdown_timeout)?;
        if a.volume_smoothing <= 0.0 || a.volume_smoothing > 1.0 {
            return Err(invalid("audio.volume_smoothing must be in (0, 1]"));
        }
        if a.min_volume < 0.0 || a.min_volume > 1.0 {
            return Err(invalid("audio.min_volume is a fraction in [0, 1]"));
        }
        if a.max_volume <= 0.0 || a.base_volume < 0.0 || a.base_volume > a.max_volume {
            return Err(invalid("audio volumes must satisfy 0 <= base_volume <= max_volume"));
        }
        if a.near_distance <= 0.0 || a.near_distance >= a.far_distance {
            return Err(invalid("audio distances must satisfy 0 < near < far"));
        }
        if a.pan_deadzone <= 0.0 || a.pan_deadzone > 0.5 {
            return Err(invalid("audio.pan_deadzone must be in (0, 0.5]"));
        }
        if a.history_len == 0 {
            return Err(invalid("audio.history_len must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidConfig(msg.to_string())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be in [0, 1], got {value}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Focal length in pixels.
    pub focal_length: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            focal_length: 400.0,
            frame_width: 1280,
            frame_height: 720,
        }
    }
}

/// Real-world object sizes in centimetres.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDimensions {
    pub heights: HashMap<String, f32>,
    /// Classes listed here are ranged by bounding-box width instead of diagonal.
    pub widths: HashMap<String, f32>,
    /// Size used for classes missing from the tables.
    pub default_size: f32,
}

impl Default for ObjectDimensions {
    fn default() -> Self {
        let heights = [
            ("person", 170.0),
            ("car", 150.0),
            ("couch", 90.0),
            ("chair", 100.0),
            ("bed", 60.0),
            ("dining table", 75.0),
            ("tv", 60.0),
        ];
        ObjectDimensions {
            heights: heights.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            widths: [("tv".to_string(), 100.0)].into_iter().collect(),
            default_size: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum pixel distance between a predicted position and a detection.
    pub max_distance: f32,
    /// Consecutive missed frames tolerated before an object is dropped.
    pub max_lost: u32,
    /// Weight of the previous velocity in the exponential update.
    pub velocity_smoothing: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            max_distance: 150.0,
            max_lost: 10,
            velocity_smoothing: 0.5,
        }
    }
}

/// Speed thresholds are in pixels per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub static_threshold: f32,
    pub slow_threshold: f32,
    /// Share of the previous smoothed speed kept each frame.
    pub smoothing_factor: f32,
    /// Smoothed speeds at or below this are always static.
    pub min_speed_threshold: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            static_threshold: 25.0,
            slow_threshold: 120.0,
            smoothing_factor: 0.7,
            min_speed_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraMotionConfig {
    /// Upper bound on ORB keypoints per frame.
    pub max_features: i32,
    /// Lowe ratio for the best/second-best descriptor test.
    pub ratio: f32,
    /// Fewer keypoints or correspondences than this yields zero motion.
    pub min_matches: usize,
    /// RANSAC reprojection threshold in pixels.
    pub ransac_threshold: f64,
}

impl Default for CameraMotionConfig {
    fn default() -> Self {
        CameraMotionConfig {
            max_features: 500,
            ratio: 0.75,
            min_matches: 10,
            ransac_threshold: 5.0,
        }
    }
}

/// Audio engine tuning. Times are in seconds, distances in metres.
/// Upper bound for every audio timing value, in seconds.
pub const MAX_AUDIO_SECONDS: f32 = 3600.0;

fn check_seconds(name: &str, value: f32) -> Result<()> {
    if (0.0..=MAX_AUDIO_SECONDS).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be between 0 and {MAX_AUDIO_SECONDS} s, got {value}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub tick_rate_hz: f32,
    /// Fade-out length once a category drops below the silence threshold.
    pub crossfade_time: f32,
    /// Fraction of the remaining distance to target covered per tick.
    pub volume_smoothing: f32,
    /// Nominal level for the active category before proximity shaping.
    pub base_volume: f32,
    /// Proximity floor as a fraction of nominal level, reached at `far_distance`.
    pub min_volume: f32,
    /// Hard ceiling for every volume. Values above 1.0 give headroom.
    pub max_volume: f32,
    pub near_distance: f32,
    pub far_distance: f32,
    /// Steepness of the exponential proximity curve.
    pub falloff: f32,
    /// Extra gain applied at `near_distance`, tapering to 1.0 at 1.5x near.
    pub boost_gain: f32,
    pub silence_threshold: f32,
    /// Half-width of the centre crossfade zone in normalized x.
    pub pan_deadzone: f32,
    pub static_pulse_duration: f32,
    pub static_cooldown: f32,
    /// Number of frame states kept for the majority vote.
    pub history_len: usize,
    /// Level of the slow layer under a fast sound, relative to fast.
    pub layer_ratio: f32,
    /// Bounded wait for the render thread at shutdown.
    pub shutdown_timeout: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            tick_rate_hz: 60.0,
            crossfade_time: 0.2,
            volume_smoothing: 0.15,
            base_volume: 0.7,
            min_volume: 0.2,
            max_volume: 2.0,
            near_distance: 0.5,
            far_distance: 5.0,
            falloff: 3.0,
            boost_gain: 1.8,
            silence_threshold: 0.01,
            pan_deadzone: 0.2,
            static_pulse_duration: 0.5,
            static_cooldown: 2.0,
            history_len: 5,
            layer_ratio: 0.3,
            shutdown_timeout: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = Config::from_json(r#"{ "camera": { "focal_length": 600.0 }, "motion": { "slow_threshold": 80.0 } }"#)
            .unwrap();
        assert_eq!(cfg.camera.focal_length, 600.0);
        assert_eq!(cfg.camera.frame_width, 1280);
        assert_eq!(cfg.motion.slow_threshold, 80.0);
        assert_eq!(cfg.motion.static_threshold, 25.0);
        assert_eq!(cfg.dimensions.heights["person"], 170.0);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "tracker": {{ "max_lost": 3 }} }}"#).unwrap();
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.tracker.max_lost, 3);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = Config::from_json(r#"{ "motion": { "static_threshold": 50.0, "slow_threshold": 10.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_bad_distance_bounds() {
        let mut cfg = Config::default();
        cfg.audio.near_distance = 6.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_audio_times() {
        let err = Config::from_json(r#"{ "audio": { "static_cooldown": 1e20 } }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let mut cfg = Config::default();
        cfg.audio.crossfade_time = f32::NAN;
        assert!(cfg.validate().is_err());
        cfg.audio.crossfade_time = 0.2;
        cfg.audio.shutdown_timeout = -1.0;
        assert!(cfg.validate().is_err());
        cfg.audio.shutdown_timeout = 1.0;
        cfg.audio.static_pulse_duration = f32::INFINITY;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(Config::from_json("{ not json"), Err(Error::ConfigParse(_))));
    }
}
