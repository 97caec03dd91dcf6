//! Lock-protected mixer state shared by the producer and the render tick.
//!
//! Nothing here touches hardware. [`MixerState::update`] sets targets,
//! [`MixerState::tick`] advances volumes and returns the playback commands the
//! render thread forwards to its output.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::time::{Duration, Instant};

use crate::config::AudioConfig;
use crate::distance::is_known;
use crate::motion::MotionState;

/// Volumes closer than this to their target snap onto it.
const SNAP_EPSILON: f32 = 1e-3;

/// Boost zone extends to this multiple of the near distance.
const BOOST_ZONE: f32 = 1.5;

/// Config seconds as a `Duration`. Negative and NaN become zero, anything too
/// large for a `Duration` saturates.
pub(crate) fn seconds(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundCategory {
    Fast,
    Slow,
    Static,
}

impl SoundCategory {
    pub const ALL: [SoundCategory; 3] = [SoundCategory::Fast, SoundCategory::Slow, SoundCategory::Static];

    /// Asset file expected in the sound directory.
    pub fn file_name(self) -> &'static str {
        match self {
            SoundCategory::Fast => "fast.wav",
            SoundCategory::Slow => "slow.wav",
            SoundCategory::Static => "static.wav",
        }
    }
}

impl fmt::Display for SoundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SoundCategory::Fast => "fast",
            SoundCategory::Slow => "slow",
            SoundCategory::Static => "static",
        };
        f.write_str(s)
    }
}

/// One value per sound category.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap<T> {
    pub fast: T,
    pub slow: T,
    pub static_: T,
}

impl<T> Index<SoundCategory> for CategoryMap<T> {
    type Output = T;

    fn index(&self, category: SoundCategory) -> &T {
        match category {
            SoundCategory::Fast => &self.fast,
            SoundCategory::Slow => &self.slow,
            SoundCategory::Static => &self.static_,
        }
    }
}

impl<T> IndexMut<SoundCategory> for CategoryMap<T> {
    fn index_mut(&mut self, category: SoundCategory) -> &mut T {
        match category {
            SoundCategory::Fast => &mut self.fast,
            SoundCategory::Slow => &mut self.slow,
            SoundCategory::Static => &mut self.static_,
        }
    }
}

/// Left/right gain pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pan {
    pub left: f32,
    pub right: f32,
}

impl Pan {
    pub const CENTER: Pan = Pan { left: 0.5, right: 0.5 };
}

impl Default for Pan {
    fn default() -> Self {
        Pan::CENTER
    }
}

/// Stereo pan for a normalized horizontal position (0 = left edge, 1 = right edge).
///
/// Hard left/right outside the centre zone `[0.5 - deadzone, 0.5 + deadzone]`,
/// linear crossfade summing to 1 inside it.
pub fn pan_for_position(x: f32, deadzone: f32) -> Pan {
    let left_edge = 0.5 - deadzone;
    let right_edge = 0.5 + deadzone;
    if x < left_edge {
        Pan { left: 1.0, right: 0.0 }
    } else if x > right_edge {
        Pan { left: 0.0, right: 1.0 }
    } else {
        let right = (x - left_edge) / (right_edge - left_edge);
        Pan {
            left: 1.0 - right,
            right,
        }
    }
}

/// Gain multiplier for an object at `distance` metres.
///
/// 1.0 at `near_distance`, `min_volume` at `far_distance` along an exponential
/// curve, with an extra boost inside 1.5x near that may take the result above 1.0.
pub fn proximity_gain(distance: f32, config: &AudioConfig) -> f32 {
    let near = config.near_distance;
    let far = config.far_distance;
    let d = distance.clamp(near, far);
    let t = (d - near) / (far - near);

    let k = config.falloff;
    let shape = if k.abs() < f32::EPSILON {
        1.0 - t
    } else {
        ((-k * t).exp() - (-k).exp()) / (1.0 - (-k).exp())
    };
    let floor = config.min_volume;
    let mut gain = floor + (1.0 - floor) * shape;

    let boost_edge = near * BOOST_ZONE;
    if d < boost_edge {
        let closeness = (boost_edge - d) / (boost_edge - near);
        gain *= 1.0 + (config.boost_gain - 1.0) * closeness;
    }
    gain
}

/// Closest object with a usable distance, as `(distance, x)`.
///
/// Missing x positions fall back to the centre.
pub fn closest_object(distances: &[f32], x_positions: &[f32]) -> Option<(f32, f32)> {
    distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| is_known(d))
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, &d)| (d, x_positions.get(i).copied().unwrap_or(0.5)))
}

/// Instruction for the hardware side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    /// Begin looping playback.
    Start(SoundCategory),
    SetGains { category: SoundCategory, left: f32, right: f32 },
    Stop(SoundCategory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silent,
    Rising,
    Steady,
    Falling,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    started: Instant,
    left: f32,
    right: f32,
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    current: f32,
    target: f32,
    pan: Pan,
    playing: bool,
    fade: Option<Fade>,
    last_gains: (f32, f32),
}

impl ChannelState {
    fn step(&mut self, rate: f32, max_volume: f32) {
        let diff = self.target - self.current;
        if diff.abs() <= SNAP_EPSILON {
            self.current = self.target;
        } else {
            self.current += diff * rate;
        }
        self.current = self.current.clamp(0.0, max_volume);
    }

    fn phase(&self, silence: f32) -> Phase {
        if self.current <= silence && self.target <= silence {
            Phase::Silent
        } else if self.target > self.current {
            Phase::Rising
        } else if self.target < self.current {
            Phase::Falling
        } else {
            Phase::Steady
        }
    }
}

/// Read-only view of one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub current: f32,
    pub target: f32,
    pub pan: Pan,
    pub playing: bool,
}

#[derive(Debug, Clone, Default)]
struct StaticPulse {
    last_trigger: Option<Instant>,
    clear_at: Option<Instant>,
    count: u64,
}

/// Short rolling window of frame states resolved by majority vote.
#[derive(Debug, Clone)]
struct StateHistory {
    states: VecDeque<Option<MotionState>>,
    capacity: usize,
}

impl StateHistory {
    fn new(capacity: usize) -> Self {
        StateHistory {
            states: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.states.len() > self.capacity {
            self.states.pop_front();
        }
    }

    /// Record `state` and return the majority; ties go to the most recent.
    fn push(&mut self, state: Option<MotionState>) -> Option<MotionState> {
        if self.states.len() == self.capacity {
            self.states.pop_front();
        }
        self.states.push_back(state);

        let count = |s: Option<MotionState>| self.states.iter().filter(|&&x| x == s).count();
        let mut winner = state;
        let mut best = count(state);
        for &candidate in self.states.iter().rev() {
            let n = count(candidate);
            if n > best {
                winner = candidate;
                best = n;
            }
        }
        winner
    }
}

/// All mutable audio state. Guarded by a single lock in the engine.
#[derive(Debug, Clone)]
pub struct MixerState {
    config: AudioConfig,
    channels: CategoryMap<ChannelState>,
    history: StateHistory,
    pulse: StaticPulse,
    smoothed: Option<MotionState>,
}

impl MixerState {
    pub fn new(config: AudioConfig) -> Self {
        MixerState {
            history: StateHistory::new(config.history_len),
            config,
            channels: CategoryMap::default(),
            pulse: StaticPulse::default(),
            smoothed: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AudioConfig) {
        self.history.set_capacity(config.history_len);
        self.config = config;
    }

    pub fn channel(&self, category: SoundCategory) -> ChannelSnapshot {
        let ch = &self.channels[category];
        ChannelSnapshot {
            current: ch.current,
            target: ch.target,
            pan: ch.pan,
            playing: ch.playing,
        }
    }

    /// Frame state after the majority vote.
    pub fn smoothed_state(&self) -> Option<MotionState> {
        self.smoothed
    }

    /// Number of static pulses accepted so far.
    pub fn pulse_count(&self) -> u64 {
        self.pulse.count
    }

    /// Producer side: derive new targets from the latest frame.
    pub fn update(
        &mut self,
        now: Instant,
        dominant: Option<MotionState>,
        distances: &[f32],
        has_objects: bool,
        x_positions: &[f32],
    ) {
        let smoothed = self.history.push(dominant);
        self.smoothed = smoothed;

        self.channels.fast.target = 0.0;
        self.channels.slow.target = 0.0;
        if !has_objects {
            return;
        }

        let closest = closest_object(distances, x_positions);
        let gain = closest.map_or(1.0, |(d, _)| proximity_gain(d, &self.config));
        let level = (self.config.base_volume * gain).clamp(0.0, self.config.max_volume);
        let pan = closest.map_or(Pan::CENTER, |(_, x)| pan_for_position(x, self.config.pan_deadzone));
        for category in SoundCategory::ALL {
            self.channels[category].pan = pan;
        }

        match smoothed {
            Some(MotionState::Fast) => {
                self.channels.fast.target = level;
                self.channels.slow.target = (level * self.config.layer_ratio).clamp(0.0, self.config.max_volume);
            }
            Some(MotionState::Slow) => {
                self.channels.slow.target = level;
            }
            Some(MotionState::Static) => {
                self.trigger_static(now, level);
            }
            None => {}
        }
    }

    /// Fire a static pulse at `level` unless the cooldown is still running.
    pub fn trigger_static(&mut self, now: Instant, level: f32) -> bool {
        let cooldown = seconds(self.config.static_cooldown);
        if let Some(last) = self.pulse.last_trigger {
            if now.saturating_duration_since(last) < cooldown {
                return false;
            }
        }
        let hold = seconds(self.config.static_pulse_duration);
        self.channels.static_.target = level.clamp(0.0, self.config.max_volume);
        self.pulse.last_trigger = Some(now);
        // A hold past the end of time is never cleared.
        self.pulse.clear_at = now.checked_add(hold);
        self.pulse.count += 1;
        log::debug!("static pulse #{} at level {:.2}", self.pulse.count, level);
        true
    }

    /// Render side: advance one tick and collect hardware commands.
    pub fn tick(&mut self, now: Instant) -> Vec<PlaybackCommand> {
        if let Some(clear_at) = self.pulse.clear_at {
            if now >= clear_at {
                self.channels.static_.target = 0.0;
                self.pulse.clear_at = None;
            }
        }

        let rate = self.config.volume_smoothing;
        let max_volume = self.config.max_volume;
        let silence = self.config.silence_threshold;
        let crossfade = seconds(self.config.crossfade_time);
        let mut commands = Vec::new();

        for category in SoundCategory::ALL {
            let ch = &mut self.channels[category];
            let before = ch.phase(silence);
            ch.step(rate, max_volume);
            let after = ch.phase(silence);
            if before != after {
                log::debug!("{} channel {:?} -> {:?} ({:.3})", category, before, after, ch.current);
            }

            if ch.current > silence {
                if !ch.playing {
                    commands.push(PlaybackCommand::Start(category));
                    ch.playing = true;
                }
                ch.fade = None;
                let gains = (ch.current * ch.pan.left, ch.current * ch.pan.right);
                ch.last_gains = gains;
                commands.push(PlaybackCommand::SetGains {
                    category,
                    left: gains.0,
                    right: gains.1,
                });
            } else if ch.playing {
                let (left, right) = ch.last_gains;
                let fade = *ch.fade.get_or_insert(Fade { started: now, left, right });
                let elapsed = now.saturating_duration_since(fade.started);
                if elapsed >= crossfade {
                    commands.push(PlaybackCommand::Stop(category));
                    ch.playing = false;
                    ch.fade = None;
                    ch.last_gains = (0.0, 0.0);
                } else {
                    let remaining = 1.0 - elapsed.as_secs_f32() / crossfade.as_secs_f32();
                    commands.push(PlaybackCommand::SetGains {
                        category,
                        left: fade.left * remaining,
                        right: fade.right * remaining,
                    });
                }
            }
        }
        commands
    }
}
