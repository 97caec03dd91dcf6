//! Continuous spatial audio feedback.
//!
//! The producer calls [`AudioFeedbackEngine::update`] once per processed frame.
//! An independent render thread ticks at a fixed rate, eases volumes toward
//! their targets and drives the output device. Both sides share one
//! [`MixerState`] behind a single mutex; hardware calls happen outside it.

mod mixer;
mod output;

pub use mixer::{
    closest_object, pan_for_position, proximity_gain, CategoryMap, ChannelSnapshot, MixerState, Pan,
    PlaybackCommand, SoundCategory,
};
pub use output::{AudioOutput, RodioOutput, SoundBank};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::motion::MotionState;

fn lock(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AudioFeedbackEngine {
    state: Arc<Mutex<MixerState>>,
    running: Arc<AtomicBool>,
    render: Option<JoinHandle<()>>,
    finished: Receiver<()>,
}

impl AudioFeedbackEngine {
    /// Load the category sounds from `sound_dir` and open the default device.
    pub fn new(sound_dir: impl AsRef<Path>, config: AudioConfig) -> Result<Self, AudioError> {
        let sounds = SoundBank::load(sound_dir)?;
        Self::with_output(config, move || RodioOutput::open(sounds))
    }

    /// Start the engine on a custom output.
    ///
    /// `open` runs on the render thread, so the output need not be `Send`. Its
    /// error, if any, is returned from here.
    pub fn with_output<F, O>(config: AudioConfig, open: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<O, AudioError> + Send + 'static,
        O: AudioOutput + 'static,
    {
        let state = Arc::new(Mutex::new(MixerState::new(config)));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (finished_tx, finished_rx) = bounded::<()>(1);

        let thread_state = Arc::clone(&state);
        let thread_running = Arc::clone(&running);
        let render = thread::Builder::new()
            .name("audio-render".into())
            .spawn(move || {
                let mut output = match open() {
                    Ok(output) => {
                        let _ = ready_tx.send(Ok(()));
                        output
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                render_loop(&thread_state, &thread_running, &mut output);
                output.stop_all();
                let _ = finished_tx.send(());
            })
            .map_err(AudioError::Thread)?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::Device("audio render thread exited during startup".into())));
        if let Err(e) = ready {
            let _ = render.join();
            return Err(e);
        }

        log::info!("audio feedback engine started");
        Ok(AudioFeedbackEngine {
            state,
            running,
            render: Some(render),
            finished: finished_rx,
        })
    }

    /// Publish the latest frame analysis. Only holds the lock briefly.
    ///
    /// `distances` and `x_positions` are parallel; x is normalized to `[0, 1]`.
    pub fn update(
        &self,
        dominant: Option<MotionState>,
        distances: &[f32],
        has_objects: bool,
        x_positions: &[f32],
    ) {
        let now = Instant::now();
        lock(&self.state).update(now, dominant, distances, has_objects, x_positions);
    }

    pub fn set_config(&self, config: AudioConfig) {
        lock(&self.state).set_config(config);
    }

    pub fn config(&self) -> AudioConfig {
        lock(&self.state).config().clone()
    }

    pub fn channel(&self, category: SoundCategory) -> ChannelSnapshot {
        lock(&self.state).channel(category)
    }

    pub fn is_running(&self) -> bool {
        self.render.is_some()
    }

    /// Stop the render thread, waiting at most the configured shutdown timeout.
    pub fn shutdown(&mut self) {
        let Some(render) = self.render.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        let timeout = mixer::seconds(lock(&self.state).config().shutdown_timeout)
            .min(Duration::from_secs_f32(crate::config::MAX_AUDIO_SECONDS));
        match self.finished.recv_timeout(timeout) {
            Ok(()) => {
                if render.join().is_err() {
                    log::warn!("audio render thread panicked");
                }
                log::info!("audio feedback engine stopped");
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = render.join();
                log::warn!("audio render thread exited abnormally");
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("audio render thread did not stop within {:?}, detaching", timeout)
            }
        }
    }
}

impl Drop for AudioFeedbackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop<O: AudioOutput>(state: &Mutex<MixerState>, running: &AtomicBool, output: &mut O) {
    let mut next = Instant::now();
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        let (commands, period) = {
            let mut s = lock(state);
            let commands = s.tick(now);
            (commands, mixer::seconds(1.0 / s.config().tick_rate_hz.max(1.0)))
        };
        for command in &commands {
            output.apply(command);
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        commands: Arc<Mutex<Vec<PlaybackCommand>>>,
    }

    impl AudioOutput for Recorder {
        fn apply(&mut self, command: &PlaybackCommand) {
            self.commands.lock().unwrap().push(*command);
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_device_failure_surfaces_at_construction() {
        let result = AudioFeedbackEngine::with_output(AudioConfig::default(), || -> Result<Recorder, AudioError> {
            Err(AudioError::Device("no device".into()))
        });
        assert!(matches!(result, Err(AudioError::Device(_))));
    }

    #[test]
    fn test_missing_sound_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AudioFeedbackEngine::new(dir.path().join("nope"), AudioConfig::default());
        assert!(matches!(result, Err(AudioError::MissingAsset(_))));
    }

    #[test]
    fn test_update_drives_render_thread() {
        let recorder = Recorder::default();
        let commands = Arc::clone(&recorder.commands);
        let mut engine = AudioFeedbackEngine::with_output(AudioConfig::default(), move || Ok(recorder)).unwrap();
        assert!(engine.is_running());

        engine.update(Some(MotionState::Slow), &[2.0], true, &[0.1]);
        assert!(wait_for(|| commands
            .lock()
            .unwrap()
            .contains(&PlaybackCommand::Start(SoundCategory::Slow))));
        assert!(wait_for(|| engine.channel(SoundCategory::Slow).current > 0.05));

        engine.shutdown();
        assert!(!engine.is_running());
        // Render thread stops all output on the way out.
        assert!(commands
            .lock()
            .unwrap()
            .contains(&PlaybackCommand::Stop(SoundCategory::Slow)));
    }

    #[test]
    fn test_runtime_config_change() {
        let engine = AudioFeedbackEngine::with_output(AudioConfig::default(), || Ok(Recorder::default())).unwrap();
        let mut cfg = engine.config();
        cfg.volume_smoothing = 0.5;
        engine.set_config(cfg);
        assert_eq!(engine.config().volume_smoothing, 0.5);
    }

    #[test]
    fn test_unvalidated_times_keep_engine_alive() {
        let mut engine = AudioFeedbackEngine::with_output(AudioConfig::default(), || Ok(Recorder::default())).unwrap();
        let mut cfg = engine.config();
        cfg.static_cooldown = 1e20;
        cfg.static_pulse_duration = f32::INFINITY;
        cfg.crossfade_time = f32::NAN;
        cfg.shutdown_timeout = 1e20;
        engine.set_config(cfg);

        engine.update(Some(MotionState::Static), &[2.0], true, &[0.5]);
        engine.update(Some(MotionState::Static), &[2.0], true, &[0.5]);
        assert!(wait_for(|| engine.channel(SoundCategory::Static).current > 0.05));

        engine.shutdown();
        assert!(!engine.is_running());
    }
}
