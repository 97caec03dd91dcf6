//! Hardware side of the audio engine.

use rodio::source::{Buffered, ChannelVolume};
use rodio::{Decoder, OutputStream, OutputStreamHandle, PlayError, Sink, Source};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use super::mixer::{CategoryMap, PlaybackCommand, SoundCategory};
use crate::error::AudioError;

/// Receives playback commands from the render thread.
///
/// Implementations must not fail from the caller's point of view: device
/// errors are logged and swallowed.
pub trait AudioOutput {
    fn apply(&mut self, command: &PlaybackCommand);

    fn stop_all(&mut self) {
        for category in SoundCategory::ALL {
            self.apply(&PlaybackCommand::Stop(category));
        }
    }
}

type SoundSource = Buffered<Decoder<Cursor<Vec<u8>>>>;

/// Decoded sound assets, one per category. Immutable once loaded.
pub struct SoundBank {
    sources: CategoryMap<SoundSource>,
}

impl SoundBank {
    /// Load `fast.wav`, `slow.wav` and `static.wav` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AudioError> {
        let dir = dir.as_ref();
        Ok(SoundBank {
            sources: CategoryMap {
                fast: load_source(dir, SoundCategory::Fast)?,
                slow: load_source(dir, SoundCategory::Slow)?,
                static_: load_source(dir, SoundCategory::Static)?,
            },
        })
    }

    fn source(&self, category: SoundCategory) -> SoundSource {
        self.sources[category].clone()
    }
}

fn load_source(dir: &Path, category: SoundCategory) -> Result<SoundSource, AudioError> {
    let path = dir.join(category.file_name());
    if !path.is_file() {
        return Err(AudioError::MissingAsset(path));
    }
    let bytes = fs::read(&path).map_err(|source| AudioError::AssetRead {
        path: path.clone(),
        source,
    })?;
    let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| AudioError::Decode {
        path: path.clone(),
        message: e.to_string(),
    })?;
    log::debug!("loaded {} sound from {}", category, path.display());
    Ok(decoder.buffered())
}

const LEFT_ONLY: [f32; 2] = [1.0, 0.0];
const RIGHT_ONLY: [f32; 2] = [0.0, 1.0];

/// Two sinks per active category, each routed to a single output channel, so a
/// hard pan is true silence on the other side even for mono assets.
struct StereoPair {
    left: Sink,
    right: Sink,
}

/// Default output device via rodio.
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sounds: SoundBank,
    active: CategoryMap<Option<StereoPair>>,
}

impl RodioOutput {
    pub fn open(sounds: SoundBank) -> Result<Self, AudioError> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| AudioError::Device(e.to_string()))?;
        log::info!("audio output device opened");
        Ok(RodioOutput {
            _stream: stream,
            handle,
            sounds,
            active: CategoryMap::default(),
        })
    }

    fn routed_sink(&self, category: SoundCategory, weights: [f32; 2]) -> Result<Sink, PlayError> {
        let sink = Sink::try_new(&self.handle)?;
        sink.set_volume(0.0);
        let looped = self.sounds.source(category).repeat_infinite();
        sink.append(ChannelVolume::new(looped, weights.to_vec()));
        Ok(sink)
    }
}

impl AudioOutput for RodioOutput {
    fn apply(&mut self, command: &PlaybackCommand) {
        match *command {
            PlaybackCommand::Start(category) => {
                match (self.routed_sink(category, LEFT_ONLY), self.routed_sink(category, RIGHT_ONLY)) {
                    (Ok(left), Ok(right)) => self.active[category] = Some(StereoPair { left, right }),
                    (Err(e), _) | (_, Err(e)) => log::warn!("failed to start {} sound: {}", category, e),
                }
            }
            PlaybackCommand::SetGains { category, left, right } => {
                if let Some(pair) = &self.active[category] {
                    pair.left.set_volume(left);
                    pair.right.set_volume(right);
                }
            }
            PlaybackCommand::Stop(category) => {
                if let Some(pair) = self.active[category].take() {
                    pair.left.stop();
                    pair.right.stop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SoundProfile;

    #[test]
    fn test_missing_assets_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        match SoundBank::load(dir.path()) {
            Err(AudioError::MissingAsset(path)) => assert!(path.ends_with("fast.wav")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected missing asset"),
        }
    }

    #[test]
    fn test_undecodable_asset() {
        let dir = tempfile::tempdir().unwrap();
        for c in SoundCategory::ALL {
            fs::write(dir.path().join(c.file_name()), b"not a wav file").unwrap();
        }
        assert!(matches!(SoundBank::load(dir.path()), Err(AudioError::Decode { .. })));
    }

    #[test]
    fn test_generated_profile_loads() {
        let dir = tempfile::tempdir().unwrap();
        SoundProfile::default().write_to(dir.path()).unwrap();
        assert!(SoundBank::load(dir.path()).is_ok());
    }
}
