//! Synthesized default sounds, one sine beep per category.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::{CategoryMap, SoundCategory};

pub const SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    /// Seconds.
    pub duration: f32,
    /// Peak amplitude in [0, 1].
    pub amplitude: f32,
}

impl Tone {
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        let n = (SAMPLE_RATE as f32 * self.duration) as u32;
        let amp = self.amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
        (0..n).map(move |i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amp * (2.0 * std::f32::consts::PI * self.frequency * t).sin()) as i16
        })
    }
}

/// A set of tones written as `fast.wav`, `slow.wav` and `static.wav`.
#[derive(Debug, Clone)]
pub struct SoundProfile {
    pub tones: CategoryMap<Tone>,
}

impl Default for SoundProfile {
    fn default() -> Self {
        SoundProfile {
            tones: CategoryMap {
                fast: Tone {
                    frequency: 1000.0,
                    duration: 0.3,
                    amplitude: 0.8,
                },
                slow: Tone {
                    frequency: 600.0,
                    duration: 0.5,
                    amplitude: 0.6,
                },
                static_: Tone {
                    frequency: 300.0,
                    duration: 0.8,
                    amplitude: 0.4,
                },
            },
        }
    }
}

impl SoundProfile {
    /// Write every tone into `dir` as 16-bit mono PCM, creating `dir` if needed.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> crate::Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut written = Vec::with_capacity(SoundCategory::ALL.len());
        for category in SoundCategory::ALL {
            let path = dir.join(category.file_name());
            let mut writer = WavWriter::create(&path, spec).map_err(wav_error)?;
            for sample in self.tones[category].samples() {
                writer.write_sample(sample).map_err(wav_error)?;
            }
            writer.finalize().map_err(wav_error)?;
            log::info!("wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

fn wav_error(e: hound::Error) -> crate::Error {
    match e {
        hound::Error::IoError(io) => crate::Error::Io(io),
        other => crate::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    #[test]
    fn test_writes_all_categories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SoundProfile::default().write_to(dir.path().join("default")).unwrap();
        assert_eq!(paths.len(), 3);

        let reader = WavReader::open(dir.path().join("default").join("slow.wav")).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.duration(), (SAMPLE_RATE as f32 * 0.5) as u32);
    }

    #[test]
    fn test_tone_amplitude() {
        let tone = Tone {
            frequency: 440.0,
            duration: 0.1,
            amplitude: 0.5,
        };
        let peak = tone.samples().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= (i16::MAX / 2) as u16 + 1);
        assert!(peak > (i16::MAX / 3) as u16);
    }
}
