use anyhow::Context;
use clap::Parser;
use eareye::pipeline::frame_instant;
use eareye::{Config, FrameDetections, FrameReport, Pipeline};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    name = "eareye",
    about = "Sonify tracked object motion from a detection log",
    version = "0.1.0"
)]
struct Args {
    /// Detection log, one JSON object per frame: {"frame_id": N, "detections": [...]}
    #[arg(short, long, required = true)]
    detections: PathBuf,

    /// Video the detections were taken from, used for camera motion compensation
    #[arg(long)]
    video: Option<PathBuf>,

    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding fast.wav, slow.wav and static.wav
    #[arg(short, long, default_value = "sounds/default")]
    sounds: PathBuf,

    /// Write per-frame reports here as JSON lines (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disable audio output
    #[arg(long)]
    mute: bool,

    /// Replay at this frame rate so the audio can be heard in real time; 0 replays as fast as possible
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Frame rate the detection log was recorded at; frame timestamps are derived from it
    #[arg(long, default_value_t = 30.0)]
    frame_rate: f64,
}

/// Grayscale frames from the source video, looked up by frame index.
struct FrameSource {
    cap: VideoCapture,
    next_index: u64,
    frame: Mat,
    gray: Mat,
}

impl FrameSource {
    fn open(path: &PathBuf) -> anyhow::Result<Self> {
        let cap = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            anyhow::bail!("failed to open video {}", path.display());
        }
        Ok(FrameSource {
            cap,
            next_index: 0,
            frame: Mat::default(),
            gray: Mat::default(),
        })
    }

    /// Advance to `frame_id`. `None` once the video runs out or frame ids go backwards.
    fn gray_at(&mut self, frame_id: u64) -> anyhow::Result<Option<&Mat>> {
        if frame_id < self.next_index {
            return Ok(None);
        }
        while self.next_index <= frame_id {
            if !self.cap.read(&mut self.frame)? || self.frame.empty() {
                return Ok(None);
            }
            self.next_index += 1;
        }
        imgproc::cvt_color_def(&self.frame, &mut self.gray, imgproc::COLOR_BGR2GRAY)?;
        Ok(Some(&self.gray))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !(args.frame_rate > 0.0 && args.frame_rate.is_finite()) {
        anyhow::bail!("--frame-rate must be a positive number, got {}", args.frame_rate);
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    log::info!("focal length {:.1} px, {} target classes", config.camera.focal_length, config.target_classes.len());

    let mut pipeline = if args.mute {
        Pipeline::without_audio(config)?
    } else {
        Pipeline::new(config, &args.sounds)?
    };
    if !args.mute && !pipeline.audio_enabled() {
        log::warn!("continuing without audio; run generate_profile to create default sounds");
    }

    let mut video = args.video.as_ref().map(FrameSource::open).transpose()?;

    let input = File::open(&args.detections).with_context(|| format!("opening {}", args.detections.display()))?;
    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let period = if args.fps > 0.0 {
        Duration::try_from_secs_f64(1.0 / args.fps).ok()
    } else {
        None
    };
    let origin = Instant::now();
    let mut next = origin;
    let mut frames = 0u64;

    for (line_no, line) in BufReader::new(input).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: FrameDetections = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid detection record", args.detections.display(), line_no + 1))?;

        let gray = match video.as_mut() {
            Some(source) => source.gray_at(frame.frame_id)?,
            None => None,
        };
        let captured = frame_instant(origin, frame.frame_id, args.frame_rate);
        let mut report: FrameReport = pipeline.process_frame_at(&frame.detections, gray, captured);
        report.frame_id = Some(frame.frame_id);
        serde_json::to_writer(&mut out, &report)?;
        out.write_all(b"\n")?;

        if let Some(dominant) = report.dominant {
            log::debug!("frame {}: {} objects, dominant {}", frame.frame_id, report.objects.len(), dominant);
        }
        frames += 1;

        if let Some(period) = period {
            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    }

    out.flush()?;
    pipeline.shutdown();
    log::info!("processed {} frames", frames);
    Ok(())
}
