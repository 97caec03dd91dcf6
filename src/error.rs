use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the eareye library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Audio initialization failed: {0}")]
    Audio(#[from] AudioError),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to bring the audio subsystem up.
///
/// Only ever returned while constructing the engine. Once the render loop is
/// running, hardware problems are logged and absorbed.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("sound asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("failed to read sound asset {}: {source}", path.display())]
    AssetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode sound asset {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("audio device unavailable: {0}")]
    Device(String),

    #[error("failed to spawn audio render thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Result type for eareye operations
pub type Result<T> = std::result::Result<T, Error>;
