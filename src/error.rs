use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Video source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("No audio track found in {0}")]
    NoAudioTrack(PathBuf),

    #[error("No transcribable audio found")]
    NoTranscribableAudio,

    #[error("Speech recognition service failed on chunk {chunk}: {message}")]
    RecognitionService { chunk: usize, message: String },

    #[error("Failed to write frame {index}: {source}")]
    FrameWrite {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcript invariant violated at entry {index}: {message}")]
    AssemblyInvariant { index: usize, message: String },

    #[error("Audio extraction failed: {0}")]
    AudioExtraction(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl IngestError {
    /// Whether this error ends the whole video run rather than one unit of work.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::RecognitionService { .. } | IngestError::FrameWrite { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
