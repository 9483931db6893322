use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{IngestError, Result};

use super::AudioTrack;

/// File name of the extracted track inside an upload's audio directory.
pub const AUDIO_FILE_NAME: &str = "audio.wav";

/// Rate the track is extracted at.
const EXTRACT_SAMPLE_RATE: &str = "44100";

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            IngestError::AudioExtraction(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(IngestError::AudioExtraction(
            "FFmpeg check failed".to_string(),
        ));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .map_err(|e| {
            IngestError::AudioExtraction(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(IngestError::AudioExtraction(
            "FFprobe check failed".to_string(),
        ));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Ask FFprobe whether the container carries at least one audio stream.
pub async fn has_audio_stream(input: &Path) -> Result<bool> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index",
            "-of",
            "csv=p=0",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| IngestError::AudioExtraction(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::AudioExtraction(format!(
            "FFprobe failed: {}",
            stderr.trim()
        )));
    }

    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Extract the audio of a video into `<output_dir>/audio.wav` and load it.
///
/// The file is mono 16-bit PCM at 44.1 kHz; chunks are resampled for
/// analysis later.
pub async fn extract_audio(input: &Path, output_dir: &Path) -> Result<AudioTrack> {
    check_ffmpeg()?;
    check_ffprobe()?;

    if !input.exists() {
        return Err(IngestError::FileNotFound(input.display().to_string()));
    }

    if !has_audio_stream(input).await? {
        return Err(IngestError::NoAudioTrack(input.to_path_buf()));
    }

    tokio::fs::create_dir_all(output_dir).await?;
    let output = output_dir.join(AUDIO_FILE_NAME);

    info!("Extracting audio from {}", input.display());

    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(input)
        .args([
            "-vn",
            "-acodec",
            "pcm_s16le",
            "-ar",
            EXTRACT_SAMPLE_RATE,
            "-ac",
            "1",
        ])
        .arg(&output)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| IngestError::AudioExtraction(format!("Failed to run FFmpeg: {e}")))?;

    if !status.success() {
        return Err(IngestError::AudioExtraction(
            "FFmpeg audio extraction failed".to_string(),
        ));
    }

    if !output.exists() {
        return Err(IngestError::AudioExtraction(
            "Output file was not created".to_string(),
        ));
    }

    let track = tokio::task::spawn_blocking(move || AudioTrack::open(&output))
        .await
        .map_err(|e| IngestError::AudioExtraction(format!("Audio loader panicked: {e}")))?
        .map_err(|e| match e {
            IngestError::NoAudioTrack(_) => IngestError::NoAudioTrack(input.to_path_buf()),
            other => other,
        })?;

    info!(
        "Audio extracted to {} ({:.2}s)",
        track.path.display(),
        track.duration_secs()
    );

    Ok(track)
}
