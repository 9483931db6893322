//! FFprobe video information.

use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Video stream properties needed to decode and sample frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Native frame rate (fps)
    pub fps: f64,
    /// Frame count reported by the container, or estimated from duration
    pub total_frames: u64,
    pub codec: String,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

fn unavailable(path: &Path, reason: impl Into<String>) -> IngestError {
    IngestError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Probe a video file. Any failure means the source cannot be decoded.
pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        return Err(unavailable(path, "file does not exist"));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| unavailable(path, format!("failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        return Err(unavailable(
            path,
            format!(
                "FFprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let info = parse_probe_output(&output.stdout).map_err(|reason| unavailable(path, reason))?;
    debug!(
        "Probed {}: {}x{} {} @ {:.3} fps, {} frames",
        path.display(),
        info.width,
        info.height,
        info.codec,
        info.fps,
        info.total_frames
    );
    Ok(info)
}

fn parse_probe_output(stdout: &[u8]) -> std::result::Result<VideoInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unreadable FFprobe output: {e}"))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| "no video stream found".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| "video stream has no frame rate".to_string())?;

    let duration = stream
        .duration
        .as_ref()
        .or(probe.format.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_ref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round().max(0.0) as u64);

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        total_frames,
        codec: stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "format": {"duration": "3.000000"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 640, "height": 360,
                 "r_frame_rate": "30/1", "avg_frame_rate": "30/1", "nb_frames": "90"}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.total_frames, 90);
        assert_eq!(info.codec, "h264");
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let json = br#"{
            "format": {"duration": "2.0"},
            "streams": [{"codec_type": "video", "width": 2, "height": 2, "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.total_frames, 50);
    }

    #[test]
    fn test_audio_only_is_rejected() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}]}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let result = probe_video(Path::new("/nonexistent/video.mp4"));
        assert!(matches!(result, Err(IngestError::SourceUnavailable { .. })));
    }
}
