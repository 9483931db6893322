use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use image::RgbImage;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

use super::probe::{probe_video, VideoInfo};
use super::{Frame, FrameDecoder};

/// Lines of FFmpeg stderr kept in an error message.
const STDERR_TAIL_LINES: usize = 5;

/// Decodes frames by piping FFmpeg's raw RGB24 output.
pub struct FfmpegDecoder {
    path: PathBuf,
    info: VideoInfo,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    buffer: Vec<u8>,
    next_index: u64,
}

impl FfmpegDecoder {
    /// Open a video for sequential decoding. Fails with `SourceUnavailable`
    /// if the container cannot be probed or FFmpeg cannot be started.
    pub fn open(path: &Path) -> Result<Self> {
        let info = probe_video(path)?;

        let mut command = Command::new("ffmpeg");
        command
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-vsync",
                "passthrough",
                "-pix_fmt",
                "rgb24",
                "-f",
                "rawvideo",
                "-",
            ]);

        Self::spawn(path, info, command)
    }

    /// Start `command` as the raw frame producer for `path`.
    ///
    /// The command must write `width * height * 3` bytes per frame to stdout.
    fn spawn(path: &Path, info: VideoInfo, mut command: Command) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IngestError::SourceUnavailable {
                path: path.to_path_buf(),
                reason: format!("failed to spawn FFmpeg: {e}"),
            })?;

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(IngestError::SourceUnavailable {
                path: path.to_path_buf(),
                reason: "failed to capture FFmpeg output".to_string(),
            });
        };

        // Drained on its own thread so a chatty decoder never blocks on a full pipe.
        let stderr = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let frame_len = info.width as usize * info.height as usize * 3;
        debug!(
            "Opened {} for decoding ({} bytes per frame)",
            path.display(),
            frame_len
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child: Some(child),
            stdout: Some(BufReader::new(stdout)),
            stderr: Some(stderr),
            buffer: vec![0; frame_len],
            next_index: 0,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Fill the buffer with the next frame's bytes. `false` at end of stream.
    fn read_raw(&mut self) -> Result<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };

        match stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish()?;
                Ok(false)
            }
            Err(e) => Err(IngestError::SourceUnavailable {
                path: self.path.clone(),
                reason: format!("decoding stopped after {} frames: {e}", self.next_index),
            }),
        }
    }

    /// Reap FFmpeg once its output is exhausted. A non-zero exit means the
    /// stream could not be decoded, even if some frames came through first.
    fn finish(&mut self) -> Result<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().map_err(|e| IngestError::SourceUnavailable {
            path: self.path.clone(),
            reason: format!("failed to wait for FFmpeg: {e}"),
        })?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!(
                "FFmpeg finished {} after {} frames",
                self.path.display(),
                self.next_index
            );
            return Ok(());
        }

        Err(IngestError::SourceUnavailable {
            path: self.path.clone(),
            reason: format!(
                "FFmpeg exited with {} after {} frames: {}",
                status,
                self.next_index,
                stderr_tail(&stderr)
            ),
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return "no error output".to_string();
    }
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("; ")
}

impl FrameDecoder for FfmpegDecoder {
    fn native_fps(&self) -> f64 {
        self.info.fps
    }

    fn total_frames(&self) -> u64 {
        self.info.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.read_raw()? {
            return Ok(None);
        }
        let image = RgbImage::from_raw(self.info.width, self.info.height, self.buffer.clone())
            .ok_or_else(|| IngestError::SourceUnavailable {
                path: self.path.clone(),
                reason: "frame buffer does not match dimensions".to_string(),
            })?;
        let frame = Frame {
            index: self.next_index,
            image,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if !self.read_raw()? {
            return Ok(false);
        }
        self.next_index += 1;
        Ok(true)
    }

    fn close(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if let Some(mut child) = self.child.take() {
            // FFmpeg may still be writing; nothing else will read it.
            if let Err(e) = child.kill() {
                debug!("FFmpeg already exited: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap FFmpeg for {}: {}", self.path.display(), e);
            }
            debug!("Closed decoder for {}", self.path.display());
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
