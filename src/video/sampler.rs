use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use indicatif::ProgressBar;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};

use super::{Frame, FrameDecoder};

/// Persists a single selected frame.
pub trait FrameWriter: Send + Sync {
    fn write(&self, frame: &Frame, path: &Path) -> io::Result<()>;
}

/// Writes JPEG files via a temp file so a failed write leaves nothing behind.
#[derive(Debug, Clone)]
pub struct JpegFrameWriter {
    quality: u8,
}

impl Default for JpegFrameWriter {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

impl JpegFrameWriter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameWriter for JpegFrameWriter {
    fn write(&self, frame: &Frame, path: &Path) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir)?;
        JpegEncoder::new_with_quality(&mut file, self.quality)
            .encode_image(&frame.image)
            .map_err(io::Error::other)?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Outcome of one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub decoded: u64,
    pub written: u64,
    pub dropped: u64,
    pub frame_interval: u64,
}

/// Stride between kept frames: `max(1, round(native / target))`.
pub fn frame_interval(native_fps: f64, target_fps: u32) -> u64 {
    if target_fps == 0 || !native_fps.is_finite() || native_fps <= 0.0 {
        return 1;
    }
    (native_fps / f64::from(target_fps)).round().max(1.0) as u64
}

/// Closes the decoder however extraction ends.
struct OpenDecoder<D: FrameDecoder>(D);

impl<D: FrameDecoder> Deref for OpenDecoder<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.0
    }
}

impl<D: FrameDecoder> DerefMut for OpenDecoder<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.0
    }
}

impl<D: FrameDecoder> Drop for OpenDecoder<D> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Keeps every `frame_interval`-th frame of a video.
pub struct FrameSampler<W: FrameWriter = JpegFrameWriter> {
    writer: W,
    retry_backoff: Duration,
    progress: Option<ProgressBar>,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(JpegFrameWriter::default())
    }
}

impl<W: FrameWriter> FrameSampler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            retry_backoff: Duration::from_millis(100),
            progress: None,
        }
    }

    /// Pause before the single retry of a failed write.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Advance `progress` by one for every decoded frame.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Decode `decoder` to the end, writing selected frames into `output_dir`.
    ///
    /// The decoder is closed on every return path. A frame that cannot be
    /// written after one retry is counted in `dropped`; it does not fail the run.
    pub fn extract_frames<D: FrameDecoder>(
        &self,
        decoder: D,
        target_fps: u32,
        output_dir: &Path,
    ) -> Result<FrameStats> {
        let mut decoder = OpenDecoder(decoder);

        if target_fps == 0 {
            return Err(IngestError::Config(
                "target fps must be greater than 0".to_string(),
            ));
        }

        std::fs::create_dir_all(output_dir)?;

        let native_fps = decoder.native_fps();
        let interval = frame_interval(native_fps, target_fps);
        let mut stats = FrameStats {
            frame_interval: interval,
            ..Default::default()
        };

        info!(
            "Sampling frames at {} fps from {:.3} fps source (every {} of ~{} frames)",
            target_fps,
            native_fps,
            interval,
            decoder.total_frames()
        );
        if let Some(pb) = &self.progress {
            pb.set_length(decoder.total_frames());
        }

        loop {
            let index = stats.decoded;
            if index % interval == 0 {
                let Some(frame) = decoder.next_frame()? else {
                    break;
                };
                stats.decoded += 1;
                match self.write_with_retry(&frame, output_dir) {
                    Ok(()) => stats.written += 1,
                    Err(e) => {
                        warn!("Dropping frame: {}", e);
                        stats.dropped += 1;
                    }
                }
            } else {
                if !decoder.skip_frame()? {
                    break;
                }
                stats.decoded += 1;
            }
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        info!(
            "Extracted {} frames ({} decoded, {} dropped) to {}",
            stats.written,
            stats.decoded,
            stats.dropped,
            output_dir.display()
        );
        Ok(stats)
    }

    fn write_with_retry(&self, frame: &Frame, output_dir: &Path) -> Result<()> {
        let path = output_dir.join(frame.file_name());

        let first = match self.writer.write(frame, &path) {
            Ok(()) => {
                debug!("Saved {}", path.display());
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            "Failed to write frame {} ({}), retrying in {:?}",
            frame.index, first, self.retry_backoff
        );
        std::thread::sleep(self.retry_backoff);

        self.writer
            .write(frame, &path)
            .map_err(|source| IngestError::FrameWrite {
                index: frame.index,
                source,
            })
    }
}
