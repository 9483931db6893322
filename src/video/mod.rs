pub mod decoder;
pub mod probe;
pub mod sampler;

pub use decoder::FfmpegDecoder;
pub use probe::{probe_video, VideoInfo};
pub use sampler::{frame_interval, FrameSampler, FrameStats, FrameWriter, JpegFrameWriter};

use image::RgbImage;

use crate::error::Result;

/// Extension of persisted frames.
pub const FRAME_EXTENSION: &str = "jpg";

/// A decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 0-based position in the decoded sequence.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn file_name(&self) -> String {
        frame_file_name(self.index)
    }
}

pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index}.{FRAME_EXTENSION}")
}

/// Sequential access to a video's frames.
///
/// `close` releases the underlying handle and must be safe to call more than
/// once.
pub trait FrameDecoder {
    fn native_fps(&self) -> f64;

    fn total_frames(&self) -> u64;

    /// Next frame in decode order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Advance past one frame without materializing it.
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame()?.is_some())
    }

    fn close(&mut self);
}
