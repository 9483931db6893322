pub mod chunk;
pub mod extract;
pub mod resample;

pub use chunk::{
    chunk_wav_path, detect_nonsilent, detect_silence, split, split_on_silence, write_chunk_wav,
    ChunkerConfig,
};
pub use extract::{check_ffmpeg, check_ffprobe, extract_audio, has_audio_stream, AUDIO_FILE_NAME};
pub use resample::{resample, ANALYSIS_SAMPLE_RATE};

use std::io::Cursor;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{IngestError, Result};

/// Mono f32 samples in `[-1.0, 1.0]` at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Digital silence of the given length.
    pub fn silence(duration_ms: u32, sample_rate: u32) -> Self {
        Self::new(vec![0.0; ms_to_samples(duration_ms as u64, sample_rate)], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_squares / self.samples.len() as f64).sqrt()
    }

    /// Loudness relative to full scale. Digital silence is `-inf`.
    pub fn dbfs(&self) -> f64 {
        let rms = self.rms();
        if rms == 0.0 {
            return f64::NEG_INFINITY;
        }
        20.0 * rms.log10()
    }

    /// Encode as 16-bit PCM mono WAV.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buffer), self.wav_spec())
                .map_err(|e| IngestError::AudioExtraction(format!("Failed to encode WAV: {e}")))?;
            self.write_samples(&mut writer)?;
            writer
                .finalize()
                .map_err(|e| IngestError::AudioExtraction(format!("Failed to encode WAV: {e}")))?;
        }
        Ok(buffer)
    }

    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let mut writer = WavWriter::create(path, self.wav_spec()).map_err(|e| {
            IngestError::AudioExtraction(format!("Failed to create {}: {e}", path.display()))
        })?;
        self.write_samples(&mut writer)?;
        writer
            .finalize()
            .map_err(|e| IngestError::AudioExtraction(format!("Failed to finalize WAV: {e}")))
    }

    fn wav_spec(&self) -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    fn write_samples<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut WavWriter<W>,
    ) -> Result<()> {
        for &s in &self.samples {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| IngestError::AudioExtraction(format!("Failed to write sample: {e}")))?;
        }
        Ok(())
    }
}

/// The audio extracted from one video, downmixed to mono for analysis.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Channel count of the file on disk.
    pub channels: u16,
    pub waveform: Waveform,
}

impl AudioTrack {
    /// Load a WAV file. An empty file means the source had no usable audio.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| IngestError::AudioExtraction(format!("Failed to open WAV file: {e}")))?;
        let spec = reader.spec();

        let decoded: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect()
            }
            SampleFormat::Float => reader.into_samples::<f32>().collect(),
        };
        let interleaved = decoded
            .map_err(|e| IngestError::AudioExtraction(format!("Failed to read WAV samples: {e}")))?;

        let samples = downmix(&interleaved, spec.channels);
        if samples.is_empty() {
            return Err(IngestError::NoAudioTrack(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            channels: spec.channels,
            waveform: Waveform::new(samples, spec.sample_rate),
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.waveform.duration_secs()
    }
}

/// A contiguous span of the track bounded by silence.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    /// Seconds from the start of the track.
    pub start: f64,
    /// Unpadded length in seconds.
    pub duration: f64,
    /// The original samples with generated silence on both ends.
    pub padded: Waveform,
}

impl AudioChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub(crate) fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}
