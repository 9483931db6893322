use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, Result};

use super::{ms_to_samples, AudioChunk, AudioTrack, Waveform};

/// Configuration for silence-based chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Shortest run of quiet audio that counts as a boundary.
    pub min_silence_ms: u32,
    /// How far below the track's own loudness audio must fall to be silent.
    pub silence_margin_db: f64,
    /// Generated silence added to both ends of every chunk.
    pub pad_ms: u32,
    /// Stride of the silence scan window.
    pub seek_step_ms: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_silence_ms: 500,
            silence_margin_db: 14.0,
            pad_ms: 10,
            seek_step_ms: 1,
        }
    }
}

impl ChunkerConfig {
    /// Absolute silence threshold for a given track.
    pub fn threshold_db(&self, track: &AudioTrack) -> f64 {
        track.waveform.dbfs() - self.silence_margin_db
    }
}

/// Split a track at silence using the configured relative threshold.
pub fn split(track: &AudioTrack, config: &ChunkerConfig) -> Result<Vec<AudioChunk>> {
    let threshold_db = config.threshold_db(track);
    info!(
        "Splitting {:.2}s of audio (threshold {:.1} dBFS, min silence {}ms)",
        track.duration_secs(),
        threshold_db,
        config.min_silence_ms
    );
    split_on_silence(
        &track.waveform,
        config.min_silence_ms,
        threshold_db,
        config.pad_ms,
        config.seek_step_ms,
    )
}

/// Split a waveform into contiguous chunks whose boundaries sit at the
/// midpoints of detected silence runs.
///
/// Every sample lands in exactly one chunk. Leading and trailing silence
/// belong to the first and last chunk respectively.
pub fn split_on_silence(
    waveform: &Waveform,
    min_silence_ms: u32,
    silence_threshold_db: f64,
    pad_ms: u32,
    seek_step_ms: u32,
) -> Result<Vec<AudioChunk>> {
    let loudness = MsLoudness::new(waveform);
    let nonsilent = detect_nonsilent_in(&loudness, min_silence_ms, silence_threshold_db, seek_step_ms);

    if nonsilent.is_empty() {
        return Err(IngestError::NoTranscribableAudio);
    }

    let total_samples = waveform.len();
    let rate = waveform.sample_rate;

    let mut cuts = Vec::with_capacity(nonsilent.len() + 1);
    cuts.push(0usize);
    for pair in nonsilent.windows(2) {
        let mid_ms = (pair[0].1 + pair[1].0) / 2;
        cuts.push(ms_to_samples(mid_ms as u64, rate).min(total_samples));
    }
    cuts.push(total_samples);

    let pad = Waveform::silence(pad_ms, rate);
    let mut chunks = Vec::with_capacity(nonsilent.len());
    let mut current_time = 0.0f64;

    for (index, span) in cuts.windows(2).enumerate() {
        let (from, to) = (span[0], span[1]);
        let duration = (to - from) as f64 / rate as f64;

        let mut padded = Vec::with_capacity(to - from + 2 * pad.len());
        padded.extend_from_slice(&pad.samples);
        padded.extend_from_slice(&waveform.samples[from..to]);
        padded.extend_from_slice(&pad.samples);

        debug!(
            "Chunk {}: {:.3}s +{:.3}s ({} samples)",
            index,
            current_time,
            duration,
            to - from
        );

        chunks.push(AudioChunk {
            index,
            start: current_time,
            duration,
            padded: Waveform::new(padded, rate),
        });
        current_time += duration;
    }

    info!("Split audio into {} chunks", chunks.len());
    Ok(chunks)
}

/// Silent ranges in milliseconds, `[start, end)`.
pub fn detect_silence(
    waveform: &Waveform,
    min_silence_ms: u32,
    silence_threshold_db: f64,
    seek_step_ms: u32,
) -> Vec<(usize, usize)> {
    detect_silence_in(
        &MsLoudness::new(waveform),
        min_silence_ms,
        silence_threshold_db,
        seek_step_ms,
    )
}

/// Non-silent ranges in milliseconds, `[start, end)`.
pub fn detect_nonsilent(
    waveform: &Waveform,
    min_silence_ms: u32,
    silence_threshold_db: f64,
    seek_step_ms: u32,
) -> Vec<(usize, usize)> {
    detect_nonsilent_in(
        &MsLoudness::new(waveform),
        min_silence_ms,
        silence_threshold_db,
        seek_step_ms,
    )
}

fn detect_silence_in(
    loudness: &MsLoudness,
    min_silence_ms: u32,
    silence_threshold_db: f64,
    seek_step_ms: u32,
) -> Vec<(usize, usize)> {
    let len = loudness.len_ms();
    let min_silence = min_silence_ms as usize;
    let step = seek_step_ms.max(1) as usize;

    if len < min_silence || min_silence == 0 {
        return vec![];
    }

    let threshold = 10f64.powf(silence_threshold_db / 20.0);
    let last_start = len - min_silence;

    let mut starts: Vec<usize> = (0..=last_start).step_by(step).collect();
    if last_start % step != 0 {
        starts.push(last_start);
    }

    let silent_starts: Vec<usize> = starts
        .into_iter()
        .filter(|&i| loudness.rms(i, i + min_silence) <= threshold)
        .collect();

    let Some(&first) = silent_starts.first() else {
        return vec![];
    };

    let mut ranges = Vec::new();
    let mut range_start = first;
    let mut prev = first;
    for &i in &silent_starts[1..] {
        let continuous = i == prev + step;
        let has_gap = i > prev + min_silence;
        if !continuous && has_gap {
            ranges.push((range_start, prev + min_silence));
            range_start = i;
        }
        prev = i;
    }
    ranges.push((range_start, prev + min_silence));

    ranges
}

fn detect_nonsilent_in(
    loudness: &MsLoudness,
    min_silence_ms: u32,
    silence_threshold_db: f64,
    seek_step_ms: u32,
) -> Vec<(usize, usize)> {
    let len = loudness.len_ms();
    if len == 0 {
        return vec![];
    }

    let silent = detect_silence_in(loudness, min_silence_ms, silence_threshold_db, seek_step_ms);
    if silent.is_empty() {
        return vec![(0, len)];
    }
    if silent.len() == 1 && silent[0] == (0, len) {
        return vec![];
    }

    let mut ranges = Vec::new();
    let mut prev_end = 0;
    for &(start, end) in &silent {
        ranges.push((prev_end, start));
        prev_end = end;
    }
    if prev_end != len {
        ranges.push((prev_end, len));
    }
    if ranges.first() == Some(&(0, 0)) {
        ranges.remove(0);
    }

    ranges
}

/// Per-millisecond sums of squares with prefix totals, so any window's RMS
/// is O(1).
struct MsLoudness {
    prefix_squares: Vec<f64>,
    prefix_counts: Vec<usize>,
}

impl MsLoudness {
    fn new(waveform: &Waveform) -> Self {
        let rate = waveform.sample_rate as u64;
        let total = waveform.len() as u64;
        let len_ms = if rate == 0 {
            0
        } else {
            (total * 1000).div_ceil(rate) as usize
        };

        let mut prefix_squares = Vec::with_capacity(len_ms + 1);
        let mut prefix_counts = Vec::with_capacity(len_ms + 1);
        prefix_squares.push(0.0);
        prefix_counts.push(0);

        let mut squares = 0.0f64;
        let mut count = 0usize;
        for ms in 0..len_ms as u64 {
            let from = (ms * rate / 1000) as usize;
            let to = (((ms + 1) * rate / 1000) as usize).min(waveform.len());
            for &s in &waveform.samples[from..to] {
                squares += (s as f64) * (s as f64);
            }
            count += to - from;
            prefix_squares.push(squares);
            prefix_counts.push(count);
        }

        Self {
            prefix_squares,
            prefix_counts,
        }
    }

    fn len_ms(&self) -> usize {
        self.prefix_squares.len() - 1
    }

    fn rms(&self, from_ms: usize, to_ms: usize) -> f64 {
        let count = self.prefix_counts[to_ms] - self.prefix_counts[from_ms];
        if count == 0 {
            return 0.0;
        }
        let squares = self.prefix_squares[to_ms] - self.prefix_squares[from_ms];
        (squares.max(0.0) / count as f64).sqrt()
    }
}

/// Where a chunk's padded audio is written.
pub fn chunk_wav_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("chunk{index}.wav"))
}

/// Persist a chunk's padded waveform next to its transcript artifacts.
pub fn write_chunk_wav(chunk: &AudioChunk, output_dir: &Path) -> Result<PathBuf> {
    let path = chunk_wav_path(output_dir, chunk.index);
    chunk.padded.write_wav(&path)?;
    Ok(path)
}
