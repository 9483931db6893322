//! Offline sample-rate conversion with a rubato `FastFixedIn` resampler.
//!
//! Classification thresholds assume a fixed analysis rate, so every chunk is
//! brought to [`ANALYSIS_SAMPLE_RATE`] before feature extraction regardless of
//! the rate the audio was extracted at.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{IngestError, Result};

use super::Waveform;

/// Rate the classifier's features are computed at.
pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;

/// Input frames handed to rubato per call.
const CHUNK_SIZE: usize = 1024;

/// Convert a waveform to `target_rate`. Same-rate input is returned as-is.
pub fn resample(waveform: &Waveform, target_rate: u32) -> Result<Waveform> {
    if waveform.sample_rate == target_rate || waveform.is_empty() {
        return Ok(Waveform::new(waveform.samples.clone(), target_rate));
    }

    let ratio = target_rate as f64 / waveform.sample_rate as f64;
    let expected = (waveform.len() as f64 * ratio).round() as usize;

    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK_SIZE, 1)
            .map_err(|e| IngestError::Resample(format!("resampler init: {e}")))?;

    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let samples = &waveform.samples;
    let mut pos = 0;

    while samples.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let input: &[&[f32]] = &[&samples[pos..pos + needed]];
        let block = resampler
            .process(input, None)
            .map_err(|e| IngestError::Resample(e.to_string()))?;
        output.extend_from_slice(&block[0]);
        pos += needed;
    }

    if pos < samples.len() {
        let tail: &[&[f32]] = &[&samples[pos..]];
        let block = resampler
            .process_partial(Some(tail), None)
            .map_err(|e| IngestError::Resample(e.to_string()))?;
        output.extend_from_slice(&block[0]);
    }

    // Flush until the delayed tail has come out.
    while output.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| IngestError::Resample(e.to_string()))?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    let mut samples: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    samples.resize(expected, 0.0);

    Ok(Waveform::new(samples, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_passthrough_at_analysis_rate() {
        let wave = Waveform::new(vec![0.1, 0.2, 0.3], ANALYSIS_SAMPLE_RATE);
        let out = resample(&wave, ANALYSIS_SAMPLE_RATE).unwrap();
        assert_eq!(out, wave);
    }

    #[test]
    fn test_downsample_length() {
        let wave = Waveform::new(vec![0.0; 44_100], 44_100);
        let out = resample(&wave, ANALYSIS_SAMPLE_RATE).unwrap();
        assert_eq!(out.sample_rate, ANALYSIS_SAMPLE_RATE);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn test_short_input() {
        let wave = Waveform::new(vec![0.5; 100], 48_000);
        let out = resample(&wave, ANALYSIS_SAMPLE_RATE).unwrap();
        assert_eq!(out.len(), 33);
    }

    #[test]
    fn test_tone_energy_preserved() {
        let n = 48_000;
        let samples: Vec<f32> = (0..n)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / 48_000.0).sin())
            .collect();
        let wave = Waveform::new(samples, 48_000);
        let out = resample(&wave, ANALYSIS_SAMPLE_RATE).unwrap();

        let ratio = out.rms() / wave.rms();
        assert!((ratio - 1.0).abs() < 0.05, "rms ratio {ratio}");
    }
}
