//! Short-time spectral and temporal features of an audio chunk.
//!
//! All features are averaged over frames of `min(512, len)` samples with a
//! half-frame hop, computed at [`ANALYSIS_SAMPLE_RATE`].

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::Serialize;

use crate::audio::{resample, Waveform, ANALYSIS_SAMPLE_RATE};
use crate::error::Result;

pub const N_MFCC: usize = 13;

const MAX_FRAME: usize = 512;
const N_MELS: usize = 40;
const N_CHROMA: usize = 12;

const CONTRAST_FMIN: f64 = 200.0;
const CONTRAST_MAX_BANDS: usize = 6;
const CONTRAST_QUANTILE: f64 = 0.02;

const CHROMA_CENTER_OCTAVE: f64 = 5.0;
const CHROMA_OCTAVE_WIDTH: f64 = 2.0;

const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkFeatures {
    pub zcr: f64,
    /// Hz.
    pub spectral_centroid: f64,
    /// dB.
    pub spectral_contrast: f64,
    pub tonnetz: f64,
    pub chroma: f64,
    pub mfcc: [f64; N_MFCC],
    pub rms: f64,
}

impl ChunkFeatures {
    /// Resample to the analysis rate, then compute.
    pub fn from_waveform(waveform: &Waveform) -> Result<Self> {
        let analysis = resample(waveform, ANALYSIS_SAMPLE_RATE)?;
        Ok(Self::compute(&analysis.samples, analysis.sample_rate))
    }

    /// Compute features of samples already at `sample_rate`.
    pub fn compute(samples: &[f32], sample_rate: u32) -> Self {
        if samples.is_empty() || sample_rate == 0 {
            return Self::default();
        }

        let n_fft = samples.len().min(MAX_FRAME);
        let hop = (n_fft / 2).max(1);
        let samples: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

        let spec = Spectrogram::compute(&samples, n_fft, hop, sample_rate);
        let chroma = chroma_frames(&spec);

        Self {
            zcr: zero_crossing_rate(&samples, n_fft, hop),
            spectral_centroid: spectral_centroid(&spec),
            spectral_contrast: spectral_contrast(&spec),
            tonnetz: tonnetz(&chroma),
            chroma: mean(chroma.iter().flatten().copied()),
            mfcc: mfcc(&spec),
            rms: rms(&samples, n_fft, hop),
        }
    }
}

/// Magnitude spectrogram, one row per frame.
struct Spectrogram {
    frames: Vec<Vec<f64>>,
    freqs: Vec<f64>,
    n_fft: usize,
    sample_rate: u32,
}

impl Spectrogram {
    fn compute(samples: &[f64], n_fft: usize, hop: usize, sample_rate: u32) -> Self {
        let padded = pad_center(samples, n_fft / 2, PadMode::Zero);
        let window = hann_window(n_fft);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);
        let n_bins = n_fft / 2 + 1;

        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        let frames: Vec<Vec<f64>> = frame_slices(&padded, n_fft, hop)
            .map(|frame| {
                for (slot, (&s, &w)) in buffer.iter_mut().zip(frame.iter().zip(&window)) {
                    *slot = Complex::new(s * w, 0.0);
                }
                fft.process(&mut buffer);
                buffer[..n_bins].iter().map(|c| c.norm()).collect::<Vec<f64>>()
            })
            .collect();

        let freqs = (0..n_bins)
            .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
            .collect();

        Self {
            frames,
            freqs,
            n_fft,
            sample_rate,
        }
    }
}

#[derive(Clone, Copy)]
enum PadMode {
    Zero,
    Edge,
}

fn pad_center(samples: &[f64], pad: usize, mode: PadMode) -> Vec<f64> {
    let (head, tail) = match mode {
        PadMode::Zero => (0.0, 0.0),
        PadMode::Edge => (samples[0], samples[samples.len() - 1]),
    };
    let mut padded = Vec::with_capacity(samples.len() + 2 * pad);
    padded.extend(std::iter::repeat(head).take(pad));
    padded.extend_from_slice(samples);
    padded.extend(std::iter::repeat(tail).take(pad));
    padded
}

fn frame_slices(padded: &[f64], n_fft: usize, hop: usize) -> impl Iterator<Item = &[f64]> {
    let count = 1 + padded.len().saturating_sub(n_fft) / hop;
    (0..count).map(move |i| &padded[i * hop..i * hop + n_fft])
}

fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos()))
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn power_to_db(x: f64) -> f64 {
    10.0 * x.max(AMIN).log10()
}

fn zero_crossing_rate(samples: &[f64], n_fft: usize, hop: usize) -> f64 {
    let padded = pad_center(samples, n_fft / 2, PadMode::Edge);
    let negative = |x: f64| x.abs() > AMIN && x < 0.0;

    mean(frame_slices(&padded, n_fft, hop).map(|frame| {
        let crossings = frame
            .windows(2)
            .filter(|pair| negative(pair[0]) != negative(pair[1]))
            .count();
        crossings as f64 / n_fft as f64
    }))
}

fn rms(samples: &[f64], n_fft: usize, hop: usize) -> f64 {
    let padded = pad_center(samples, n_fft / 2, PadMode::Zero);
    mean(frame_slices(&padded, n_fft, hop).map(|frame| {
        (frame.iter().map(|s| s * s).sum::<f64>() / n_fft as f64).sqrt()
    }))
}

fn spectral_centroid(spec: &Spectrogram) -> f64 {
    mean(spec.frames.iter().map(|mags| {
        let total: f64 = mags.iter().sum();
        if total == 0.0 {
            return 0.0;
        }
        mags.iter().zip(&spec.freqs).map(|(m, f)| m * f).sum::<f64>() / total
    }))
}

/// Octave-band peak/valley difference, limited to bands below Nyquist.
fn spectral_contrast(spec: &Spectrogram) -> f64 {
    let nyquist = spec.sample_rate as f64 / 2.0;
    let mut n_bands = 0;
    while n_bands < CONTRAST_MAX_BANDS && CONTRAST_FMIN * 2f64.powi(n_bands as i32 + 1) < nyquist {
        n_bands += 1;
    }

    let mut edges = vec![0.0];
    edges.extend((0..=n_bands).map(|k| CONTRAST_FMIN * 2f64.powi(k as i32)));

    let bands: Vec<Vec<usize>> = (0..=n_bands)
        .filter_map(|k| {
            let (lo, hi) = (edges[k], edges[k + 1]);
            let mut bins: Vec<usize> = spec
                .freqs
                .iter()
                .enumerate()
                .filter(|&(_, &f)| f >= lo && f <= hi)
                .map(|(i, _)| i)
                .collect();
            let &first = bins.first()?;
            if k > 0 && first > 0 {
                bins.insert(0, first - 1);
            }
            if k == n_bands {
                let last = bins[bins.len() - 1];
                bins.extend(last + 1..spec.freqs.len());
            } else {
                bins.pop();
            }
            (!bins.is_empty()).then_some(bins)
        })
        .collect();

    mean(spec.frames.iter().flat_map(|mags| {
        bands.iter().map(move |bins| {
            let mut values: Vec<f64> = bins.iter().map(|&i| mags[i]).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            let q = ((CONTRAST_QUANTILE * values.len() as f64).round() as usize).max(1);
            let valley = values[..q].iter().sum::<f64>() / q as f64;
            let peak = values[values.len() - q..].iter().sum::<f64>() / q as f64;
            power_to_db(peak) - power_to_db(valley)
        })
    }))
}

/// Per-frame chroma, each frame scaled so its strongest pitch class is 1.
fn chroma_frames(spec: &Spectrogram) -> Vec<[f64; N_CHROMA]> {
    let weights: Vec<Option<(usize, f64)>> = spec
        .freqs
        .iter()
        .map(|&f| {
            if f <= 0.0 {
                return None;
            }
            let midi = 69.0 + 12.0 * (f / 440.0).log2();
            let class = (midi.round() as i64).rem_euclid(N_CHROMA as i64) as usize;
            let octave = midi / 12.0 - 1.0;
            let weight =
                (-0.5 * ((octave - CHROMA_CENTER_OCTAVE) / CHROMA_OCTAVE_WIDTH).powi(2)).exp();
            Some((class, weight))
        })
        .collect();

    spec.frames
        .iter()
        .map(|mags| {
            let mut chroma = [0.0; N_CHROMA];
            for (m, w) in mags.iter().zip(&weights) {
                if let Some((class, weight)) = w {
                    chroma[*class] += weight * m * m;
                }
            }
            let max = chroma.iter().copied().fold(0.0, f64::max);
            if max > 0.0 {
                chroma.iter_mut().for_each(|c| *c /= max);
            }
            chroma
        })
        .collect()
}

/// Mean of the six tonal-centroid coordinates over all frames.
fn tonnetz(chroma: &[[f64; N_CHROMA]]) -> f64 {
    let phi: Vec<[f64; N_CHROMA]> = [
        (1.0, 7.0 * PI / 6.0),
        (1.0, 3.0 * PI / 2.0),
        (0.5, 2.0 * PI / 3.0),
    ]
    .iter()
    .flat_map(|&(r, angle)| {
        let sin = std::array::from_fn(|l| r * (l as f64 * angle).sin());
        let cos = std::array::from_fn(|l| r * (l as f64 * angle).cos());
        [sin, cos]
    })
    .collect();

    mean(chroma.iter().flat_map(|frame| {
        let total: f64 = frame.iter().sum();
        let phi = &phi;
        phi.iter().map(move |basis| {
            if total == 0.0 {
                return 0.0;
            }
            basis.iter().zip(frame).map(|(b, c)| b * c / total).sum::<f64>()
        })
    }))
}

fn mfcc(spec: &Spectrogram) -> [f64; N_MFCC] {
    let filters = mel_filters(spec.n_fft, spec.sample_rate, N_MELS);

    let mut log_mel: Vec<[f64; N_MELS]> = spec
        .frames
        .iter()
        .map(|mags| {
            std::array::from_fn(|m| {
                let energy: f64 = filters[m].iter().zip(mags).map(|(w, s)| w * s * s).sum();
                power_to_db(energy)
            })
        })
        .collect();

    let floor = log_mel
        .iter()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
        - TOP_DB;
    log_mel
        .iter_mut()
        .flatten()
        .for_each(|v| *v = v.max(floor));

    let mut coeffs = [0.0; N_MFCC];
    for frame in &log_mel {
        for (n, c) in coeffs.iter_mut().enumerate() {
            let scale = if n == 0 {
                (1.0 / N_MELS as f64).sqrt()
            } else {
                (2.0 / N_MELS as f64).sqrt()
            };
            *c += scale
                * frame
                    .iter()
                    .enumerate()
                    .map(|(m, x)| x * (PI / N_MELS as f64 * (m as f64 + 0.5) * n as f64).cos())
                    .sum::<f64>();
        }
    }
    if !log_mel.is_empty() {
        coeffs.iter_mut().for_each(|c| *c /= log_mel.len() as f64);
    }
    coeffs
}

fn mel_filters(n_fft: usize, sample_rate: u32, n_mels: usize) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);
    let hz_pts: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
            let enorm = 2.0 / (upper - lower).max(AMIN);
            (0..n_bins)
                .map(|k| {
                    let f = k as f64 * sample_rate as f64 / n_fft as f64;
                    let rising = (f - lower) / (center - lower).max(AMIN);
                    let falling = (upper - f) / (upper - center).max(AMIN);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RATE: u32 = ANALYSIS_SAMPLE_RATE;

    fn sine(freq: f64, amplitude: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f64 / RATE as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_silence_features_are_zero() {
        let features = ChunkFeatures::compute(&vec![0.0; 8000], RATE);
        assert_eq!(features.zcr, 0.0);
        assert_eq!(features.spectral_centroid, 0.0);
        assert_eq!(features.spectral_contrast, 0.0);
        assert_eq!(features.tonnetz, 0.0);
        assert_eq!(features.chroma, 0.0);
        assert_eq!(features.rms, 0.0);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(ChunkFeatures::compute(&[], RATE), ChunkFeatures::default());
    }

    #[test]
    fn test_sine_centroid_near_frequency() {
        let features = ChunkFeatures::compute(&sine(1000.0, 0.5, 16000), RATE);
        assert!(
            (features.spectral_centroid - 1000.0).abs() < 100.0,
            "centroid {}",
            features.spectral_centroid
        );
    }

    #[test]
    fn test_sine_zcr() {
        // A 1 kHz tone crosses zero twice per cycle: 2000 / 16000.
        let features = ChunkFeatures::compute(&sine(1000.0, 0.5, 16000), RATE);
        assert_relative_eq!(features.zcr, 0.125, epsilon = 0.01);
    }

    #[test]
    fn test_sine_rms() {
        let features = ChunkFeatures::compute(&sine(440.0, 0.5, 16000), RATE);
        assert_relative_eq!(features.rms, 0.5 / 2f64.sqrt(), epsilon = 0.01);
    }

    #[test]
    fn test_chroma_bounded() {
        let features = ChunkFeatures::compute(&sine(440.0, 0.5, 16000), RATE);
        assert!(features.chroma > 0.0 && features.chroma <= 1.0);
    }

    #[test]
    fn test_short_chunk_uses_whole_length_frame() {
        let features = ChunkFeatures::compute(&sine(2000.0, 0.5, 64), RATE);
        assert!(features.rms > 0.0);
        assert!(features.mfcc.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_from_waveform_resamples() {
        let n = 44_100;
        let samples: Vec<f32> = (0..n)
            .map(|i| (0.5 * (2.0 * PI * 1000.0 * i as f64 / 44_100.0).sin()) as f32)
            .collect();
        let features = ChunkFeatures::from_waveform(&Waveform::new(samples, 44_100)).unwrap();
        assert!((features.spectral_centroid - 1000.0).abs() < 150.0);
    }

    #[test]
    fn test_mel_roundtrip() {
        for hz in [100.0, 999.0, 1000.0, 4000.0] {
            assert_relative_eq!(mel_to_hz(hz_to_mel(hz)), hz, epsilon = 1e-6);
        }
    }
}
