pub mod features;

pub use features::{ChunkFeatures, N_MFCC};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audio::AudioChunk;
use crate::error::Result;

/// What a chunk of audio mostly contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Silence,
    Music,
    Speech,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Silence => write!(f, "Silence"),
            Classification::Music => write!(f, "Music"),
            Classification::Speech => write!(f, "Speech"),
        }
    }
}

/// Hand-tuned decision thresholds. Silence is checked before Music; anything
/// else is Speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub silence_zcr: f64,
    pub silence_centroid: f64,
    pub silence_contrast: f64,
    pub silence_tonnetz: f64,
    pub silence_rms: f64,
    pub music_zcr: f64,
    pub music_centroid: f64,
    pub music_chroma: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            silence_zcr: 0.03,
            silence_centroid: 1500.0,
            silence_contrast: 20.0,
            silence_tonnetz: 0.1,
            silence_rms: 0.01,
            music_zcr: 0.1,
            music_centroid: 2000.0,
            music_chroma: 0.4,
        }
    }
}

impl ClassifierThresholds {
    pub fn decide(&self, f: &ChunkFeatures) -> Classification {
        if f.zcr < self.silence_zcr
            && f.spectral_centroid < self.silence_centroid
            && f.spectral_contrast < self.silence_contrast
            && f.tonnetz < self.silence_tonnetz
            && f.rms < self.silence_rms
        {
            Classification::Silence
        } else if f.zcr > self.music_zcr
            && f.spectral_centroid > self.music_centroid
            && f.chroma > self.music_chroma
        {
            Classification::Music
        } else {
            Classification::Speech
        }
    }
}

/// Labels chunks from their spectral features. Stateless apart from its
/// thresholds.
#[derive(Debug, Clone, Default)]
pub struct ChunkClassifier {
    thresholds: ClassifierThresholds,
}

impl ChunkClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    pub fn classify(&self, chunk: &AudioChunk) -> Result<Classification> {
        let features = ChunkFeatures::from_waveform(&chunk.padded)?;

        info!(
            "Features for chunk {} - ZCR: {:.4}, Spectral Centroid: {:.1}, Spectral Contrast: {:.2}, \
             Tonnetz: {:.4}, Chroma: {:.4}, MFCC: {:.2?}, RMS: {:.5}",
            chunk.index,
            features.zcr,
            features.spectral_centroid,
            features.spectral_contrast,
            features.tonnetz,
            features.chroma,
            features.mfcc,
            features.rms
        );

        let classification = self.thresholds.decide(&features);
        info!("Classification for chunk {}: {}", chunk.index, classification);
        Ok(classification)
    }
}
