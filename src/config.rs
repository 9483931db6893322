use crate::audio::ChunkerConfig;
use crate::classify::ClassifierThresholds;
use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default OpenAI transcription endpoint.
pub const DEFAULT_WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub whisper_url: String,
    /// Root under which `frames/<id>` and `audio/<id>` are created.
    pub output_root: PathBuf,
    pub frames_per_second: u32,
    /// Pause before the single retry of a failed frame write.
    pub frame_write_backoff_ms: u64,
    pub chunker: ChunkerConfig,
    pub classifier: ClassifierThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            whisper_url: DEFAULT_WHISPER_URL.to_string(),
            output_root: PathBuf::from("."),
            frames_per_second: 1,
            frame_write_backoff_ms: 100,
            chunker: ChunkerConfig::default(),
            classifier: ClassifierThresholds::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = Self::from_toml(&contents)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| IngestError::Config(format!("Invalid config file: {e}")))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("VIDINGEST_WHISPER_URL") {
            self.whisper_url = url;
        }
        if let Ok(root) = std::env::var("VIDINGEST_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(root);
        }
        if let Ok(fps) = std::env::var("VIDINGEST_FPS") {
            if let Ok(f) = fps.parse() {
                self.frames_per_second = f;
            }
        }
    }

    /// Check settings. `needs_recognizer` is false when a caller injects its own recognizer.
    pub fn validate(&self, needs_recognizer: bool) -> Result<()> {
        if needs_recognizer && self.openai_api_key.is_none() {
            return Err(IngestError::Config(
                "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
            ));
        }

        if self.frames_per_second == 0 {
            return Err(IngestError::Config(
                "frames_per_second must be greater than 0".to_string(),
            ));
        }

        if self.chunker.min_silence_ms == 0 {
            return Err(IngestError::Config(
                "chunker.min_silence_ms must be greater than 0".to_string(),
            ));
        }

        if self.chunker.seek_step_ms == 0 {
            return Err(IngestError::Config(
                "chunker.seek_step_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vidingest").join("config.toml"))
    }
}
