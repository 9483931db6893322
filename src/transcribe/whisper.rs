use crate::audio::Waveform;
use crate::config::DEFAULT_WHISPER_URL;
use crate::transcribe::{RecognitionError, SpeechRecognizer};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum upload size accepted by the Whisper API (25 MB).
const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Maximum attempts per chunk.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// Whisper model variants.
#[derive(Debug, Clone, Copy, Default)]
pub enum WhisperModel {
    #[default]
    Whisper1,
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
}

impl WhisperModel {
    fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Whisper1 => "whisper-1",
            WhisperModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            WhisperModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
        }
    }
}

/// How a single request failed.
#[derive(Debug)]
enum CallError {
    /// 4xx: the request itself is wrong, retrying will not help.
    Client(String),
    Transient(String),
}

impl CallError {
    fn into_message(self) -> String {
        match self {
            CallError::Client(m) | CallError::Transient(m) => m,
        }
    }
}

/// Speech recognizer backed by an OpenAI-compatible transcription endpoint.
pub struct WhisperRecognizer {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: WhisperModel,
    language: Option<String>,
    prompt: Option<String>,
    retry_delay: Duration,
}

impl WhisperRecognizer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            url: DEFAULT_WHISPER_URL.to_string(),
            model: WhisperModel::default(),
            language: None,
            prompt: None,
            retry_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    /// Point at a different endpoint, e.g. a self-hosted server.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: WhisperModel) -> Self {
        self.model = model;
        self
    }

    /// Set the source language (ISO 639-1 code).
    pub fn with_language(mut self, language: String) -> Self {
        self.language = Some(language);
        self
    }

    /// Set a prompt for vocabulary hints (max 224 tokens).
    pub fn with_prompt(mut self, prompt: String) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Base delay between attempts; doubles after each failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn build_form(&self, wav: Vec<u8>) -> Result<Form, CallError> {
        let file_part = Part::bytes(wav)
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| CallError::Client(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.as_str())
            .text("response_format", "json");

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        if let Some(ref prompt) = self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        Ok(form)
    }

    async fn call_api(&self, form: Form) -> Result<WhisperResponse, CallError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("Request failed: {e}")))?;

        let status = response.status();
        debug!("Whisper API response status: {}", status);

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| CallError::Transient(format!("Failed to read response: {e}")))?;
            debug!("Whisper API response: {}", truncate(&body, 500));
            return serde_json::from_str(&body)
                .map_err(|e| CallError::Transient(format!("Malformed response: {e}")));
        }

        let error_body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
            Ok(api_error) => format!(
                "Whisper API error ({}): {} ({})",
                status, api_error.error.message, api_error.error.r#type
            ),
            Err(_) => format!("Whisper API error ({}): {}", status, error_body),
        };

        if status.is_client_error() {
            Err(CallError::Client(message))
        } else {
            Err(CallError::Transient(message))
        }
    }

    /// Rebuilds the form on each attempt since sending consumes it.
    async fn recognize_with_retry(&self, wav: &[u8]) -> Result<WhisperResponse, CallError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.pow(attempt - 1);
                debug!("Retry attempt {} after {:?} delay", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let form = self.build_form(wav.to_vec())?;

            match self.call_api(form).await {
                Ok(response) => return Ok(response),
                Err(CallError::Client(message)) => return Err(CallError::Client(message)),
                Err(e) => {
                    warn!("Attempt {} failed: {:?}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CallError::Transient("Unknown error".to_string())))
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn recognize(&self, audio: &Waveform) -> Result<String, RecognitionError> {
        let wav = audio
            .to_wav_bytes()
            .map_err(|e| RecognitionError::Service(format!("Failed to encode audio: {e}")))?;

        if wav.len() > MAX_UPLOAD_SIZE {
            return Err(RecognitionError::Service(format!(
                "Chunk too large for Whisper API: {} bytes (max {} bytes)",
                wav.len(),
                MAX_UPLOAD_SIZE
            )));
        }

        debug!(
            "Sending {:.2}s of audio ({} bytes) to {}",
            audio.duration_secs(),
            wav.len(),
            self.url
        );

        let response = self
            .recognize_with_retry(&wav)
            .await
            .map_err(|e| RecognitionError::Service(e.into_message()))?;

        let text = response.text.trim();
        if text.is_empty() {
            return Err(RecognitionError::Unrecognized);
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    r#type: String,
}
