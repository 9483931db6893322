pub mod assemble;
pub mod whisper;

pub use assemble::{Transcript, TranscriptAssembler, TRANSCRIPT_FILE_NAME};
pub use whisper::WhisperRecognizer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::audio::{AudioChunk, Waveform};
use crate::classify::Classification;
use crate::error::{IngestError, Result};

/// Error marker recorded when the recognizer heard speech but produced no text.
pub const UNRECOGNIZED_MESSAGE: &str = "Could not understand audio";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Expected outcome for mumbled or noisy speech.
    #[error("Could not understand audio")]
    Unrecognized,

    #[error("Recognition service error: {0}")]
    Service(String),
}

/// Speech-to-text capability.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio: &Waveform) -> std::result::Result<String, RecognitionError>;
    fn name(&self) -> &'static str;
}

/// One time span of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptEntry {
    pub fn new(chunk: &AudioChunk, classification: Classification, text: String) -> Self {
        Self {
            start: chunk.start,
            end: chunk.end(),
            text,
            classification,
            error: None,
        }
    }

    pub fn unrecognized(chunk: &AudioChunk) -> Self {
        Self::failed(chunk, Classification::Speech, UNRECOGNIZED_MESSAGE.to_string())
    }

    /// An entry whose text could not be produced; the span is still recorded.
    pub fn failed(chunk: &AudioChunk, classification: Classification, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(chunk, classification, String::new())
        }
    }
}

/// Turns classified chunks into transcript entries, calling the recognizer
/// only for speech.
#[derive(Clone)]
pub struct Transcriber {
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl Transcriber {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn recognizer_name(&self) -> &'static str {
        self.recognizer.name()
    }

    /// Service failures come back as `RecognitionService` for the caller to
    /// record; an unintelligible chunk is a normal entry with an error marker.
    pub async fn transcribe(
        &self,
        chunk: &AudioChunk,
        classification: Classification,
    ) -> Result<TranscriptEntry> {
        if classification != Classification::Speech {
            info!(
                "Skipping transcription for chunk {} classified as {}",
                chunk.index, classification
            );
            return Ok(TranscriptEntry::new(chunk, classification, String::new()));
        }

        match self.recognizer.recognize(&chunk.padded).await {
            Ok(text) => {
                info!("Transcription for chunk {}: {}", chunk.index, text);
                Ok(TranscriptEntry::new(chunk, classification, text))
            }
            Err(RecognitionError::Unrecognized) => {
                info!("Error for chunk {}: {}", chunk.index, UNRECOGNIZED_MESSAGE);
                Ok(TranscriptEntry::unrecognized(chunk))
            }
            Err(RecognitionError::Service(message)) => Err(IngestError::RecognitionService {
                chunk: chunk.index,
                message,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned results and counts calls.
    pub(crate) struct ScriptedRecognizer {
        results: Vec<std::result::Result<String, RecognitionError>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedRecognizer {
        pub(crate) fn new(results: Vec<std::result::Result<String, RecognitionError>>) -> Self {
            Self {
                results,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            _audio: &Waveform,
        ) -> std::result::Result<String, RecognitionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .get(n % self.results.len().max(1))
                .cloned()
                .unwrap_or(Err(RecognitionError::Unrecognized))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn chunk() -> AudioChunk {
        AudioChunk {
            index: 2,
            start: 1.5,
            duration: 2.0,
            padded: Waveform::silence(100, 16000),
        }
    }

    #[tokio::test]
    async fn test_non_speech_skips_recognizer() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("ignored".to_string())]));
        let transcriber = Transcriber::new(recognizer.clone());

        let entry = transcriber
            .transcribe(&chunk(), Classification::Music)
            .await
            .unwrap();

        assert_eq!(entry.text, "");
        assert!(entry.error.is_none());
        assert_eq!(entry.classification, Classification::Music);
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_speech_success() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("hello".to_string())]));
        let transcriber = Transcriber::new(recognizer);

        let entry = transcriber
            .transcribe(&chunk(), Classification::Speech)
            .await
            .unwrap();

        assert_eq!(entry.text, "hello");
        assert!(entry.error.is_none());
        assert_eq!(entry.start, 1.5);
        assert_eq!(entry.end, 3.5);
    }

    #[tokio::test]
    async fn test_speech_unrecognized_is_recorded() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Err(
            RecognitionError::Unrecognized,
        )]));
        let transcriber = Transcriber::new(recognizer);

        let entry = transcriber
            .transcribe(&chunk(), Classification::Speech)
            .await
            .unwrap();

        assert_eq!(entry.text, "");
        assert_eq!(entry.error.as_deref(), Some(UNRECOGNIZED_MESSAGE));
    }

    #[tokio::test]
    async fn test_service_failure_names_chunk() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Err(
            RecognitionError::Service("503".to_string()),
        )]));
        let transcriber = Transcriber::new(recognizer);

        let result = transcriber.transcribe(&chunk(), Classification::Speech).await;
        match result {
            Err(IngestError::RecognitionService { chunk, message }) => {
                assert_eq!(chunk, 2);
                assert_eq!(message, "503");
            }
            other => panic!("Expected RecognitionService, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_json_shape() {
        let ok = TranscriptEntry::new(&chunk(), Classification::Speech, "hi".to_string());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["start"], 1.5);
        assert_eq!(json["end"], 3.5);
        assert_eq!(json["text"], "hi");
        assert_eq!(json["classification"], "Speech");
        assert!(json.get("error").is_none());

        let failed = TranscriptEntry::unrecognized(&chunk());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], UNRECOGNIZED_MESSAGE);
    }
}
