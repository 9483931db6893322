//! Recognizer and pipeline tests against a mocked transcription endpoint.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vidingest::audio::{AudioTrack, Waveform, AUDIO_FILE_NAME};
use vidingest::classify::Classification;
use vidingest::transcribe::{RecognitionError, SpeechRecognizer, WhisperRecognizer};
use vidingest::{Pipeline, PipelineConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/v1/audio/transcriptions";

fn recognizer(server: &MockServer) -> WhisperRecognizer {
    WhisperRecognizer::new("test-key".to_string())
        .with_url(format!("{}{}", server.uri(), ENDPOINT))
        .with_retry_delay(Duration::from_millis(5))
}

fn speech_like(duration_ms: u32) -> Waveform {
    let rate = 16_000;
    let n = (duration_ms as usize) * rate as usize / 1000;
    let samples = (0..n)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 180.0 * i as f32 / rate as f32).sin())
        .collect();
    Waveform::new(samples, rate)
}

mod whisper_tests {
    use super::*;

    #[tokio::test]
    async fn test_recognize_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  hello world "})))
            .expect(1)
            .mount(&server)
            .await;

        let text = recognizer(&server)
            .recognize(&speech_like(500))
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_blank_text_is_unrecognized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "   "})))
            .expect(1)
            .mount(&server)
            .await;

        let result = recognizer(&server).recognize(&speech_like(500)).await;
        assert_eq!(result, Err(RecognitionError::Unrecognized));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        match recognizer(&server).recognize(&speech_like(500)).await {
            Err(RecognitionError::Service(message)) => {
                assert!(message.contains("401"));
                assert!(message.contains("Incorrect API key"));
            }
            other => panic!("Expected Service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(3)
            .mount(&server)
            .await;

        let result = recognizer(&server).recognize(&speech_like(500)).await;
        assert!(matches!(result, Err(RecognitionError::Service(_))));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "second try"})))
            .expect(1)
            .mount(&server)
            .await;

        let text = recognizer(&server)
            .recognize(&speech_like(500))
            .await
            .unwrap();
        assert_eq!(text, "second try");
    }

    #[tokio::test]
    async fn test_malformed_body_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = recognizer(&server).recognize(&speech_like(500)).await;
        assert!(matches!(result, Err(RecognitionError::Service(_))));
    }
}

mod pipeline_tests {
    use super::*;

    /// Two tone bursts separated by two seconds of silence.
    fn write_track(dir: &std::path::Path) -> AudioTrack {
        let mut samples = speech_like(1000).samples;
        samples.extend(Waveform::silence(2000, 16_000).samples);
        samples.extend(speech_like(1000).samples);
        let path = dir.join(AUDIO_FILE_NAME);
        Waveform::new(samples, 16_000).write_wav(&path).unwrap();
        AudioTrack::open(&path).unwrap()
    }

    #[tokio::test]
    async fn test_track_transcribed_through_whisper() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let track = write_track(dir.path());
        let config = PipelineConfig {
            show_progress: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, Arc::new(recognizer(&server)));

        let transcript = pipeline
            .transcribe_track(&track, dir.path(), &AtomicBool::new(false), None)
            .await
            .unwrap();

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries[0].end, transcript.entries[1].start);
        for entry in &transcript.entries {
            assert_eq!(entry.classification, Classification::Speech);
            assert_eq!(entry.text, "hello");
            assert!(entry.error.is_none());
        }

        let saved: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("transcript.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_service_outage_is_recorded_per_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let track = write_track(dir.path());
        let config = PipelineConfig {
            show_progress: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, Arc::new(recognizer(&server)));

        let transcript = pipeline
            .transcribe_track(&track, dir.path(), &AtomicBool::new(false), None)
            .await
            .unwrap();

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.failures(), 2);
        assert!(transcript.entries[1]
            .error
            .as_deref()
            .unwrap()
            .contains("bad audio"));
    }
}
