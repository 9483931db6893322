use crate::audio::{extract_audio, split, write_chunk_wav, AudioTrack, ChunkerConfig};
use crate::classify::{ChunkClassifier, Classification, ClassifierThresholds};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::store::{ingest_frames, IngestConfig, VectorStore};
use crate::transcribe::{
    SpeechRecognizer, Transcriber, Transcript, TranscriptAssembler, TranscriptEntry,
    WhisperRecognizer,
};
use crate::video::{FfmpegDecoder, FrameSampler, FrameStats, JpegFrameWriter};
use crate::vision::{run_vision, Detector, FeatureExtractor, VisionStats};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// Settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames kept per second of video.
    pub target_fps: u32,
    /// Root under which `frames/<id>` and `audio/<id>` are created.
    pub output_root: PathBuf,
    pub frame_write_backoff: Duration,
    pub chunker: ChunkerConfig,
    pub thresholds: ClassifierThresholds,
    pub ingest: IngestConfig,
    /// Show progress bars.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 1,
            output_root: PathBuf::from("."),
            frame_write_backoff: Duration::from_millis(100),
            chunker: ChunkerConfig::default(),
            thresholds: ClassifierThresholds::default(),
            ingest: IngestConfig::default(),
            show_progress: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_fps: config.frames_per_second,
            output_root: config.output_root.clone(),
            frame_write_backoff: Duration::from_millis(config.frame_write_backoff_ms),
            chunker: config.chunker.clone(),
            thresholds: config.classifier.clone(),
            ..Default::default()
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug)]
pub struct IngestReport {
    pub upload_id: String,
    pub frames_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub frames: FrameStats,
    pub transcript: Transcript,
    pub vision: Option<VisionStats>,
    pub ingested_records: Option<usize>,
    pub elapsed: Duration,
}

/// Optional object detection and embedding over the sampled frames.
#[derive(Clone)]
pub struct VisionStage {
    pub detector: Arc<dyn Detector>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub store: Option<Arc<dyn VectorStore>>,
}

/// Removes a run's output directories unless disarmed.
struct OutputCleanupGuard {
    dirs: Vec<PathBuf>,
    armed: bool,
}

impl OutputCleanupGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OutputCleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for dir in &self.dirs {
            if !dir.exists() {
                continue;
            }
            warn!("Removing partial output: {:?}", dir);
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!("Failed to remove {:?}: {}", dir, e);
            }
        }
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(IngestError::Cancelled);
    }
    Ok(())
}

/// Run the blocking frame branch and the audio branch side by side.
///
/// A frame branch error sets `cancelled` so the audio branch stops before its
/// next chunk instead of transcribing output that is about to be discarded.
/// When both fail, the frame branch's error wins.
async fn join_branches<F, A>(
    frame_branch: F,
    audio_branch: A,
    cancelled: &Arc<AtomicBool>,
) -> Result<(FrameStats, Transcript)>
where
    F: FnOnce() -> Result<FrameStats> + Send + 'static,
    A: Future<Output = Result<Transcript>>,
{
    let frame_task = {
        let cancelled = cancelled.clone();
        tokio::task::spawn_blocking(move || {
            let result = frame_branch();
            if let Err(e) = &result {
                warn!("Frame branch failed, stopping the audio branch: {}", e);
                cancelled.store(true, Ordering::SeqCst);
            }
            result
        })
    };

    let (frame_result, audio_result) = tokio::join!(frame_task, audio_branch);
    let frame_result = frame_result
        .map_err(|e| IngestError::Task(format!("frame extraction panicked: {e}")))
        .and_then(|r| r);

    if let Err(e) = &audio_result {
        warn!("Audio branch failed: {}", e);
    }

    Ok((frame_result?, audio_result?))
}

fn spinner(mp: Option<&MultiProgress>, message: &'static str) -> Option<ProgressBar> {
    mp.map(|mp| {
        let pb = mp.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    })
}

fn bar(mp: Option<&MultiProgress>, len: u64, prefix: &'static str) -> Option<ProgressBar> {
    mp.map(|mp| {
        let pb = mp.add(ProgressBar::new(len));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:>8} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_prefix(prefix);
        pb
    })
}

/// Upload identity: the video's file stem.
pub fn upload_id(video: &Path) -> Result<String> {
    video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IngestError::SourceUnavailable {
            path: video.to_path_buf(),
            reason: "path has no file name".to_string(),
        })
}

/// Sample frames from `video` into `frames_dir`. Blocking.
pub fn run_frame_branch(
    video: &Path,
    frames_dir: &Path,
    target_fps: u32,
    backoff: Duration,
    progress: Option<ProgressBar>,
) -> Result<FrameStats> {
    let decoder = FfmpegDecoder::open(video)?;
    let mut sampler = FrameSampler::new(JpegFrameWriter::default()).with_retry_backoff(backoff);
    if let Some(pb) = &progress {
        sampler = sampler.with_progress(pb.clone());
    }
    let stats = sampler.extract_frames(decoder, target_fps, frames_dir)?;
    if let Some(pb) = progress {
        pb.finish_with_message(format!("✓ {} frames saved", stats.written));
    }
    Ok(stats)
}

/// Frame sampling and the chunk/classify/transcribe chain for one video.
pub struct Pipeline {
    config: PipelineConfig,
    classifier: ChunkClassifier,
    transcriber: Transcriber,
    vision: Option<VisionStage>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            classifier: ChunkClassifier::new(config.thresholds.clone()),
            transcriber: Transcriber::new(recognizer),
            config,
            vision: None,
        }
    }

    /// Build a pipeline using the Whisper recognizer from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.openai_api_key.clone().ok_or_else(|| {
            IngestError::Config(
                "OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string(),
            )
        })?;
        let recognizer = WhisperRecognizer::new(api_key).with_url(config.whisper_url.clone());
        Ok(Self::new(
            PipelineConfig::from_config(config),
            Arc::new(recognizer),
        ))
    }

    pub fn with_vision(mut self, vision: VisionStage) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn without_progress(mut self) -> Self {
        self.config.show_progress = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn frames_dir(&self, upload_id: &str) -> PathBuf {
        self.config.output_root.join("frames").join(upload_id)
    }

    pub fn audio_dir(&self, upload_id: &str) -> PathBuf {
        self.config.output_root.join("audio").join(upload_id)
    }

    /// Run both branches for `video`.
    ///
    /// On any fatal error, or when `cancelled` is set, both output
    /// directories are removed. A frame branch failure stops the audio
    /// branch early and its error is the one returned.
    pub async fn ingest_video(
        &self,
        video: &Path,
        cancelled: Arc<AtomicBool>,
    ) -> Result<IngestReport> {
        let start_time = Instant::now();

        if !video.exists() {
            return Err(IngestError::SourceUnavailable {
                path: video.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }

        let upload_id = upload_id(video)?;
        let frames_dir = self.frames_dir(&upload_id);
        let audio_dir = self.audio_dir(&upload_id);

        let span = info_span!("ingest", upload = %upload_id);

        check_cancelled(&cancelled)?;
        let guard = OutputCleanupGuard {
            dirs: vec![frames_dir.clone(), audio_dir.clone()],
            armed: true,
        };
        std::fs::create_dir_all(&frames_dir)?;
        std::fs::create_dir_all(&audio_dir)?;

        let multi_progress = self.config.show_progress.then(MultiProgress::new);

        info!(
            "Ingesting {} as '{}' at {} fps",
            video.display(),
            upload_id,
            self.config.target_fps
        );

        let frame_branch = {
            let video = video.to_path_buf();
            let frames_dir = frames_dir.clone();
            let fps = self.config.target_fps;
            let backoff = self.config.frame_write_backoff;
            let pb = bar(multi_progress.as_ref(), 0, "frames");
            let span = span.clone();
            move || {
                let _enter = span.enter();
                run_frame_branch(&video, &frames_dir, fps, backoff, pb)
            }
        };

        let audio_branch = self
            .run_audio_branch(video, &audio_dir, &cancelled, multi_progress.as_ref())
            .instrument(span.clone());

        let (frames, transcript) = join_branches(frame_branch, audio_branch, &cancelled).await?;
        check_cancelled(&cancelled)?;

        let (vision, ingested_records) = match &self.vision {
            Some(stage) => {
                let (stats, records) = self
                    .run_vision_stage(stage, &frames_dir, multi_progress.as_ref())
                    .instrument(span.clone())
                    .await?;
                (Some(stats), records)
            }
            None => (None, None),
        };
        check_cancelled(&cancelled)?;

        guard.disarm();

        Ok(IngestReport {
            upload_id,
            frames_dir,
            audio_dir,
            frames,
            transcript,
            vision,
            ingested_records,
            elapsed: start_time.elapsed(),
        })
    }

    /// Extract the audio track of `video` and transcribe it into `audio_dir`.
    pub async fn run_audio_branch(
        &self,
        video: &Path,
        audio_dir: &Path,
        cancelled: &AtomicBool,
        progress: Option<&MultiProgress>,
    ) -> Result<Transcript> {
        let extraction_pb = spinner(progress, "Extracting audio...");
        let extraction_start = Instant::now();

        let track = extract_audio(video, audio_dir).await?;

        if let Some(pb) = extraction_pb {
            pb.finish_with_message(format!("✓ Audio extracted ({:.1}s)", track.duration_secs()));
        }
        info!(
            "Audio extraction complete: {:.1}s duration in {:.2}s",
            track.duration_secs(),
            extraction_start.elapsed().as_secs_f64()
        );

        check_cancelled(cancelled)?;
        self.transcribe_track(&track, audio_dir, cancelled, progress)
            .await
    }

    /// Split, classify and transcribe an extracted track, one chunk at a time.
    ///
    /// A recognition service failure is recorded on that chunk's entry and
    /// processing moves on to the next chunk.
    pub async fn transcribe_track(
        &self,
        track: &AudioTrack,
        audio_dir: &Path,
        cancelled: &AtomicBool,
        progress: Option<&MultiProgress>,
    ) -> Result<Transcript> {
        let chunks = split(track, &self.config.chunker)?;

        let assembler = TranscriptAssembler::new(audio_dir);
        let pb = bar(progress, chunks.len() as u64, "chunks");
        let mut entries = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            check_cancelled(cancelled)?;

            write_chunk_wav(chunk, audio_dir)?;
            let classification = self.classifier.classify(chunk)?;

            let entry = match self.transcriber.transcribe(chunk, classification).await {
                Ok(entry) => entry,
                Err(IngestError::RecognitionService { chunk: index, message }) => {
                    warn!(
                        "{} failed on chunk {}: {}",
                        self.transcriber.recognizer_name(),
                        index,
                        message
                    );
                    TranscriptEntry::failed(chunk, classification, message)
                }
                Err(e) => return Err(e),
            };

            assembler.persist_entry(chunk.index, &entry)?;
            entries.push(entry);

            if let Some(pb) = &pb {
                pb.set_message(classification.to_string());
                pb.inc(1);
            }
        }

        let transcript = assembler.assemble(entries)?;

        if let Some(pb) = pb {
            pb.finish_with_message(format!(
                "✓ {} speech / {} music / {} silence",
                transcript.count(Classification::Speech),
                transcript.count(Classification::Music),
                transcript.count(Classification::Silence)
            ));
        }

        Ok(transcript)
    }

    async fn run_vision_stage(
        &self,
        stage: &VisionStage,
        frames_dir: &Path,
        progress: Option<&MultiProgress>,
    ) -> Result<(VisionStats, Option<usize>)> {
        let pb = spinner(progress, "Detecting objects...");

        let stats = {
            let frames_dir = frames_dir.to_path_buf();
            let detector = stage.detector.clone();
            let extractor = stage.extractor.clone();
            tokio::task::spawn_blocking(move || {
                run_vision(&frames_dir, detector.as_ref(), extractor.as_ref())
            })
            .await
            .map_err(|e| IngestError::Task(format!("vision stage panicked: {e}")))??
        };

        let records = match &stage.store {
            Some(store) => {
                if let Some(pb) = &pb {
                    pb.set_message("Ingesting vectors...");
                }
                Some(ingest_frames(frames_dir, store.as_ref(), self.config.ingest).await?)
            }
            None => None,
        };

        if let Some(pb) = pb {
            pb.finish_with_message(format!("✓ {} frames analyzed", stats.processed));
        }
        Ok((stats, records))
    }
}

/// Print a summary of the ingestion results.
pub fn print_summary(report: &IngestReport) {
    let transcript = &report.transcript;
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Video Ingestion Complete                  ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Upload:     {}", report.upload_id);
    println!("  Frames:     {}", report.frames_dir.display());
    println!("  Audio:      {}", report.audio_dir.display());
    println!();
    println!(
        "  Frames:     {} written, {} dropped (every {} of {} decoded)",
        report.frames.written,
        report.frames.dropped,
        report.frames.frame_interval,
        report.frames.decoded
    );
    println!(
        "  Chunks:     {} ({} speech, {} music, {} silence)",
        transcript.len(),
        transcript.count(Classification::Speech),
        transcript.count(Classification::Music),
        transcript.count(Classification::Silence)
    );
    if transcript.failures() > 0 {
        println!("  Failures:   {} chunks without text", transcript.failures());
    }
    println!("  Duration:   {:.1}s audio", transcript.duration());
    if let Some(vision) = report.vision {
        println!(
            "  Vision:     {} frames analyzed, {} skipped",
            vision.processed, vision.skipped
        );
    }
    if let Some(records) = report.ingested_records {
        println!("  Vectors:    {} records ingested", records);
    }
    println!();
    println!("  Total:      {:.2}s", report.elapsed.as_secs_f64());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
