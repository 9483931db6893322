//! Object detection and feature extraction over sampled frames.
//!
//! Models are injected through [`Detector`] and [`FeatureExtractor`]; this
//! module only walks the frames directory and persists what they return.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::write_json;
use crate::error::Result;

/// One detected object, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    pub class: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame: String,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub frame: String,
    pub features: Vec<f32>,
}

pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Produces a fixed-length embedding for a frame.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisionStats {
    pub processed: usize,
    pub skipped: usize,
}

/// A persisted frame image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub index: u64,
    pub path: PathBuf,
}

impl FrameFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn detections_path(&self) -> PathBuf {
        self.sidecar("detections")
    }

    pub fn features_path(&self) -> PathBuf {
        self.sidecar("features")
    }

    fn sidecar(&self, kind: &str) -> PathBuf {
        self.path
            .with_file_name(format!("frame_{}_{}.json", self.index, kind))
    }
}

/// `frame_<i>.jpg` / `frame_<i>.png` files in `dir`, sorted by index.
pub fn list_frames(dir: &Path) -> Result<Vec<FrameFile>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(index) = parse_frame_index(&path) {
            frames.push(FrameFile { index, path });
        }
    }
    frames.sort_by_key(|f| f.index);
    Ok(frames)
}

fn parse_frame_index(path: &Path) -> Option<u64> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if ext != "jpg" && ext != "png" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("frame_")?
        .parse()
        .ok()
}

/// Run detection and feature extraction for every frame in `frames_dir`.
pub fn run_vision(
    frames_dir: &Path,
    detector: &dyn Detector,
    extractor: &dyn FeatureExtractor,
) -> Result<VisionStats> {
    let frames = list_frames(frames_dir)?;
    let mut stats = VisionStats::default();

    for frame in &frames {
        match process_frame(frame, detector, extractor) {
            Ok(count) => {
                debug!("{}: {} detections", frame.name(), count);
                stats.processed += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {}", frame.path.display(), e);
                stats.skipped += 1;
            }
        }
    }

    info!(
        "Vision stage processed {} frames ({} skipped) in {}",
        stats.processed,
        stats.skipped,
        frames_dir.display()
    );
    Ok(stats)
}

fn process_frame(
    frame: &FrameFile,
    detector: &dyn Detector,
    extractor: &dyn FeatureExtractor,
) -> Result<usize> {
    let image = image::open(&frame.path)?.to_rgb8();
    let name = frame.name();

    let detections = detector.detect(&image)?;
    let count = detections.len();
    write_json(
        &frame.detections_path(),
        &FrameDetections {
            frame: name.clone(),
            detections,
        },
    )?;

    let features = extractor.extract(&image)?;
    write_json(
        &frame.features_path(),
        &FrameFeatures {
            frame: name,
            features,
        },
    )?;

    Ok(count)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FixedDetector;

    impl Detector for FixedDetector {
        fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
            Ok(vec![Detection {
                xmin: 0.0,
                ymin: 0.0,
                xmax: image.width() as f32,
                ymax: image.height() as f32,
                confidence: 0.9,
                class: 0,
                name: "person".to_string(),
            }])
        }
    }

    /// Embedding of length `dim` filled with the mean red value.
    pub(crate) struct MeanColorExtractor {
        pub(crate) dim: usize,
    }

    impl FeatureExtractor for MeanColorExtractor {
        fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
            let n = (image.width() * image.height()).max(1) as f32;
            let red: f32 = image.pixels().map(|p| p[0] as f32).sum::<f32>() / n;
            Ok(vec![red / 255.0; self.dim])
        }
    }

    pub(crate) fn write_frame(dir: &Path, index: u64, red: u8) {
        RgbImage::from_pixel(4, 4, image::Rgb([red, 0, 0]))
            .save(dir.join(format!("frame_{index}.png")))
            .unwrap();
    }

    #[test]
    fn test_list_frames_sorted_by_index() {
        let dir = tempfile::tempdir().unwrap();
        for i in [30u64, 0, 120] {
            write_frame(dir.path(), i, 10);
        }
        std::fs::write(dir.path().join("frame_0_features.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let indices: Vec<u64> = list_frames(dir.path())
            .unwrap()
            .iter()
            .map(|f| f.index)
            .collect();
        assert_eq!(indices, vec![0, 30, 120]);
    }

    #[test]
    fn test_run_vision_writes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 0, 255);
        write_frame(dir.path(), 30, 0);

        let stats = run_vision(dir.path(), &FixedDetector, &MeanColorExtractor { dim: 3 }).unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 0);

        let detections: FrameDetections = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("frame_0_detections.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(detections.frame, "frame_0.png");
        assert_eq!(detections.detections[0].name, "person");

        let features: FrameFeatures = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("frame_30_features.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(features.features, vec![0.0; 3]);
    }

    #[test]
    fn test_unreadable_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 0, 1);
        std::fs::write(dir.path().join("frame_1.jpg"), b"not an image").unwrap();

        let stats = run_vision(dir.path(), &FixedDetector, &MeanColorExtractor { dim: 2 }).unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert!(!dir.path().join("frame_1_detections.json").exists());
    }
}
